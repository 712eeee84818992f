/// ─── EpochX Ledger Constants ────────────────────────────────────────────────
///
/// Bounds and defaults for the sliding validity window.
///
/// A ledger is sliced into epochs of `bucket_duration` positions. Value minted
/// at a position stays spendable while it lies inside the trailing
/// `window_size` epochs of the current pointer.

// ── Window bounds (strict setup) ─────────────────────────────────────────────

/// Smallest accepted epoch width, in positions.
pub const MIN_BUCKET_DURATION: u64 = 1;

/// Largest accepted epoch width: one tropical year in seconds
/// (365.24219 days). Block-based ledgers are held to the same ceiling.
pub const MAX_BUCKET_DURATION: u64 = 31_556_926;

/// Smallest accepted validity window, in epochs.
pub const MIN_WINDOW_SIZE: u64 = 1;

/// Largest accepted validity window, in epochs.
pub const MAX_WINDOW_SIZE: u64 = 254;

// ── Defaults ─────────────────────────────────────────────────────────────────

/// Default epoch width: one day of Unix seconds.
pub const DEFAULT_BUCKET_DURATION: u64 = 86_400;

/// Default validity window: 30 epochs.
pub const DEFAULT_WINDOW_SIZE: u64 = 30;

/// Default number of decimals reported by the token facade.
pub const DEFAULT_DECIMALS: u8 = 18;

// ── Allowances ───────────────────────────────────────────────────────────────

/// An allowance equal to this value is never decremented by `transfer_from`.
pub const INFINITE_ALLOWANCE: u128 = u128::MAX;

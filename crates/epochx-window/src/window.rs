//! Sliding window calculator.
//!
//! ```text
//!  origin        D          D          D          D
//!    |----------|----------|----------|----------|---- positions
//!      epoch 0    epoch 1    epoch 2    epoch 3
//!                 ^ first_valid         ^ last_valid = index_for(t)   (W = 2)
//! ```
//!
//! `index_range(t)` spans `W + 1` epochs inclusive. Only the oldest epoch of
//! that range can hold value that is already past its age limit, so callers
//! filter that one epoch by `expiry_cutoff(t)` and trust the newer ones.

use epochx_core::constants::{
    MAX_BUCKET_DURATION, MAX_WINDOW_SIZE, MIN_BUCKET_DURATION, MIN_WINDOW_SIZE,
};
use epochx_core::error::EpochxError;
use epochx_core::types::{Epoch, Position};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// First and last position (inclusive) that map to one epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochBounds {
    pub start: Position,
    pub end: Position,
}

/// Window parameters. Immutable for the life of a ledger unless the ledger
/// is explicitly reconfigured.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlidingWindow {
    /// Position at which epoch 0 begins.
    pub origin: Position,
    /// Width of one epoch, in positions.
    pub bucket_duration: u64,
    /// Number of trailing epochs considered valid.
    pub window_size: u64,
}

impl SlidingWindow {
    /// Build a window. With `strict`, the duration must be within
    /// `1..=31_556_926` and the size within `1..=254`.
    pub fn setup(
        origin: Position,
        bucket_duration: u64,
        window_size: u64,
        strict: bool,
    ) -> Result<Self, EpochxError> {
        if strict {
            if !(MIN_BUCKET_DURATION..=MAX_BUCKET_DURATION).contains(&bucket_duration) {
                return Err(EpochxError::InvalidDuration { duration: bucket_duration });
            }
            if !(MIN_WINDOW_SIZE..=MAX_WINDOW_SIZE).contains(&window_size) {
                return Err(EpochxError::InvalidSize { size: window_size });
            }
        }
        debug!(origin, bucket_duration, window_size, strict, "sliding window configured");
        Ok(Self { origin, bucket_duration, window_size })
    }

    /// Reset every parameter to zero. Afterwards all positions map to epoch 0.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Epoch containing position `t`. Positions at or before the origin are
    /// clamped to 0, as is everything when the duration is zero.
    pub fn index_for(&self, t: Position) -> Epoch {
        if self.bucket_duration == 0 || t <= self.origin {
            return 0;
        }
        (t - self.origin) / self.bucket_duration
    }

    /// `(first_valid, last_valid)` epochs at position `t`.
    pub fn index_range(&self, t: Position) -> (Epoch, Epoch) {
        let last = self.index_for(t);
        (last.saturating_sub(self.window_size), last)
    }

    /// Maximum age, in positions, of spendable value.
    pub fn pointers_in_window(&self) -> u64 {
        self.window_size.saturating_mul(self.bucket_duration)
    }

    /// Oldest position whose value is still spendable at `t`. Buckets strictly
    /// before the cutoff have expired.
    pub fn expiry_cutoff(&self, t: Position) -> Position {
        t.saturating_sub(self.pointers_in_window())
    }

    /// Whether value minted at `position` can still be spent at `t`.
    pub fn is_live(&self, position: Position, t: Position) -> bool {
        let (first, _) = self.index_range(t);
        position >= self.expiry_cutoff(t) && self.index_for(position) >= first
    }

    /// True once `epoch` has slid out of the window at `t`.
    pub fn is_epoch_expired(&self, epoch: Epoch, t: Position) -> bool {
        let (first, _) = self.index_range(t);
        epoch < first
    }

    /// Position range belonging to `epoch`. Epoch 0 also absorbs every
    /// position before the origin; that is not reflected here.
    pub fn epoch_bounds(&self, epoch: Epoch) -> EpochBounds {
        let start = self
            .origin
            .saturating_add(epoch.saturating_mul(self.bucket_duration));
        let end = start.saturating_add(self.bucket_duration.saturating_sub(1));
        EpochBounds { start, end }
    }

    /// Position at which value minted at `position` stops being spendable.
    pub fn expires_at(&self, position: Position) -> Position {
        position.saturating_add(self.pointers_in_window()).saturating_add(1)
    }
}

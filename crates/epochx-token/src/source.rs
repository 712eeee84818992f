use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use epochx_core::types::{EpochType, Position};

/// Where the ledger pointer comes from.
///
/// Implementations must never move backwards between two reads; the engine
/// rejects a mutation whose pointer is older than the last applied one.
pub trait PositionSource: Send + Sync {
    fn current(&self) -> Position;

    fn epoch_type(&self) -> EpochType;
}

// ── BlockHeight ──────────────────────────────────────────────────────────────

/// A block counter advanced by the host.
#[derive(Debug, Default)]
pub struct BlockHeight {
    height: AtomicU64,
}

impl BlockHeight {
    pub fn new(height: Position) -> Self {
        Self { height: AtomicU64::new(height) }
    }

    /// Move forward by `blocks`, returning the new height.
    pub fn advance(&self, blocks: u64) -> Position {
        let prev = self
            .height
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |h| Some(h.saturating_add(blocks)))
            .unwrap_or_else(|h| h);
        prev.saturating_add(blocks)
    }

    /// Jump to `height`. Lower values are ignored.
    pub fn set(&self, height: Position) -> Position {
        self.height.fetch_max(height, Ordering::SeqCst).max(height)
    }
}

impl PositionSource for BlockHeight {
    fn current(&self) -> Position {
        self.height.load(Ordering::SeqCst)
    }

    fn epoch_type(&self) -> EpochType {
        EpochType::BlocksBased
    }
}

// ── SystemClock ──────────────────────────────────────────────────────────────

/// Wall-clock Unix seconds.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl PositionSource for SystemClock {
    fn current(&self) -> Position {
        // Pre-1970 clocks clamp to zero.
        Position::try_from(Utc::now().timestamp()).unwrap_or(0)
    }

    fn epoch_type(&self) -> EpochType {
        EpochType::TimeBased
    }
}

use std::sync::Arc;

use epochx_core::error::EpochxError;
use epochx_core::event::LedgerEvent;
use epochx_core::types::{AccountId, Balance, Bucket, Epoch, Position};
use epochx_window::SlidingWindow;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::db::StateDb;
use crate::ledger::{Applied, Ledger, SpendScope};
use crate::query::{BalanceQuery, EpochInfo, NearestExpiry};

/// Buffered notifications per subscriber before the slowest one lags.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

struct Inner {
    ledger: Ledger,
    /// Highest pointer applied by a mutation.
    last_pointer: Option<Position>,
    /// Memory ran ahead of a failed write and must be reloaded from the
    /// store before the next mutation.
    stale: bool,
}

impl Inner {
    /// Replace memory with what the store holds.
    fn resync(&mut self, db: &StateDb) -> Result<(), EpochxError> {
        let ledger = db
            .load_ledger()?
            .ok_or_else(|| EpochxError::Storage("ledger vanished from store".into()))?;
        self.ledger = ledger;
        self.last_pointer = db.get_last_pointer()?;
        self.stale = false;
        Ok(())
    }
}

// ── LedgerEngine ──────────────────────────────────────────────────────────────

/// The single-writer boundary around a ledger.
///
/// Each mutation holds the write lock for its whole plan-and-commit, so
/// readers never observe a half-applied spend. Queries share the read lock.
/// With a `StateDb` attached, every committed change is written through
/// before the lock is released.
pub struct LedgerEngine {
    inner: RwLock<Inner>,
    db: Option<Arc<StateDb>>,
    events: broadcast::Sender<LedgerEvent>,
}

impl LedgerEngine {
    /// In-memory engine.
    pub fn new(window: SlidingWindow) -> Self {
        Self::from_ledger(Ledger::new(window), None, None)
    }

    /// Start a fresh persistent ledger, discarding any balances in `db`.
    /// The recorded pointer survives: the host timeline does not rewind.
    pub fn init(db: Arc<StateDb>, window: SlidingWindow) -> Result<Self, EpochxError> {
        db.reset(&window)?;
        let ledger = db.load_ledger()?.unwrap_or_else(|| Ledger::new(window));
        let last_pointer = db.get_last_pointer()?;
        info!(?window, ?last_pointer, "ledger initialised");
        Ok(Self::from_ledger(ledger, last_pointer, Some(db)))
    }

    /// Reopen a persistent ledger. `None` when `db` was never initialised.
    pub fn open(db: Arc<StateDb>) -> Result<Option<Self>, EpochxError> {
        let Some(ledger) = db.load_ledger()? else {
            return Ok(None);
        };
        let last_pointer = db.get_last_pointer()?;
        info!(window = ?ledger.window(), ?last_pointer, "ledger reopened");
        Ok(Some(Self::from_ledger(ledger, last_pointer, Some(db))))
    }

    fn from_ledger(ledger: Ledger, last_pointer: Option<Position>, db: Option<Arc<StateDb>>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: RwLock::new(Inner { ledger, last_pointer, stale: false }),
            db,
            events,
        }
    }

    /// Receive every event committed after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.events.subscribe()
    }

    pub fn window(&self) -> SlidingWindow {
        *self.inner.read().ledger.window()
    }

    pub fn last_pointer(&self) -> Option<Position> {
        self.inner.read().last_pointer
    }

    /// Copy of the whole ledger, consistent at one instant.
    pub fn snapshot(&self) -> Ledger {
        self.inner.read().ledger.clone()
    }

    // ── Mutations ─────────────────────────────────────────────────────────────

    pub fn mint(&self, pointer: Position, to: &AccountId, amount: Balance) -> Result<Applied, EpochxError> {
        self.apply("mint", Some(pointer), |l| l.mint(pointer, to, amount))
    }

    pub fn burn(&self, pointer: Position, from: &AccountId, amount: Balance) -> Result<Applied, EpochxError> {
        self.apply("burn", Some(pointer), |l| l.burn(pointer, from, amount, SpendScope::Window))
    }

    pub fn burn_at_epoch(
        &self,
        pointer: Position,
        epoch: Epoch,
        from: &AccountId,
        amount: Balance,
    ) -> Result<Applied, EpochxError> {
        self.apply("burn_at_epoch", Some(pointer), |l| {
            l.burn(pointer, from, amount, SpendScope::Epoch(epoch))
        })
    }

    pub fn transfer(
        &self,
        pointer: Position,
        from: &AccountId,
        to: &AccountId,
        amount: Balance,
    ) -> Result<Applied, EpochxError> {
        self.apply("transfer", Some(pointer), |l| {
            l.transfer(pointer, from, to, amount, SpendScope::Window)
        })
    }

    pub fn transfer_at_epoch(
        &self,
        pointer: Position,
        epoch: Epoch,
        from: &AccountId,
        to: &AccountId,
        amount: Balance,
    ) -> Result<Applied, EpochxError> {
        self.apply("transfer_at_epoch", Some(pointer), |l| {
            l.transfer(pointer, from, to, amount, SpendScope::Epoch(epoch))
        })
    }

    pub fn transfer_from(
        &self,
        pointer: Position,
        spender: &AccountId,
        from: &AccountId,
        to: &AccountId,
        amount: Balance,
    ) -> Result<Applied, EpochxError> {
        self.apply("transfer_from", Some(pointer), |l| {
            l.transfer_from(pointer, spender, from, to, amount, SpendScope::Window)
        })
    }

    pub fn transfer_from_at_epoch(
        &self,
        pointer: Position,
        epoch: Epoch,
        spender: &AccountId,
        from: &AccountId,
        to: &AccountId,
        amount: Balance,
    ) -> Result<Applied, EpochxError> {
        self.apply("transfer_from_at_epoch", Some(pointer), |l| {
            l.transfer_from(pointer, spender, from, to, amount, SpendScope::Epoch(epoch))
        })
    }

    pub fn update(
        &self,
        pointer: Position,
        from: &AccountId,
        to: &AccountId,
        amount: Balance,
    ) -> Result<Applied, EpochxError> {
        self.apply("update", Some(pointer), |l| l.update(pointer, from, to, amount))
    }

    pub fn update_at_epoch(
        &self,
        pointer: Position,
        epoch: Epoch,
        from: &AccountId,
        to: &AccountId,
        amount: Balance,
    ) -> Result<Applied, EpochxError> {
        self.apply("update_at_epoch", Some(pointer), |l| {
            l.update_at_epoch(pointer, epoch, from, to, amount)
        })
    }

    /// Approvals do not depend on the timeline and skip the pointer check.
    pub fn approve(&self, owner: &AccountId, spender: &AccountId, amount: Balance) -> Result<Applied, EpochxError> {
        self.apply("approve", None, |l| l.approve(owner, spender, amount))
    }

    /// Replace the window, dropping every balance. Destructive.
    pub fn reconfigure(&self, window: SlidingWindow) -> Result<(), EpochxError> {
        let mut inner = self.inner.write();
        if let Some(db) = &self.db {
            db.reset(&window)?;
            inner.stale = false;
        }
        inner.ledger.reconfigure(window);
        warn!(?window, "ledger reconfigured; all balances dropped");
        Ok(())
    }

    fn apply<F>(&self, op: &'static str, pointer: Option<Position>, f: F) -> Result<Applied, EpochxError>
    where
        F: FnOnce(&mut Ledger) -> Result<Applied, EpochxError>,
    {
        let mut inner = self.inner.write();

        if inner.stale {
            if let Some(db) = &self.db {
                inner.resync(db)?;
                info!(op, "ledger reloaded from store");
            }
        }

        if let (Some(got), Some(last)) = (pointer, inner.last_pointer) {
            if got < last {
                warn!(op, last, got, "rejected: position went backwards");
                return Err(EpochxError::PositionRegressed { last, got });
            }
        }

        let applied = match f(&mut inner.ledger) {
            Ok(applied) => applied,
            Err(e) => {
                warn!(op, error = %e, "ledger operation rejected");
                return Err(e);
            }
        };

        // The store commit is atomic, so on failure disk still holds the
        // pre-operation state; bring memory back to it.
        if let Some(db) = &self.db {
            if let Err(e) = db.commit(&inner.ledger, &applied.changes, pointer) {
                error!(op, error = %e, "write-through failed; rolling back");
                inner.stale = true;
                if let Err(reload) = inner.resync(db) {
                    error!(op, error = %reload, "rollback deferred; store unreadable");
                }
                return Err(e);
            }
        }
        if pointer.is_some() {
            inner.last_pointer = pointer;
        }

        info!(op, ?pointer, event = ?applied.event, draws = applied.draws.len(), "ledger operation applied");
        // No subscribers is fine.
        let _ = self.events.send(applied.event.clone());
        Ok(applied)
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    /// Run `f` against a consistent read view.
    pub fn query<R>(&self, f: impl FnOnce(BalanceQuery<'_>) -> R) -> R {
        let inner = self.inner.read();
        f(BalanceQuery::new(&inner.ledger))
    }

    pub fn balance_of(&self, pointer: Position, account: &AccountId) -> Balance {
        self.query(|q| q.balance_of(pointer, account))
    }

    pub fn balance_of_at_epoch(&self, pointer: Position, epoch: Epoch, account: &AccountId) -> Balance {
        self.query(|q| q.balance_of_at_epoch(pointer, epoch, account))
    }

    pub fn buckets(&self, pointer: Position, epoch: Epoch, account: &AccountId) -> Vec<Bucket> {
        self.query(|q| q.buckets(pointer, epoch, account))
    }

    pub fn nearest_expiry(&self, pointer: Position, account: &AccountId) -> Option<NearestExpiry> {
        self.query(|q| q.nearest_expiry(pointer, account))
    }

    pub fn epoch_info(&self, pointer: Position) -> EpochInfo {
        self.query(|q| q.epoch_info(pointer))
    }

    pub fn allowance(&self, owner: &AccountId, spender: &AccountId) -> Balance {
        self.inner.read().ledger.allowance(owner, spender)
    }

    /// Flush the attached store, if any.
    pub fn flush(&self) -> Result<(), EpochxError> {
        match &self.db {
            Some(db) => db.flush(),
            None => Ok(()),
        }
    }
}

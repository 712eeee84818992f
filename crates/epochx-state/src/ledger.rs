//! Ledger core: mint, burn, transfer and allowances over expiring buckets.
//!
//! Every spend runs in two phases. `plan_spend` reads the sender's buckets,
//! works out the lazy eviction and the FIFO draws, and fails before anything
//! is touched. `commit_spend` then applies the plan and cannot fail. A
//! rejected operation therefore leaves the ledger exactly as it was,
//! eviction included.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use epochx_core::constants::INFINITE_ALLOWANCE;
use epochx_core::error::EpochxError;
use epochx_core::event::LedgerEvent;
use epochx_core::types::{AccountId, Balance, Epoch, Position};
use epochx_window::SlidingWindow;
use tracing::debug;

use crate::buckets::EpochBalance;

// ── Spend planning ────────────────────────────────────────────────────────────

/// Which epochs a spend may draw from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpendScope {
    /// Every valid epoch, oldest first.
    Window,
    /// A single caller-chosen epoch.
    Epoch(Epoch),
}

/// One slice taken from a sender's bucket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Draw {
    pub epoch: Epoch,
    pub position: Position,
    pub amount: Balance,
}

#[derive(Debug, Default)]
struct SpendPlan {
    /// `(epoch, cutoff)` to refresh on the sender before drawing.
    eviction: Option<(Epoch, Position)>,
    draws: Vec<Draw>,
}

/// Keys touched by a committed operation, for write-through persistence.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub epochs: BTreeSet<(Epoch, AccountId)>,
    pub positions: BTreeSet<Position>,
    pub allowances: BTreeSet<(AccountId, AccountId)>,
    pub supply: bool,
}

/// Outcome of a committed mutation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Applied {
    pub event: LedgerEvent,
    pub draws: Vec<Draw>,
    pub changes: ChangeSet,
}

// ── Ledger ────────────────────────────────────────────────────────────────────

/// In-memory ledger state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Ledger {
    window: SlidingWindow,
    epochs: HashMap<(Epoch, AccountId), EpochBalance>,
    /// Minted-minus-burned per mint position.
    world_state: BTreeMap<Position, Balance>,
    allowances: HashMap<(AccountId, AccountId), Balance>,
    total_minted: Balance,
    total_burned: Balance,
}

/// Raw ledger contents, as loaded from or written to storage.
#[derive(Debug, Default)]
pub struct LedgerParts {
    pub window: SlidingWindow,
    pub epochs: Vec<((Epoch, AccountId), EpochBalance)>,
    pub world_state: BTreeMap<Position, Balance>,
    pub allowances: Vec<((AccountId, AccountId), Balance)>,
    pub total_minted: Balance,
    pub total_burned: Balance,
}

impl Ledger {
    pub fn new(window: SlidingWindow) -> Self {
        Self { window, ..Self::default() }
    }

    pub fn from_parts(parts: LedgerParts) -> Self {
        Self {
            window: parts.window,
            epochs: parts.epochs.into_iter().collect(),
            world_state: parts.world_state,
            allowances: parts.allowances.into_iter().collect(),
            total_minted: parts.total_minted,
            total_burned: parts.total_burned,
        }
    }

    pub fn window(&self) -> &SlidingWindow {
        &self.window
    }

    /// Replace the window and wipe every balance, position aggregate and
    /// supply counter. Allowances are kept.
    pub fn reconfigure(&mut self, window: SlidingWindow) {
        debug!(
            old = ?self.window,
            new = ?window,
            dropped_entries = self.epochs.len(),
            "ledger reconfigured; epoch state cleared"
        );
        self.window = window;
        self.epochs.clear();
        self.world_state.clear();
        self.total_minted = 0;
        self.total_burned = 0;
    }

    // ── Read access ───────────────────────────────────────────────────────────

    pub fn epoch_balance(&self, epoch: Epoch, account: &AccountId) -> Option<&EpochBalance> {
        self.epochs.get(&(epoch, *account))
    }

    pub fn epoch_entries(&self) -> impl Iterator<Item = (&(Epoch, AccountId), &EpochBalance)> {
        self.epochs.iter()
    }

    pub fn world_state(&self) -> &BTreeMap<Position, Balance> {
        &self.world_state
    }

    pub fn allowance(&self, owner: &AccountId, spender: &AccountId) -> Balance {
        self.allowances.get(&(*owner, *spender)).copied().unwrap_or(0)
    }

    pub fn allowance_entries(&self) -> impl Iterator<Item = (&(AccountId, AccountId), &Balance)> {
        self.allowances.iter()
    }

    pub fn total_minted(&self) -> Balance {
        self.total_minted
    }

    pub fn total_burned(&self) -> Balance {
        self.total_burned
    }

    /// Spendable amount in one epoch. The oldest valid epoch (`first`) is
    /// summed from `cutoff`; any other epoch is trusted wholesale.
    pub(crate) fn live_in_epoch(
        &self,
        epoch: Epoch,
        account: &AccountId,
        first: Epoch,
        cutoff: Position,
    ) -> Balance {
        match self.epochs.get(&(epoch, *account)) {
            None => 0,
            Some(eb) if epoch == first => eb.live_from(cutoff),
            Some(eb) => eb.total(),
        }
    }

    // ── Mutations ─────────────────────────────────────────────────────────────

    /// Generic entry point: mint when `from` is zero, burn when `to` is zero,
    /// otherwise transfer across the whole window.
    pub fn update(
        &mut self,
        pointer: Position,
        from: &AccountId,
        to: &AccountId,
        amount: Balance,
    ) -> Result<Applied, EpochxError> {
        if from.is_zero() {
            self.mint(pointer, to, amount)
        } else if to.is_zero() {
            self.burn(pointer, from, amount, SpendScope::Window)
        } else {
            self.transfer(pointer, from, to, amount, SpendScope::Window)
        }
    }

    /// As `update`, drawing only from `epoch`. There is no epoch-pinned mint.
    pub fn update_at_epoch(
        &mut self,
        pointer: Position,
        epoch: Epoch,
        from: &AccountId,
        to: &AccountId,
        amount: Balance,
    ) -> Result<Applied, EpochxError> {
        if from.is_zero() {
            return Err(EpochxError::InvalidSender);
        }
        if to.is_zero() {
            self.burn(pointer, from, amount, SpendScope::Epoch(epoch))
        } else {
            self.transfer(pointer, from, to, amount, SpendScope::Epoch(epoch))
        }
    }

    pub fn mint(
        &mut self,
        pointer: Position,
        to: &AccountId,
        amount: Balance,
    ) -> Result<Applied, EpochxError> {
        if to.is_zero() {
            return Err(EpochxError::InvalidReceiver);
        }
        let total_minted = self
            .total_minted
            .checked_add(amount)
            .ok_or(EpochxError::SupplyOverflow)?;

        let epoch = self.window.index_for(pointer);
        let mut changes = ChangeSet { supply: true, ..ChangeSet::default() };
        if amount > 0 {
            self.epochs.entry((epoch, *to)).or_default().credit(pointer, amount);
            *self.world_state.entry(pointer).or_insert(0) += amount;
            changes.epochs.insert((epoch, *to));
            changes.positions.insert(pointer);
        }
        self.total_minted = total_minted;

        Ok(Applied {
            event: LedgerEvent::Minted { to: *to, amount, position: pointer },
            draws: Vec::new(),
            changes,
        })
    }

    pub fn burn(
        &mut self,
        pointer: Position,
        from: &AccountId,
        amount: Balance,
        scope: SpendScope,
    ) -> Result<Applied, EpochxError> {
        if from.is_zero() {
            return Err(EpochxError::InvalidSender);
        }
        let plan = self.plan_spend(pointer, from, amount, scope)?;
        let changes = self.commit_spend(from, None, &plan);
        Ok(Applied {
            event: LedgerEvent::Burned { from: *from, amount, position: pointer },
            draws: plan.draws,
            changes,
        })
    }

    pub fn transfer(
        &mut self,
        pointer: Position,
        from: &AccountId,
        to: &AccountId,
        amount: Balance,
        scope: SpendScope,
    ) -> Result<Applied, EpochxError> {
        if from.is_zero() {
            return Err(EpochxError::InvalidSender);
        }
        if to.is_zero() {
            return Err(EpochxError::InvalidReceiver);
        }
        let plan = self.plan_spend(pointer, from, amount, scope)?;
        let changes = self.commit_spend(from, Some(to), &plan);
        Ok(Applied {
            event: LedgerEvent::Transferred { from: *from, to: *to, amount, position: pointer },
            draws: plan.draws,
            changes,
        })
    }

    /// Transfer on behalf of `from`, consuming `spender`'s allowance.
    pub fn transfer_from(
        &mut self,
        pointer: Position,
        spender: &AccountId,
        from: &AccountId,
        to: &AccountId,
        amount: Balance,
        scope: SpendScope,
    ) -> Result<Applied, EpochxError> {
        if spender.is_zero() {
            return Err(EpochxError::InvalidSpender);
        }
        if from.is_zero() {
            return Err(EpochxError::InvalidSender);
        }
        if to.is_zero() {
            return Err(EpochxError::InvalidReceiver);
        }
        let allowance = self.allowance(from, spender);
        if allowance < amount {
            return Err(EpochxError::InsufficientAllowance {
                spender: *spender,
                allowance,
                needed: amount,
            });
        }

        let plan = self.plan_spend(pointer, from, amount, scope)?;
        let mut changes = self.commit_spend(from, Some(to), &plan);
        if allowance != INFINITE_ALLOWANCE {
            self.allowances.insert((*from, *spender), allowance - amount);
            changes.allowances.insert((*from, *spender));
        }
        Ok(Applied {
            event: LedgerEvent::Transferred { from: *from, to: *to, amount, position: pointer },
            draws: plan.draws,
            changes,
        })
    }

    /// Set `spender`'s allowance over `owner`'s funds, replacing any previous
    /// value.
    pub fn approve(
        &mut self,
        owner: &AccountId,
        spender: &AccountId,
        amount: Balance,
    ) -> Result<Applied, EpochxError> {
        if owner.is_zero() {
            return Err(EpochxError::InvalidApprover);
        }
        if spender.is_zero() {
            return Err(EpochxError::InvalidSpender);
        }
        self.allowances.insert((*owner, *spender), amount);
        let mut changes = ChangeSet::default();
        changes.allowances.insert((*owner, *spender));
        Ok(Applied {
            event: LedgerEvent::Approved { owner: *owner, spender: *spender, amount },
            draws: Vec::new(),
            changes,
        })
    }

    // ── Spend internals ───────────────────────────────────────────────────────

    fn plan_spend(
        &self,
        pointer: Position,
        from: &AccountId,
        amount: Balance,
        scope: SpendScope,
    ) -> Result<SpendPlan, EpochxError> {
        let (first, last) = self.window.index_range(pointer);
        let cutoff = self.window.expiry_cutoff(pointer);

        // An empty range (lo > hi) means a future epoch: nothing to spend.
        let (lo, hi) = match scope {
            SpendScope::Window => (first, last),
            SpendScope::Epoch(epoch) if epoch < first => {
                return Err(EpochxError::TransferredExpiredToken { epoch });
            }
            SpendScope::Epoch(epoch) => (epoch, epoch.min(last)),
        };

        let mut plan = SpendPlan::default();
        if lo == first && lo <= hi {
            let stale = self
                .epochs
                .get(&(first, *from))
                .and_then(|eb| eb.buckets().front())
                .is_some_and(|front| front < cutoff);
            if stale {
                plan.eviction = Some((first, cutoff));
            }
        }

        let mut available: Balance = 0;
        if lo <= hi {
            for epoch in lo..=hi {
                available = available.saturating_add(self.live_in_epoch(epoch, from, first, cutoff));
            }
        }
        if available < amount {
            return Err(EpochxError::InsufficientBalance {
                account: *from,
                available,
                requested: amount,
            });
        }

        // `hi` may be u64::MAX; a ranged loop never steps past it.
        let mut remaining = amount;
        for epoch in lo..=hi {
            if remaining == 0 {
                break;
            }
            let Some(eb) = self.epochs.get(&(epoch, *from)) else {
                continue;
            };
            for bucket in eb.buckets().iter() {
                if epoch == first && bucket.position < cutoff {
                    continue;
                }
                let take = bucket.amount.min(remaining);
                plan.draws.push(Draw { epoch, position: bucket.position, amount: take });
                remaining -= take;
                if remaining == 0 {
                    break;
                }
            }
        }

        debug!(
            account = %from,
            amount,
            available,
            draws = plan.draws.len(),
            evict = plan.eviction.is_some(),
            "spend planned"
        );
        Ok(plan)
    }

    /// Apply a plan produced by `plan_spend`. `to = None` burns.
    fn commit_spend(
        &mut self,
        from: &AccountId,
        to: Option<&AccountId>,
        plan: &SpendPlan,
    ) -> ChangeSet {
        let mut changes = ChangeSet::default();

        if let Some((epoch, cutoff)) = plan.eviction {
            if let Some(eb) = self.epochs.get_mut(&(epoch, *from)) {
                let evicted = eb.evict_before(cutoff);
                debug!(account = %from, epoch, cutoff, evicted, "expired buckets evicted");
                changes.epochs.insert((epoch, *from));
            }
        }

        for draw in &plan.draws {
            if let Some(eb) = self.epochs.get_mut(&(draw.epoch, *from)) {
                eb.debit(draw.position, draw.amount);
            }
            changes.epochs.insert((draw.epoch, *from));

            match to {
                Some(to) => {
                    self.epochs
                        .entry((draw.epoch, *to))
                        .or_default()
                        .credit(draw.position, draw.amount);
                    changes.epochs.insert((draw.epoch, *to));
                }
                None => {
                    if let Some(minted) = self.world_state.get_mut(&draw.position) {
                        *minted = minted.saturating_sub(draw.amount);
                        if *minted == 0 {
                            self.world_state.remove(&draw.position);
                        }
                    }
                    self.total_burned = self.total_burned.saturating_add(draw.amount);
                    changes.positions.insert(draw.position);
                    changes.supply = true;
                }
            }
        }
        changes
    }
}

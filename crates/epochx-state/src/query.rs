use epochx_core::types::{AccountId, Balance, Bucket, Epoch, Position};
use epochx_window::EpochBounds;
use serde::{Deserialize, Serialize};

use crate::ledger::Ledger;

/// Window summary at one pointer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochInfo {
    pub pointer: Position,
    pub current: Epoch,
    pub first_valid: Epoch,
    pub last_valid: Epoch,
    pub bounds: EpochBounds,
    /// Oldest position whose value is still spendable.
    pub cutoff: Position,
}

/// The oldest spendable bucket of an account and when it lapses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NearestExpiry {
    pub amount: Balance,
    pub position: Position,
    /// First position at which the bucket is no longer spendable.
    pub expires_at: Position,
}

/// Read-only balance views over a ledger. Nothing here mutates or evicts.
pub struct BalanceQuery<'a> {
    ledger: &'a Ledger,
}

impl<'a> BalanceQuery<'a> {
    pub fn new(ledger: &'a Ledger) -> Self {
        Self { ledger }
    }

    /// Spendable balance at `pointer`.
    ///
    /// Only the oldest valid epoch can hold buckets past the age limit, so it
    /// is summed bucket by bucket; newer epochs contribute their totals.
    pub fn balance_of(&self, pointer: Position, account: &AccountId) -> Balance {
        let window = self.ledger.window();
        let (first, last) = window.index_range(pointer);
        let cutoff = window.expiry_cutoff(pointer);

        let partial = self.ledger.live_in_epoch(first, account, first, cutoff);
        if first == last {
            return partial;
        }
        (first + 1..=last)
            .map(|epoch| self.ledger.live_in_epoch(epoch, account, first, cutoff))
            .fold(partial, Balance::saturating_add)
    }

    /// Spendable balance held in `epoch` at `pointer`; zero outside the window.
    pub fn balance_of_at_epoch(
        &self,
        pointer: Position,
        epoch: Epoch,
        account: &AccountId,
    ) -> Balance {
        let window = self.ledger.window();
        let (first, last) = window.index_range(pointer);
        if epoch < first || epoch > last {
            return 0;
        }
        self.ledger
            .live_in_epoch(epoch, account, first, window.expiry_cutoff(pointer))
    }

    /// Spendable buckets of `account` in `epoch`, oldest first.
    pub fn buckets(&self, pointer: Position, epoch: Epoch, account: &AccountId) -> Vec<Bucket> {
        let window = self.ledger.window();
        let (first, last) = window.index_range(pointer);
        if epoch < first || epoch > last {
            return Vec::new();
        }
        let start = if epoch == first { window.expiry_cutoff(pointer) } else { 0 };
        self.ledger
            .epoch_balance(epoch, account)
            .map(|eb| eb.buckets().to_vec_from(start))
            .unwrap_or_default()
    }

    /// The bucket that will expire next, if the account holds anything.
    pub fn nearest_expiry(&self, pointer: Position, account: &AccountId) -> Option<NearestExpiry> {
        let window = self.ledger.window();
        let (first, last) = window.index_range(pointer);
        (first..=last)
            .flat_map(|epoch| self.buckets(pointer, epoch, account))
            .next()
            .map(|b| NearestExpiry {
                amount: b.amount,
                position: b.position,
                expires_at: window.expires_at(b.position),
            })
    }

    pub fn epoch_info(&self, pointer: Position) -> EpochInfo {
        let window = self.ledger.window();
        let (first_valid, last_valid) = window.index_range(pointer);
        EpochInfo {
            pointer,
            current: last_valid,
            first_valid,
            last_valid,
            bounds: window.epoch_bounds(last_valid),
            cutoff: window.expiry_cutoff(pointer),
        }
    }

    /// Minted-minus-burned at one mint position, expired value included.
    pub fn minted_at(&self, position: Position) -> Balance {
        self.ledger.world_state().get(&position).copied().unwrap_or(0)
    }

    pub fn total_supply_minted(&self) -> Balance {
        self.ledger.total_minted()
    }

    pub fn total_burned(&self) -> Balance {
        self.ledger.total_burned()
    }
}

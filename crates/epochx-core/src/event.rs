use serde::{Deserialize, Serialize};

use crate::types::{AccountId, Balance, Position};

// ── LedgerEvent ───────────────────────────────────────────────────────────────

/// Notification published after a ledger mutation commits. Consumers use these
/// for indexing and logging; the ledger never reads them back.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum LedgerEvent {
    /// New value stamped at `position` for `to`.
    Minted {
        to: AccountId,
        amount: Balance,
        position: Position,
    },

    /// Value destroyed from `from`, oldest buckets first.
    Burned {
        from: AccountId,
        amount: Balance,
        position: Position,
    },

    /// Value moved between two accounts. The recipient inherits the original
    /// mint positions, so its expiry is unchanged.
    Transferred {
        from: AccountId,
        to: AccountId,
        amount: Balance,
        position: Position,
    },

    Approved {
        owner: AccountId,
        spender: AccountId,
        amount: Balance,
    },
}

impl LedgerEvent {
    /// The ERC-20 style `(from, to, value)` triple. Mints come from the zero
    /// account, burns go to it; approvals have none.
    pub fn as_transfer(&self) -> Option<(AccountId, AccountId, Balance)> {
        match self {
            LedgerEvent::Minted { to, amount, .. } => Some((AccountId::ZERO, *to, *amount)),
            LedgerEvent::Burned { from, amount, .. } => Some((*from, AccountId::ZERO, *amount)),
            LedgerEvent::Transferred { from, to, amount, .. } => Some((*from, *to, *amount)),
            LedgerEvent::Approved { .. } => None,
        }
    }
}

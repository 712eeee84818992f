use thiserror::Error;

use crate::types::{AccountId, Balance, Epoch, Position};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EpochxError {
    // ── Configuration errors ─────────────────────────────────────────────────
    #[error("invalid bucket duration {duration}: must be within 1..=31556926")]
    InvalidDuration { duration: u64 },

    #[error("invalid window size {size}: must be within 1..=254")]
    InvalidSize { size: u64 },

    // ── Balance errors ───────────────────────────────────────────────────────
    #[error("insufficient balance for {account}: available {available}, requested {requested}")]
    InsufficientBalance {
        account: AccountId,
        available: Balance,
        requested: Balance,
    },

    #[error("insufficient allowance for {spender}: allowance {allowance}, needed {needed}")]
    InsufficientAllowance {
        spender: AccountId,
        allowance: Balance,
        needed: Balance,
    },

    #[error("epoch {epoch} has expired; its tokens can no longer be transferred")]
    TransferredExpiredToken { epoch: Epoch },

    #[error("total supply would overflow")]
    SupplyOverflow,

    // ── Participant errors ───────────────────────────────────────────────────
    #[error("invalid sender: the zero account cannot send")]
    InvalidSender,

    #[error("invalid receiver: the zero account cannot receive")]
    InvalidReceiver,

    #[error("invalid approver: the zero account cannot approve")]
    InvalidApprover,

    #[error("invalid spender: the zero account cannot be approved")]
    InvalidSpender,

    #[error("invalid account id: {0}")]
    InvalidAccountId(String),

    // ── Host contract ────────────────────────────────────────────────────────
    #[error("position went backwards: last applied {last}, got {got}")]
    PositionRegressed { last: Position, got: Position },

    // ── Serialization / storage ──────────────────────────────────────────────
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl EpochxError {
    /// True for errors caused by the request itself (bad input, not enough
    /// funds). Storage and serialization failures return false.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, EpochxError::Serialization(_) | EpochxError::Storage(_))
    }
}

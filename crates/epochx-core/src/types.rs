use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::EpochxError;

/// Token amount in base units.
pub type Balance = u128;

/// A point on the host timeline: a block number or a Unix timestamp,
/// depending on the ledger's `EpochType`.
pub type Position = u64;

/// Index of a fixed-width slice of the timeline, counted from the origin.
pub type Epoch = u64;

// ── AccountId ────────────────────────────────────────────────────────────────

/// 32-byte account identifier. The all-zero id is the null account used as
/// the source of mints and the sink of burns.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(pub [u8; 32]);

impl AccountId {
    pub const ZERO: AccountId = AccountId([0u8; 32]);

    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Deterministic id for a human-readable label: BLAKE3(label).
    pub fn from_label(label: &str) -> Self {
        Self(*blake3::hash(label.as_bytes()).as_bytes())
    }

    /// Base-58 encoded string representation.
    pub fn to_b58(&self) -> String {
        bs58::encode(&self.0).into_string()
    }

    pub fn from_b58(s: &str) -> Result<Self, EpochxError> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| EpochxError::InvalidAccountId(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, EpochxError> {
        let bytes = hex::decode(s.trim_start_matches("0x"))
            .map_err(|e| EpochxError::InvalidAccountId(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    fn from_slice(bytes: &[u8]) -> Result<Self, EpochxError> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| {
            EpochxError::InvalidAccountId(format!("expected 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(arr))
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_b58())
    }
}

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return write!(f, "AccountId(zero)");
        }
        write!(f, "AccountId({})", &self.to_b58()[..8])
    }
}

// ── EpochType ────────────────────────────────────────────────────────────────

/// What a `Position` measures. The ledger itself is agnostic; the tag tells
/// hosts which position source to feed it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EpochType {
    /// Positions are block numbers.
    BlocksBased,
    /// Positions are Unix timestamps in seconds.
    #[default]
    TimeBased,
}

impl fmt::Display for EpochType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EpochType::BlocksBased => write!(f, "blocks"),
            EpochType::TimeBased => write!(f, "time"),
        }
    }
}

// ── Bucket ───────────────────────────────────────────────────────────────────

/// Value created at one timeline position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub position: Position,
    pub amount: Balance,
}

//! epochx-state
//!
//! The expiring balance ledger: ordered bucket lists, the mint/burn/transfer
//! core with lazy eviction, read-only balance queries, the locking engine and
//! its sled-backed store.

pub mod buckets;
pub mod db;
pub mod engine;
pub mod ledger;
pub mod query;

pub use buckets::{BucketList, EpochBalance};
pub use db::StateDb;
pub use engine::LedgerEngine;
pub use ledger::{Applied, ChangeSet, Draw, Ledger, SpendScope};
pub use query::{BalanceQuery, EpochInfo, NearestExpiry};

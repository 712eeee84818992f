//! epochx-token
//!
//! Token-standard facade over the expiring ledger. An `ExpiringToken` reads
//! the current pointer from a `PositionSource` so callers deal only in
//! accounts and amounts.

pub mod source;
pub mod token;

pub use source::{BlockHeight, PositionSource, SystemClock};
pub use token::{ExpiringToken, TokenMetadata};

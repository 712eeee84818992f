pub mod constants;
pub mod error;
pub mod event;
pub mod types;

pub use constants::*;
pub use error::EpochxError;
pub use event::LedgerEvent;
pub use types::*;

//! epochx-window
//!
//! Sliding-window epoch arithmetic. Maps timeline positions to epoch indices
//! and to the range of epochs whose value is still spendable.
//!
//! All functions are pure; the only state is the three window parameters.

pub mod window;

pub use window::{EpochBounds, SlidingWindow};

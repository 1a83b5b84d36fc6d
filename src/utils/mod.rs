//! Shared utilities.

pub mod clock;

pub use clock::{Clock, ManualClock, SystemClock};

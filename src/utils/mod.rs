//! Logging, clock and test helpers.

pub mod clock;
pub mod log;
pub mod test_utils;

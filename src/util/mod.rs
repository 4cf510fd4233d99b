//! Utility modules: clock, timeout.

pub mod clock;
pub mod timeout;

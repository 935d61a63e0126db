//! Engine configuration.

pub mod constants;
pub mod options;

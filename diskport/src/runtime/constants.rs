//! Constants for the diskport engine
//!
//! Centralized location for hardcoded values and paths.

// Re-export shared constants from diskport-shared
pub use diskport_shared::constants::{envs, limits, paths, schemes, signatures, storage, tools};

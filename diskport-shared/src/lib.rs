//! Diskport Core - Shared code for the import engine and its test doubles
//!
//! This crate contains the error hierarchy and the fixed constants
//! (tool names, diagnostic signatures, default limits) that both the
//! production engine (diskport) and the test doubles (diskport-test-utils)
//! depend on.

pub mod constants;
pub mod errors;

pub use errors::{DiskportError, DiskportResult, ProcessError};

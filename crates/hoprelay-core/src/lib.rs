//! Core types and constants shared across hoprelay crates.
//!
//! This crate provides:
//! - Default configuration values
//! - Error type constants for metrics/logging
//! - Query traits for bypass, admission and rate limiting
//! - Stream and datagram relay primitives backed by a shared buffer pool

pub mod defaults;
pub mod errors;
pub mod io;
pub mod policy;

// Re-export commonly used items at crate root
pub use defaults::*;
pub use errors::*;
pub use policy::{Admission, Bypass, Limiter, RateLimiter, host_of};

/// Project name.
pub const PROJECT_NAME: &str = "hoprelay";
/// Project version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

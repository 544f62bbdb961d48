//! Configuration loading, validation and CLI overrides for hoprelay.
//!
//! A configuration declares services plus the named objects they refer to:
//! chains, admission and bypass matcher sets, rate limiters and recorders.
//! Files may be JSON (with comments), YAML or TOML.

mod cli;
mod defaults;
mod loader;
mod types;
mod validate;

pub use cli::{CliOverrides, apply_overrides};
pub use loader::{ConfigError, load_config};
pub use types::*;
pub use validate::validate_config;

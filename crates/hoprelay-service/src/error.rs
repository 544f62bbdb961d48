//! Service error types.

use hoprelay_chain::RouteError;
use hoprelay_metrics::{ERROR_ACCEPT, ERROR_BYPASS, ERROR_CONFIG, ERROR_IO, ERROR_NO_NODE};
use hoprelay_selector::SelectError;

/// Error that ends a service's accept loop.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("accept: {0}")]
    Accept(std::io::Error),
    #[error("service {0} is already serving")]
    AlreadyServing(String),
    #[error("service {0} is closed")]
    Closed(String),
}

impl ServiceError {
    /// Get the error type string for metrics.
    pub fn error_type(&self) -> &'static str {
        match self {
            ServiceError::Accept(_) => ERROR_ACCEPT,
            ServiceError::AlreadyServing(_) | ServiceError::Closed(_) => ERROR_CONFIG,
        }
    }
}

/// Error raised by a handler for one connection.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Route(#[from] RouteError),
    #[error("no forward target: {0}")]
    Target(#[from] SelectError),
    #[error("destination {0} is bypassed")]
    Bypassed(String),
}

impl HandlerError {
    pub fn error_type(&self) -> &'static str {
        match self {
            HandlerError::Io(_) => ERROR_IO,
            HandlerError::Route(e) => e.error_type(),
            HandlerError::Target(_) => ERROR_NO_NODE,
            HandlerError::Bypassed(_) => ERROR_BYPASS,
        }
    }
}

/// Error turning a validated configuration into running objects.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("{kind} {name:?} is not defined")]
    UnknownReference { kind: &'static str, name: String },
    #[error("matcher set {set:?}: invalid entry {entry:?}")]
    InvalidMatcher { set: String, entry: String },
    #[error("invalid listen address {0:?}")]
    InvalidAddress(String),
    #[error("unsupported record kind {0:?}")]
    UnsupportedRecord(String),
    #[error("service {name:?} has no forward targets")]
    NoTargets { name: String },
    #[error("bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

impl BuildError {
    pub fn error_type(&self) -> &'static str {
        match self {
            BuildError::Bind { .. } => ERROR_IO,
            _ => ERROR_CONFIG,
        }
    }
}

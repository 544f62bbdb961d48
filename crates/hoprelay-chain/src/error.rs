//! Error types for dialing and routing.

use std::io;
use std::time::Duration;

use hoprelay_core::{
    ERROR_BYPASS, ERROR_CANCELLED, ERROR_DIAL, ERROR_IO, ERROR_NO_NODE, ERROR_ROUTE,
    ERROR_TIMEOUT,
};
use thiserror::Error;

/// Failure to reach one node or one destination.
#[derive(Error, Debug)]
pub enum DialError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("connect timeout to {0}")]
    Timeout(String),

    #[error("cannot resolve {0}")]
    Resolve(String),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl DialError {
    pub fn error_type(&self) -> &'static str {
        match self {
            DialError::Io(_) => ERROR_IO,
            DialError::Timeout(_) => ERROR_TIMEOUT,
            DialError::Handshake(_) | DialError::Resolve(_) | DialError::Unsupported(_) => {
                ERROR_DIAL
            }
        }
    }
}

/// Errors produced by [`Router::route`](crate::Router::route).
#[derive(Error, Debug)]
pub enum RouteError {
    #[error("no eligible node at hop {hop}")]
    NoEligibleNode { hop: String },

    #[error("{addr} bypassed at hop {hop}")]
    Bypassed { hop: String, addr: String },

    #[error("route failed at hop {hop}: {cause}")]
    RouteFailed {
        hop: String,
        #[source]
        cause: DialError,
    },

    #[error("dial {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: DialError,
    },

    #[error("route cancelled")]
    Cancelled,

    #[error("route timed out after {0:?}")]
    Timeout(Duration),
}

impl RouteError {
    pub fn error_type(&self) -> &'static str {
        match self {
            RouteError::NoEligibleNode { .. } => ERROR_NO_NODE,
            RouteError::Bypassed { .. } => ERROR_BYPASS,
            RouteError::RouteFailed { .. } => ERROR_ROUTE,
            RouteError::Dial { source, .. } => source.error_type(),
            RouteError::Cancelled => ERROR_CANCELLED,
            RouteError::Timeout(_) => ERROR_TIMEOUT,
        }
    }
}

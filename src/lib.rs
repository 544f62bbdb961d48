//! # hoprelay
//!
//! A multi-hop proxy chain router with failure-aware node selection.
//!
//! ## Crates
//!
//! - [`hoprelay_core`] - Defaults, policy query traits, stream and datagram relays, buffer pool
//! - [`hoprelay_selector`] - Node selection strategies and failure tracking
//! - [`hoprelay_chain`] - Chain/hop/node model, dialers, connectors and the router
//! - [`hoprelay_config`] - Configuration loading and validation
//! - [`hoprelay_metrics`] - Prometheus-compatible metrics
//! - [`hoprelay_service`] - Listening services, handlers, matchers, limiters, recorders

pub use hoprelay_chain as chain;
pub use hoprelay_config as config;
pub use hoprelay_core as core;
pub use hoprelay_metrics as metrics;
pub use hoprelay_selector as selector;
pub use hoprelay_service as service;

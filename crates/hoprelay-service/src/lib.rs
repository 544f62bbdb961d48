//! Listening services for hoprelay.
//!
//! A [`Service`] accepts client connections, runs them past recorders,
//! admission and rate limiting, and hands the survivors to a [`Handler`]
//! on their own task. The built-in [`ForwardHandler`] routes each
//! connection through a chain with the multi-hop router and relays bytes,
//! or datagrams when the service listens with a [`UdpListener`].
//!
//! This crate also carries the policy engines behind the query traits of
//! `hoprelay-core`: [`MatcherSet`] for admission and bypass lists and
//! [`WindowRateLimiter`] for per-host limits.

pub mod builder;
pub mod cli;
pub mod error;
pub mod handler;
pub mod listener;
pub mod matcher;
pub mod rate_limit;
pub mod recorder;
pub mod service;
pub mod udp;

pub use builder::build_services;
pub use error::{BuildError, HandlerError, ServiceError};
pub use handler::{ForwardHandler, Handler, Target};
pub use listener::{AcceptError, Conn, Listener, TcpListener};
pub use matcher::MatcherSet;
pub use rate_limit::{WindowLimiter, WindowRateLimiter};
pub use recorder::{FileRecorder, RecordKind, Recorder, RecorderError, RecorderObject};
pub use service::{AcceptBackoff, ConnectionGuard, ConnectionTracker, Service, ServiceState};
pub use tokio_util::sync::CancellationToken;
pub use udp::UdpListener;

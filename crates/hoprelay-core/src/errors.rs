//! Error type constants for metrics and logging.
//!
//! These constants provide consistent error classification across all crates.

/// I/O error.
pub const ERROR_IO: &str = "io";
/// Timeout error.
pub const ERROR_TIMEOUT: &str = "timeout";
/// Configuration error.
pub const ERROR_CONFIG: &str = "config";
/// Transport dial or handshake error at a node.
pub const ERROR_DIAL: &str = "dial";
/// Destination or next hop matched a bypass rule.
pub const ERROR_BYPASS: &str = "bypass";
/// No eligible node left at a hop.
pub const ERROR_NO_NODE: &str = "no_node";
/// Route exhausted its attempts at a hop.
pub const ERROR_ROUTE: &str = "route";
/// Operation cancelled by its owner.
pub const ERROR_CANCELLED: &str = "cancelled";
/// Handler returned an error.
pub const ERROR_HANDLER: &str = "handler";
/// Recorder failed to persist an entry.
pub const ERROR_RECORDER: &str = "recorder";
/// Listener accept error.
pub const ERROR_ACCEPT: &str = "accept";

//! Default configuration values.
//!
//! Centralized default constants for use across all crates.

// ============================================================================
// Timeout Defaults
// ============================================================================

/// Default node dial timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
/// Default whole-route timeout in seconds (0 = no limit).
pub const DEFAULT_ROUTE_TIMEOUT_SECS: u64 = 0;
/// Default graceful shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Buffer/Size Defaults
// ============================================================================

/// Default relay buffer size (32 KiB, tuned for high-throughput relay chains).
pub const DEFAULT_RELAY_BUFFER_SIZE: usize = 32768;
/// Default datagram buffer size (one Ethernet MTU).
pub const DEFAULT_UDP_BUFFER_SIZE: usize = 1500;
/// Idle seconds after which a UDP session of a datagram service ends.
pub const DEFAULT_UDP_SESSION_TTL_SECS: u64 = 60;
/// Datagrams queued per UDP session; further ones are dropped until it drains.
pub const DEFAULT_UDP_SESSION_QUEUE: usize = 128;
/// Buffers kept per size class in the shared pool.
pub const DEFAULT_POOL_CLASS_CAPACITY: usize = 256;
/// Default TCP socket send buffer size (0 = OS default).
pub const DEFAULT_TCP_SEND_BUFFER: usize = 0;
/// Default TCP socket receive buffer size (0 = OS default).
pub const DEFAULT_TCP_RECV_BUFFER: usize = 0;
/// Upper bound on an HTTP CONNECT response header block.
pub const MAX_CONNECT_RESPONSE_BYTES: usize = 8192;

// ============================================================================
// TCP Socket Defaults
// ============================================================================

/// Default TCP_NODELAY (disable Nagle's algorithm for lower latency).
pub const DEFAULT_TCP_NO_DELAY: bool = true;
/// Default TCP listener backlog.
pub const DEFAULT_CONNECTION_BACKLOG: u32 = 1024;

// ============================================================================
// Accept Loop Defaults
// ============================================================================

/// First sleep after a transient accept error, in milliseconds.
pub const ACCEPT_BACKOFF_INITIAL_MS: u64 = 1000;
/// Upper bound on the accept backoff, in milliseconds.
pub const ACCEPT_BACKOFF_MAX_MS: u64 = 5000;

// ============================================================================
// Selector Defaults
// ============================================================================

/// Default consecutive failures before a node is taken out of rotation.
pub const DEFAULT_MAX_FAILS: u32 = 1;
/// Default probation window in seconds.
pub const DEFAULT_FAIL_TIMEOUT_SECS: u64 = 10;
/// Default strategy name.
pub const DEFAULT_SELECTOR_STRATEGY: &str = "round-robin";
/// Default dial attempts per hop before the route fails.
pub const DEFAULT_HOP_ATTEMPTS: usize = 3;

// ============================================================================
// Rate Limit Defaults
// ============================================================================

/// Default requests allowed per host per window.
pub const DEFAULT_RATE_LIMIT_REQUESTS: u32 = 10;
/// Default rate limit window in seconds.
pub const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;
/// Default rate limit cleanup interval in seconds.
pub const DEFAULT_RATE_LIMIT_CLEANUP_SECS: u64 = 300;

// ============================================================================
// Recorder Defaults
// ============================================================================

/// Default separator appended after each file recorder entry.
pub const DEFAULT_RECORDER_SEPARATOR: &str = "\n";

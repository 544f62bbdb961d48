//! Configuration type definitions.

use hoprelay_selector::Strategy;
use serde::{Deserialize, Serialize};

use crate::defaults::*;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
    #[serde(default)]
    pub chains: Vec<ChainConfig>,
    #[serde(default)]
    pub admissions: Vec<MatcherSetConfig>,
    #[serde(default)]
    pub bypasses: Vec<MatcherSetConfig>,
    #[serde(default)]
    pub limiters: Vec<LimiterConfig>,
    #[serde(default)]
    pub recorders: Vec<RecorderConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

/// One listening service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    /// Listen address, e.g. `0.0.0.0:8080`.
    pub addr: String,
    #[serde(default)]
    pub handler: HandlerConfig,
    /// Upstream targets of the `forward` handler.
    #[serde(default)]
    pub forwarder: Option<ForwarderConfig>,
    /// Chain the handler routes through; direct when unset.
    #[serde(default)]
    pub chain: Option<String>,
    #[serde(default)]
    pub admission: Option<String>,
    #[serde(default)]
    pub bypass: Option<String>,
    #[serde(default)]
    pub limiter: Option<String>,
    #[serde(default)]
    pub recorders: Vec<ServiceRecorderConfig>,
    /// TCP listener backlog (pending connections queue size).
    #[serde(default = "default_connection_backlog")]
    pub backlog: u32,
    #[serde(default)]
    pub network: ListenNetwork,
    /// Idle seconds before a UDP client session is dropped.
    #[serde(default = "default_udp_session_ttl_secs")]
    pub udp_ttl_secs: u64,
}

/// Transport a service listens on. A `udp` service demultiplexes datagrams
/// into one session per client address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenNetwork {
    #[default]
    Tcp,
    Udp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlerKind {
    Forward,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerConfig {
    #[serde(rename = "type", default = "default_handler_kind")]
    pub kind: HandlerKind,
    /// Nodes tried per hop before a route fails.
    #[serde(default = "default_hop_attempts")]
    pub retries: usize,
    /// Buffer size for the stream relay (bytes).
    #[serde(default = "default_relay_buffer_size")]
    pub relay_buffer_size: usize,
    /// Whole-route timeout in seconds (0 = no limit).
    #[serde(default = "default_route_timeout_secs")]
    pub route_timeout_secs: u64,
    /// Per-datagram buffer size of `udp` services (bytes).
    #[serde(default = "default_udp_buffer_size")]
    pub datagram_buffer_size: usize,
}

fn default_handler_kind() -> HandlerKind {
    HandlerKind::Forward
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            kind: default_handler_kind(),
            retries: default_hop_attempts(),
            relay_buffer_size: default_relay_buffer_size(),
            route_timeout_secs: default_route_timeout_secs(),
            datagram_buffer_size: default_udp_buffer_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwarderConfig {
    /// `host:port` destinations; one is chosen per connection.
    pub targets: Vec<String>,
    #[serde(default)]
    pub selector: SelectorConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorConfig {
    #[serde(default)]
    pub strategy: Strategy,
    /// Consecutive failures before a node is skipped (0 behaves as 1).
    #[serde(default = "default_max_fails")]
    pub max_fails: u32,
    /// Seconds a failed node sits out before it is retried.
    #[serde(default = "default_fail_timeout_secs")]
    pub fail_timeout_secs: u64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            max_fails: default_max_fails(),
            fail_timeout_secs: default_fail_timeout_secs(),
        }
    }
}

/// Which address hop bypass rules are checked against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BypassScope {
    #[default]
    Destination,
    NextHop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub name: String,
    #[serde(default)]
    pub bypass_target: BypassScope,
    #[serde(default)]
    pub hops: Vec<HopConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HopConfig {
    pub name: String,
    #[serde(default)]
    pub selector: SelectorConfig,
    #[serde(default)]
    pub bypass: Option<String>,
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Defaults to `addr` when empty.
    #[serde(default)]
    pub name: String,
    pub addr: String,
    #[serde(default)]
    pub bypass: Option<String>,
    #[serde(default)]
    pub connector: ConnectorConfig,
    #[serde(default)]
    pub dialer: DialerConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConnectorConfig {
    /// The node forwards to a fixed upstream; nothing to negotiate.
    #[default]
    Forward,
    /// HTTP CONNECT proxy.
    Http {
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        password: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DialerConfig {
    Tcp {
        #[serde(default = "default_connect_timeout_secs")]
        connect_timeout_secs: u64,
        #[serde(default = "default_tcp_no_delay")]
        no_delay: bool,
    },
}

impl Default for DialerConfig {
    fn default() -> Self {
        DialerConfig::Tcp {
            connect_timeout_secs: default_connect_timeout_secs(),
            no_delay: default_tcp_no_delay(),
        }
    }
}

/// Named set of address matchers used as an admission list or bypass list.
///
/// Matchers are IPs, CIDRs, domains, `*.suffix` / `.suffix` wildcards, or
/// any of those with a `:port` suffix. With `whitelist = true` the set
/// matches everything that none of the matchers match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatcherSetConfig {
    pub name: String,
    #[serde(default)]
    pub whitelist: bool,
    #[serde(default)]
    pub matchers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    pub name: String,
    /// Requests allowed per host within one window.
    #[serde(default = "default_rate_limit_requests")]
    pub requests: u32,
    #[serde(default = "default_rate_limit_window_secs")]
    pub window_secs: u64,
    /// Cleanup interval in seconds for expired entries.
    #[serde(default = "default_rate_limit_cleanup_secs")]
    pub cleanup_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderConfig {
    pub name: String,
    pub file: FileRecorderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecorderConfig {
    pub path: String,
    #[serde(default = "default_recorder_separator")]
    pub separator: String,
}

/// Attachment of a named recorder to a service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRecorderConfig {
    pub name: String,
    /// What to record; only `client-address` is supported.
    #[serde(default = "default_record_kind")]
    pub record: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MetricsConfig {
    pub listen: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    pub level: Option<String>,
    /// `text` (default) or `json`.
    pub format: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// Seconds to wait for in-flight connections after the listeners close.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

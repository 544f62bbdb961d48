//! Default value functions for serde deserialization.
//!
//! These functions forward to constants defined in `hoprelay_core::defaults`.

use hoprelay_core::defaults;

/// Generate default value functions that forward to hoprelay_core::defaults constants.
macro_rules! default_fns {
    // For Copy types (integers, bool, etc.)
    ($($fn_name:ident => $const_name:ident : $ty:ty),* $(,)?) => {
        $(
            pub(crate) fn $fn_name() -> $ty {
                defaults::$const_name
            }
        )*
    };
}

/// Generate default value functions that return String from &str constants.
macro_rules! default_string_fns {
    ($($fn_name:ident => $const_name:ident),* $(,)?) => {
        $(
            pub(crate) fn $fn_name() -> String {
                defaults::$const_name.to_string()
            }
        )*
    };
}

default_fns! {
    default_connect_timeout_secs    => DEFAULT_CONNECT_TIMEOUT_SECS: u64,
    default_route_timeout_secs      => DEFAULT_ROUTE_TIMEOUT_SECS: u64,
    default_relay_buffer_size       => DEFAULT_RELAY_BUFFER_SIZE: usize,
    default_udp_buffer_size         => DEFAULT_UDP_BUFFER_SIZE: usize,
    default_udp_session_ttl_secs    => DEFAULT_UDP_SESSION_TTL_SECS: u64,
    default_connection_backlog      => DEFAULT_CONNECTION_BACKLOG: u32,
    default_max_fails               => DEFAULT_MAX_FAILS: u32,
    default_fail_timeout_secs       => DEFAULT_FAIL_TIMEOUT_SECS: u64,
    default_hop_attempts            => DEFAULT_HOP_ATTEMPTS: usize,
    default_rate_limit_requests     => DEFAULT_RATE_LIMIT_REQUESTS: u32,
    default_rate_limit_window_secs  => DEFAULT_RATE_LIMIT_WINDOW_SECS: u64,
    default_rate_limit_cleanup_secs => DEFAULT_RATE_LIMIT_CLEANUP_SECS: u64,
    default_shutdown_timeout_secs   => DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64,
    default_tcp_no_delay            => DEFAULT_TCP_NO_DELAY: bool,
}

default_string_fns! {
    default_recorder_separator => DEFAULT_RECORDER_SEPARATOR,
}

pub(crate) fn default_record_kind() -> String {
    "client-address".to_string()
}

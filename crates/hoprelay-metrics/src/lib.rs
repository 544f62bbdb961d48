//! Metrics collection and Prometheus exporter for hoprelay.
//!
//! Everything is recorded through the process-wide `metrics` facade, so the
//! recording functions are cheap no-ops until [`init_prometheus`] installs
//! an exporter.

use std::net::SocketAddr;
use std::sync::Arc;

use hoprelay_core::io::{PacketMetrics, RelayMetrics};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Initialize Prometheus metrics exporter.
///
/// Starts an HTTP server on the given address to expose metrics.
/// Returns an error message if binding fails.
pub fn init_prometheus(listen: &str) -> Result<(), String> {
    let addr: SocketAddr = listen
        .parse()
        .map_err(|e| format!("invalid metrics listen address: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("failed to install prometheus exporter: {}", e))?;

    Ok(())
}

// ============================================================================
// Metric Names
// ============================================================================

/// Number of services currently serving.
pub const SERVICES_ACTIVE: &str = "hoprelay_services";
/// Total connections dispatched to a handler, by service.
pub const REQUESTS_TOTAL: &str = "hoprelay_requests_total";
/// Connections currently inside a handler, by service.
pub const REQUESTS_IN_FLIGHT: &str = "hoprelay_requests_in_flight";
/// Handler errors, by service.
pub const HANDLER_ERRORS_TOTAL: &str = "hoprelay_handler_errors_total";
/// Handler duration histogram (seconds), by service.
pub const REQUEST_DURATION_SECONDS: &str = "hoprelay_request_duration_seconds";
/// Connections closed before reaching a handler (reason: admission, rate_limit).
pub const CONNECTIONS_REJECTED_TOTAL: &str = "hoprelay_connections_rejected_total";
/// Listener accept errors (kind: transient, fatal).
pub const ACCEPT_ERRORS_TOTAL: &str = "hoprelay_accept_errors_total";
/// Failed routes, by error type.
pub const ROUTE_ERRORS_TOTAL: &str = "hoprelay_route_errors_total";
/// Node dial failures reported to selectors, by hop.
pub const NODE_FAILURES_TOTAL: &str = "hoprelay_node_failures_total";
/// Relayed stream bytes, by service and direction.
pub const RELAY_BYTES_TOTAL: &str = "hoprelay_relay_bytes_total";
/// Datagrams seen by packet relays (outcome: forwarded, bypassed, consumed).
pub const DATAGRAMS_TOTAL: &str = "hoprelay_datagrams_total";
/// Datagram bytes forwarded.
pub const DATAGRAM_BYTES_TOTAL: &str = "hoprelay_datagram_bytes_total";
/// Recorder write failures, by recorder.
pub const RECORDER_ERRORS_TOTAL: &str = "hoprelay_recorder_errors_total";

// ============================================================================
// Metric Recording Functions
// ============================================================================

#[inline]
pub fn record_service_started() {
    gauge!(SERVICES_ACTIVE).increment(1.0);
}

#[inline]
pub fn record_service_stopped() {
    gauge!(SERVICES_ACTIVE).decrement(1.0);
}

/// Record a connection handed to the handler of `service`.
#[inline]
pub fn record_request_started(service: &str) {
    counter!(REQUESTS_TOTAL, "service" => service.to_owned()).increment(1);
    gauge!(REQUESTS_IN_FLIGHT, "service" => service.to_owned()).increment(1.0);
}

/// Record the handler of `service` returning.
#[inline]
pub fn record_request_finished(service: &str, duration_secs: f64) {
    gauge!(REQUESTS_IN_FLIGHT, "service" => service.to_owned()).decrement(1.0);
    histogram!(REQUEST_DURATION_SECONDS, "service" => service.to_owned()).record(duration_secs);
}

#[inline]
pub fn record_handler_error(service: &str) {
    counter!(HANDLER_ERRORS_TOTAL, "service" => service.to_owned()).increment(1);
}

/// Record a rejected connection (reason: "admission", "rate_limit").
#[inline]
pub fn record_connection_rejected(service: &str, reason: &'static str) {
    counter!(CONNECTIONS_REJECTED_TOTAL, "service" => service.to_owned(), "reason" => reason)
        .increment(1);
}

/// Record an accept error (kind: "transient", "fatal").
#[inline]
pub fn record_accept_error(service: &str, kind: &'static str) {
    counter!(ACCEPT_ERRORS_TOTAL, "service" => service.to_owned(), "kind" => kind).increment(1);
}

/// Record a failed route by error type.
#[inline]
pub fn record_route_error(error_type: &'static str) {
    counter!(ROUTE_ERRORS_TOTAL, "type" => error_type).increment(1);
}

#[inline]
pub fn record_node_failure(hop: &str) {
    counter!(NODE_FAILURES_TOTAL, "hop" => hop.to_owned()).increment(1);
}

/// Record relayed stream bytes. Direction: "upstream" or "downstream".
#[inline]
pub fn record_relay_bytes(service: &str, direction: &'static str, bytes: u64) {
    counter!(RELAY_BYTES_TOTAL, "service" => service.to_owned(), "direction" => direction)
        .increment(bytes);
}

/// Record a datagram outcome (outcome: "forwarded", "bypassed", "consumed").
#[inline]
pub fn record_datagram(outcome: &'static str) {
    counter!(DATAGRAMS_TOTAL, "outcome" => outcome).increment(1);
}

#[inline]
pub fn record_datagram_bytes(bytes: u64) {
    counter!(DATAGRAM_BYTES_TOTAL).increment(bytes);
}

#[inline]
pub fn record_recorder_error(recorder: &str) {
    counter!(RECORDER_ERRORS_TOTAL, "recorder" => recorder.to_owned()).increment(1);
}

// ============================================================================
// Relay adapters
// ============================================================================

/// [`RelayMetrics`] implementation that records bytes under a service label.
///
/// The label string is created once per session and cloned into the
/// counter key on each flush.
#[derive(Debug, Clone)]
pub struct ServiceRelayMetrics {
    service: Arc<str>,
}

impl ServiceRelayMetrics {
    pub fn new(service: &str) -> Self {
        Self {
            service: Arc::from(service),
        }
    }
}

impl RelayMetrics for ServiceRelayMetrics {
    fn record_inbound(&self, bytes: u64) {
        record_relay_bytes(&self.service, "upstream", bytes);
    }

    fn record_outbound(&self, bytes: u64) {
        record_relay_bytes(&self.service, "downstream", bytes);
    }
}

/// [`PacketMetrics`] implementation backed by the datagram counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct DatagramMetrics;

impl PacketMetrics for DatagramMetrics {
    fn record_forwarded(&self, bytes: u64) {
        record_datagram("forwarded");
        record_datagram_bytes(bytes);
    }

    fn record_bypassed(&self) {
        record_datagram("bypassed");
    }

    fn record_consumed(&self) {
        record_datagram("consumed");
    }
}

// ============================================================================
// Error Type Constants (re-exported from hoprelay-core)
// ============================================================================

pub use hoprelay_core::{
    ERROR_ACCEPT, ERROR_BYPASS, ERROR_CANCELLED, ERROR_CONFIG, ERROR_DIAL, ERROR_HANDLER,
    ERROR_IO, ERROR_NO_NODE, ERROR_RECORDER, ERROR_ROUTE, ERROR_TIMEOUT,
};

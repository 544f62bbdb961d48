//! Query interfaces for the policy engines consulted on the data path.
//!
//! Matching engines live elsewhere; relay, router and service code only
//! needs these narrow questions answered.

use std::sync::Arc;

/// Answers whether an address must not be proxied.
pub trait Bypass: Send + Sync {
    /// `addr` is `host`, `host:port` or `[v6]:port`.
    fn contains(&self, addr: &str) -> bool;
}

/// Answers whether a client address may use a service at all.
pub trait Admission: Send + Sync {
    fn admit(&self, addr: &str) -> bool;
}

/// A single token bucket or window for one key.
pub trait Limiter: Send + Sync {
    /// Try to consume `n` units. Returns `false` when the budget is spent.
    fn allow(&self, n: usize) -> bool;
}

/// Hands out the limiter for a host, or `None` when the host is unlimited.
pub trait RateLimiter: Send + Sync {
    fn limiter(&self, host: &str) -> Option<Arc<dyn Limiter>>;
}

impl<T: Bypass + ?Sized> Bypass for Arc<T> {
    fn contains(&self, addr: &str) -> bool {
        (**self).contains(addr)
    }
}

impl<T: Admission + ?Sized> Admission for Arc<T> {
    fn admit(&self, addr: &str) -> bool {
        (**self).admit(addr)
    }
}

/// Strip the port (and IPv6 brackets) from an address.
///
/// Bare hosts and bare IPv6 literals are returned unchanged.
pub fn host_of(addr: &str) -> &str {
    if let Some(rest) = addr.strip_prefix('[') {
        return match rest.find(']') {
            Some(end) => &rest[..end],
            None => addr,
        };
    }
    match addr.rsplit_once(':') {
        // More than one colon without brackets is a bare IPv6 literal.
        Some((host, _)) if !host.contains(':') => host,
        _ => addr,
    }
}

//! Per-node failure bookkeeping.
//!
//! A node stays eligible while its consecutive failure count is below
//! `max_fails`. Once it reaches the limit it is skipped until `fail_timeout`
//! has elapsed since its last failure; after that it is tried again on
//! probation with the counter kept, so a single further failure sidelines it
//! for another full window. Any success clears the record.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Source of "now" for failure bookkeeping.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

/// Wall clock backed by [`Instant::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

/// Failure record of one node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailMarker {
    pub failures: u32,
    pub last_failure: Option<Instant>,
}

/// Failure records keyed by node identity.
pub struct FailureTable {
    markers: Mutex<HashMap<String, FailMarker>>,
    clock: Arc<dyn Clock>,
}

impl FailureTable {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            markers: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Count one more consecutive failure. Returns the new count.
    pub fn mark_failure(&self, id: &str) -> u32 {
        let now = self.clock.now();
        let mut markers = self.markers.lock();
        let marker = markers.entry(id.to_string()).or_default();
        marker.failures = marker.failures.saturating_add(1);
        marker.last_failure = Some(now);
        marker.failures
    }

    pub fn mark_success(&self, id: &str) {
        self.markers.lock().remove(id);
    }

    pub fn marker(&self, id: &str) -> FailMarker {
        self.markers.lock().get(id).copied().unwrap_or_default()
    }

    pub fn is_eligible(&self, id: &str, max_fails: u32, fail_timeout: Duration) -> bool {
        let marker = match self.markers.lock().get(id) {
            Some(m) => *m,
            None => return true,
        };
        if marker.failures < max_fails {
            return true;
        }
        match marker.last_failure {
            Some(at) => self.clock.now().saturating_duration_since(at) >= fail_timeout,
            None => true,
        }
    }
}

impl Default for FailureTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FailureTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailureTable")
            .field("tracked", &self.markers.lock().len())
            .finish()
    }
}

//! Per-host fixed-window rate limiting.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use hoprelay_core::{Limiter, RateLimiter};
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

/// Fixed-window counter for one host.
pub struct WindowLimiter {
    requests: u32,
    window: Duration,
    state: Mutex<WindowState>,
}

struct WindowState {
    count: u32,
    window_start: Instant,
}

impl WindowLimiter {
    pub fn new(requests: u32, window: Duration) -> Self {
        Self {
            requests,
            window,
            state: Mutex::new(WindowState {
                count: 0,
                window_start: Instant::now(),
            }),
        }
    }

    fn expired(&self, now: Instant) -> bool {
        now.duration_since(self.state.lock().window_start) >= self.window
    }
}

impl Limiter for WindowLimiter {
    fn allow(&self, n: usize) -> bool {
        let n = u32::try_from(n).unwrap_or(u32::MAX);
        let now = Instant::now();
        let mut state = self.state.lock();

        if now.duration_since(state.window_start) >= self.window {
            state.count = 0;
            state.window_start = now;
        }
        match state.count.checked_add(n) {
            Some(total) if total <= self.requests => {
                state.count = total;
                true
            }
            _ => false,
        }
    }
}

/// Rate limiter that hands out one [`WindowLimiter`] per host.
pub struct WindowRateLimiter {
    entries: Arc<RwLock<HashMap<String, Arc<WindowLimiter>>>>,
    requests: u32,
    window: Duration,
    shutdown: Arc<Notify>,
}

impl WindowRateLimiter {
    /// Allow `requests` per host within each `window`.
    pub fn new(requests: u32, window: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            requests,
            window,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Start the background task that drops hosts whose window has expired.
    pub fn start_cleanup_task(&self, cleanup_interval: Duration) {
        let entries = Arc::clone(&self.entries);
        let shutdown = Arc::clone(&self.shutdown);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.notified() => {
                        debug!("rate limiter cleanup task shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(cleanup_interval) => {
                        let removed = sweep(&entries);
                        if removed > 0 {
                            debug!(
                                removed,
                                remaining = entries.read().len(),
                                "rate limit entries cleaned up"
                            );
                        }
                    }
                }
            }
        });
    }

    /// Number of hosts currently tracked.
    pub fn tracked(&self) -> usize {
        self.entries.read().len()
    }

    /// Drop expired entries now. Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        sweep(&self.entries)
    }

    /// Signal shutdown to cleanup task.
    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }
}

fn sweep(entries: &RwLock<HashMap<String, Arc<WindowLimiter>>>) -> usize {
    let now = Instant::now();
    let mut map = entries.write();
    let before = map.len();
    map.retain(|_, limiter| !limiter.expired(now));
    before - map.len()
}

impl RateLimiter for WindowRateLimiter {
    fn limiter(&self, host: &str) -> Option<Arc<dyn Limiter>> {
        if let Some(limiter) = self.entries.read().get(host) {
            return Some(Arc::clone(limiter) as Arc<dyn Limiter>);
        }
        let mut map = self.entries.write();
        let limiter = map
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(WindowLimiter::new(self.requests, self.window)));
        Some(Arc::clone(limiter) as Arc<dyn Limiter>)
    }
}

impl Drop for WindowRateLimiter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

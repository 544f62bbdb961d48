//! Accept loop of a listening service.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::time::Duration;

use hoprelay_chain::DialContext;
use hoprelay_core::io::PacketHook;
use hoprelay_core::{
    ACCEPT_BACKOFF_INITIAL_MS, ACCEPT_BACKOFF_MAX_MS, Admission, RateLimiter,
};
use hoprelay_metrics::{
    record_accept_error, record_connection_rejected, record_handler_error,
    record_recorder_error, record_request_finished, record_request_started,
    record_service_started, record_service_stopped,
};
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::error::ServiceError;
use crate::handler::Handler;
use crate::listener::{AcceptError, Conn, Listener};
use crate::recorder::{RecordKind, RecorderObject};

const STATE_CREATED: u8 = 0;
const STATE_SERVING: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// Lifecycle of a [`Service`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Created,
    Serving,
    Closed,
}

/// Delay schedule for transient accept errors: 1s, doubling, capped at 5s.
#[derive(Debug, Clone)]
pub struct AcceptBackoff {
    current: Option<Duration>,
    initial: Duration,
    max: Duration,
}

impl AcceptBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            current: None,
            initial,
            max,
        }
    }

    /// The delay to wait before the next accept.
    pub fn next_delay(&mut self) -> Duration {
        let delay = match self.current {
            None => self.initial,
            Some(d) => (d * 2).min(self.max),
        };
        self.current = Some(delay);
        delay
    }

    pub fn reset(&mut self) {
        self.current = None;
    }
}

impl Default for AcceptBackoff {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(ACCEPT_BACKOFF_INITIAL_MS),
            Duration::from_millis(ACCEPT_BACKOFF_MAX_MS),
        )
    }
}

/// Tracks active connections for graceful shutdown.
#[derive(Clone)]
pub struct ConnectionTracker {
    active: Arc<AtomicUsize>,
    zero_notify: Arc<Notify>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self {
            active: Arc::new(AtomicUsize::new(0)),
            zero_notify: Arc::new(Notify::new()),
        }
    }

    pub fn increment(&self) {
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement(&self) {
        if self.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.zero_notify.notify_waiters();
        }
    }

    pub fn count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Wait until no connection is active. Returns `false` on timeout.
    pub async fn wait_for_zero(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.zero_notify.notified();
            if self.count() == 0 {
                return true;
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => return self.count() == 0,
            }
        }
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that decrements connection count on drop.
pub struct ConnectionGuard {
    tracker: ConnectionTracker,
}

impl ConnectionGuard {
    pub fn new(tracker: ConnectionTracker) -> Self {
        tracker.increment();
        Self { tracker }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.tracker.decrement();
    }
}

/// A listener plus the handler and policies applied to what it accepts.
pub struct Service {
    name: String,
    listener: Arc<dyn Listener>,
    handler: Arc<dyn Handler>,
    admission: Option<Arc<dyn Admission>>,
    limiter: Option<Arc<dyn RateLimiter>>,
    recorders: Vec<RecorderObject>,
    hook: Option<Arc<dyn PacketHook>>,
    state: AtomicU8,
    shutdown: CancellationToken,
    tracker: ConnectionTracker,
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Service {
    pub fn new(
        name: impl Into<String>,
        listener: Arc<dyn Listener>,
        handler: Arc<dyn Handler>,
    ) -> Self {
        Self {
            name: name.into(),
            listener,
            handler,
            admission: None,
            limiter: None,
            recorders: Vec::new(),
            hook: None,
            state: AtomicU8::new(STATE_CREATED),
            shutdown: CancellationToken::new(),
            tracker: ConnectionTracker::new(),
        }
    }

    pub fn with_admission(mut self, admission: Arc<dyn Admission>) -> Self {
        self.admission = Some(admission);
        self
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn with_recorder(mut self, recorder: RecorderObject) -> Self {
        self.recorders.push(recorder);
        self
    }

    /// Packet hook owned by this service; closed together with it.
    pub fn with_packet_hook(mut self, hook: Arc<dyn PacketHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Share the in-flight tracker, e.g. to drain several services at once.
    pub fn with_tracker(mut self, tracker: ConnectionTracker) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn listener(&self) -> &Arc<dyn Listener> {
        &self.listener
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    pub fn state(&self) -> ServiceState {
        match self.state.load(Ordering::Acquire) {
            STATE_CREATED => ServiceState::Created,
            STATE_SERVING => ServiceState::Serving,
            _ => ServiceState::Closed,
        }
    }

    /// Run the accept loop until the service is closed or the listener fails.
    ///
    /// Transient accept errors are retried after a growing delay. A fatal
    /// accept error closes the service and is returned.
    pub async fn serve(&self) -> Result<(), ServiceError> {
        match self.state.compare_exchange(
            STATE_CREATED,
            STATE_SERVING,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {}
            Err(STATE_SERVING) => return Err(ServiceError::AlreadyServing(self.name.clone())),
            Err(_) => return Err(ServiceError::Closed(self.name.clone())),
        }

        record_service_started();
        match self.listener.local_addr() {
            Ok(addr) => info!(service = %self.name, address = %addr, "listening"),
            Err(_) => info!(service = %self.name, "listening"),
        }

        let result = self.accept_loop().await;

        self.close();
        record_service_stopped();
        info!(service = %self.name, "service stopped");
        result
    }

    async fn accept_loop(&self) -> Result<(), ServiceError> {
        let mut backoff = AcceptBackoff::default();

        loop {
            let accepted = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Ok(()),
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok(conn) => {
                    backoff.reset();
                    self.dispatch(conn).await;
                }
                Err(AcceptError::Closed) => return Ok(()),
                Err(AcceptError::Transient(e)) => {
                    record_accept_error(&self.name, "transient");
                    let delay = backoff.next_delay();
                    warn!(
                        service = %self.name,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "accept failed, backing off"
                    );
                    tokio::select! {
                        biased;
                        _ = self.shutdown.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(AcceptError::Fatal(e)) => {
                    record_accept_error(&self.name, "fatal");
                    error!(service = %self.name, error = %e, "accept failed");
                    return Err(ServiceError::Accept(e));
                }
            }
        }
    }

    async fn dispatch(&self, conn: Conn) {
        let peer = conn.peer;
        let host = peer.ip().to_string();

        for rec in &self.recorders {
            match rec.kind {
                RecordKind::ClientAddress => {
                    if let Err(e) = rec.recorder.record(host.as_bytes()).await {
                        record_recorder_error(&rec.name);
                        warn!(
                            service = %self.name,
                            recorder = %rec.name,
                            error = %e,
                            "record failed"
                        );
                    }
                }
            }
        }

        if let Some(admission) = &self.admission
            && !admission.admit(&peer.to_string())
        {
            debug!(
                service = %self.name,
                peer = %peer,
                reason = "admission",
                "connection rejected"
            );
            record_connection_rejected(&self.name, "admission");
            return;
        }

        if let Some(limiter) = self.limiter.as_ref().and_then(|rl| rl.limiter(&host))
            && !limiter.allow(1)
        {
            debug!(
                service = %self.name,
                peer = %peer,
                reason = "rate_limit",
                "connection rejected"
            );
            record_connection_rejected(&self.name, "rate_limit");
            return;
        }

        debug!(service = %self.name, peer = %peer, "new connection");

        let name = self.name.clone();
        let handler = Arc::clone(&self.handler);
        let guard = ConnectionGuard::new(self.tracker.clone());
        let ctx = DialContext::new().with_hash_source(host);
        let span = info_span!("conn", service = %name, peer = %peer);

        tokio::spawn(
            async move {
                let _guard = guard;
                record_request_started(&name);
                let start = Instant::now();

                let result = handler.handle(ctx, conn).await;

                let duration_secs = start.elapsed().as_secs_f64();
                record_request_finished(&name, duration_secs);
                match result {
                    Ok(()) => debug!(duration_secs, "connection closed"),
                    Err(e) => {
                        record_handler_error(&name);
                        warn!(
                            duration_secs,
                            error = %e,
                            error_type = e.error_type(),
                            "handler failed"
                        );
                    }
                }
            }
            .instrument(span),
        );
    }

    /// Stop accepting and release the listener and packet hook.
    ///
    /// Connections already handed to the handler keep running.
    pub fn close(&self) {
        self.state.store(STATE_CLOSED, Ordering::Release);
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        self.listener.close();
        if let Some(hook) = &self.hook {
            hook.close();
        }
        debug!(service = %self.name, "service closed");
    }
}

impl Drop for Service {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_schedule() {
        let mut b = AcceptBackoff::default();
        let secs: Vec<u64> = (0..5).map(|_| b.next_delay().as_secs()).collect();
        assert_eq!(secs, vec![1, 2, 4, 5, 5]);

        b.reset();
        assert_eq!(b.next_delay(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn tracker_waits_for_zero() {
        let tracker = ConnectionTracker::new();
        let guard = ConnectionGuard::new(tracker.clone());
        assert_eq!(tracker.count(), 1);

        assert!(!tracker.wait_for_zero(Duration::from_secs(1)).await);

        let waiter = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.wait_for_zero(Duration::from_secs(30)).await })
        };
        tokio::task::yield_now().await;
        drop(guard);
        assert!(waiter.await.unwrap());
        assert_eq!(tracker.count(), 0);
    }
}

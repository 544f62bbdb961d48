//! Connection handlers.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use hoprelay_chain::{Chain, DialContext, Network, RouteError, Router};
use hoprelay_core::io::{BoxStream, PacketHook, PacketRelay, StreamEndpoint, forward};
use hoprelay_core::{Bypass, DEFAULT_UDP_BUFFER_SIZE};
use hoprelay_metrics::{DatagramMetrics, ServiceRelayMetrics};
use hoprelay_selector::{Selectable, Selector};
use tracing::{debug, warn};

use crate::error::HandlerError;
use crate::listener::Conn;

/// Serves one admitted connection. The handler owns closing it.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: DialContext, conn: Conn) -> Result<(), HandlerError>;
}

/// A fixed upstream of the forward handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    addr: String,
}

impl Target {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl Selectable for Target {
    fn id(&self) -> &str {
        &self.addr
    }
}

/// Port forwarder: routes every connection to one of a fixed set of targets
/// through a chain and relays bytes both ways.
///
/// Over [`Network::Udp`] the client connection is a datagram session (see
/// [`UdpListener`](crate::UdpListener)) and the upstream is a routed UDP
/// stream; datagrams are relayed with a [`PacketRelay`] until either side
/// fails or the session goes idle.
pub struct ForwardHandler {
    service: String,
    targets: Vec<Target>,
    selector: Selector,
    chain: Arc<Chain>,
    router: Router,
    bypass: Option<Arc<dyn Bypass>>,
    network: Network,
    hook: Option<Arc<dyn PacketHook>>,
    retries: usize,
    buffer_size: usize,
    datagram_buffer_size: usize,
    metrics: ServiceRelayMetrics,
}

impl ForwardHandler {
    pub fn new(
        service: impl Into<String>,
        targets: Vec<Target>,
        selector: Selector,
        chain: Arc<Chain>,
        router: Router,
    ) -> Self {
        let service = service.into();
        let metrics = ServiceRelayMetrics::new(&service);
        Self {
            service,
            targets,
            selector,
            chain,
            router,
            bypass: None,
            network: Network::Tcp,
            hook: None,
            retries: 1,
            buffer_size: hoprelay_core::DEFAULT_RELAY_BUFFER_SIZE,
            datagram_buffer_size: DEFAULT_UDP_BUFFER_SIZE,
            metrics,
        }
    }

    /// Destinations matching `bypass` are refused.
    pub fn with_bypass(mut self, bypass: Arc<dyn Bypass>) -> Self {
        self.bypass = Some(bypass);
        self
    }

    /// Number of targets tried per connection. 0 is treated as 1.
    pub fn with_retries(mut self, retries: usize) -> Self {
        self.retries = retries.max(1);
        self
    }

    /// Network the targets are reached over.
    pub fn with_network(mut self, network: Network) -> Self {
        self.network = network;
        self
    }

    /// Hook run on client-to-target datagrams. UDP only.
    pub fn with_hook(mut self, hook: Arc<dyn PacketHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        if size > 0 {
            self.buffer_size = size;
        }
        self
    }

    /// Per-datagram buffer size; 0 keeps the MTU-sized default.
    pub fn with_datagram_buffer_size(mut self, size: usize) -> Self {
        if size > 0 {
            self.datagram_buffer_size = size;
        }
        self
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    async fn connect(
        &self,
        ctx: &DialContext,
    ) -> Result<(BoxStream, &Target), HandlerError> {
        let mut tried: Vec<&Target> = Vec::new();
        let mut last: Option<HandlerError> = None;

        while tried.len() < self.retries {
            let candidates: Vec<&Target> = self
                .targets
                .iter()
                .filter(|t| !tried.contains(t))
                .collect();
            if candidates.is_empty() {
                break;
            }
            let target = match self.selector.select(&candidates, ctx.hash_source()) {
                Ok(t) => *t,
                Err(e) => {
                    last.get_or_insert(HandlerError::Target(e));
                    break;
                }
            };
            tried.push(target);

            if let Some(bypass) = &self.bypass
                && bypass.contains(target.addr())
            {
                debug!(service = %self.service, upstream = target.addr(), "target bypassed");
                last = Some(HandlerError::Bypassed(target.addr().to_string()));
                continue;
            }

            match self
                .router
                .route(ctx, self.network, target.addr(), &self.chain)
                .await
            {
                Ok(stream) => {
                    self.selector.mark_success(target.id());
                    return Ok((stream, target));
                }
                // A bypass or an exhausted hop says nothing about the target.
                Err(e @ (RouteError::Cancelled
                | RouteError::Bypassed { .. }
                | RouteError::NoEligibleNode { .. })) => return Err(e.into()),
                Err(e) => {
                    warn!(
                        service = %self.service,
                        upstream = target.addr(),
                        error = %e,
                        "forward target unreachable"
                    );
                    self.selector.mark_failure(target.id());
                    last = Some(e.into());
                }
            }
        }

        Err(last.unwrap_or_else(|| {
            HandlerError::Target(hoprelay_selector::SelectError::NoEligibleNode {
                candidates: self.targets.len(),
            })
        }))
    }

    async fn relay_datagrams(
        &self,
        conn: Conn,
        upstream: BoxStream,
        target: &Target,
    ) -> io::Result<()> {
        // Upstream datagrams carry the target address when it is a literal
        // one, so hooks and logs see where they came from.
        let unspecified = SocketAddr::from(([0, 0, 0, 0], 0));
        let remote = target.addr().parse().unwrap_or(unspecified);
        let client = Arc::new(StreamEndpoint::new(conn.stream, conn.local, conn.peer));
        let upstream = Arc::new(StreamEndpoint::new(upstream, unspecified, remote));

        let mut relay = PacketRelay::new(client, upstream)
            .with_buffer_size(self.datagram_buffer_size)
            .with_metrics(Arc::new(DatagramMetrics));
        if let Some(hook) = &self.hook {
            relay = relay.with_hook(Arc::clone(hook));
        }
        match relay.run().await {
            // Idle timeout and a closed session are the normal ends.
            Err(e) if is_session_end(&e) => Ok(()),
            result => result,
        }
    }
}

fn is_session_end(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::UnexpectedEof
    )
}

#[async_trait]
impl Handler for ForwardHandler {
    async fn handle(&self, ctx: DialContext, conn: Conn) -> Result<(), HandlerError> {
        let (upstream, target) = self.connect(&ctx).await?;
        let peer = conn.peer;
        debug!(
            service = %self.service,
            %peer,
            upstream = target.addr(),
            network = %self.network,
            "forwarding"
        );

        let relay = async {
            match self.network {
                Network::Tcp => {
                    forward(conn.stream, upstream, self.buffer_size, &self.metrics).await
                }
                Network::Udp => self.relay_datagrams(conn, upstream, target).await,
            }
        };
        let result = tokio::select! {
            biased;
            _ = ctx.cancel_token().cancelled() => Ok(()),
            result = relay => result,
        };
        if let Err(e) = result {
            debug!(service = %self.service, %peer, error = %e, "relay ended with error");
        }
        Ok(())
    }
}

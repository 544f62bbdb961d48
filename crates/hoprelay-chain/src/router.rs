//! Multi-hop router.
//!
//! Walks a [`Chain`] hop by hop. At each hop it selects a node, applies
//! the bypass rules, and extends the tunnel to that node. A failed node is
//! reported to the hop's selector and another node of the same hop is
//! tried; failures never move the route back to an earlier hop.

use std::sync::Arc;
use std::time::Duration;

use hoprelay_core::DEFAULT_HOP_ATTEMPTS;
use hoprelay_core::io::BoxStream;
use tracing::{debug, warn};

use crate::context::DialContext;
use crate::error::{DialError, RouteError};
use crate::node::{BypassTarget, Chain, Hop, Node};
use crate::transport::{self, Network};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterOptions {
    /// Nodes tried per hop before the route fails. 0 is treated as 1.
    pub attempts_per_hop: usize,
    /// Upper bound on the whole route, `None` for no limit.
    pub timeout: Option<Duration>,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            attempts_per_hop: DEFAULT_HOP_ATTEMPTS,
            timeout: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Router {
    options: RouterOptions,
}

impl Router {
    pub fn new(mut options: RouterOptions) -> Self {
        options.attempts_per_hop = options.attempts_per_hop.max(1);
        Self { options }
    }

    pub fn options(&self) -> &RouterOptions {
        &self.options
    }

    /// Open a stream to `addr` over `network` through `chain`.
    ///
    /// Cancelling the context's token aborts the dial in progress and drops
    /// every leg built so far.
    pub async fn route(
        &self,
        ctx: &DialContext,
        network: Network,
        addr: &str,
        chain: &Chain,
    ) -> Result<BoxStream, RouteError> {
        let dial = self.dial_chain(ctx, network, addr, chain);
        let bounded = async {
            match self.options.timeout {
                Some(limit) => match tokio::time::timeout(limit, dial).await {
                    Ok(result) => result,
                    Err(_) => Err(RouteError::Timeout(limit)),
                },
                None => dial.await,
            }
        };

        let result = tokio::select! {
            biased;
            _ = ctx.cancel_token().cancelled() => Err(RouteError::Cancelled),
            result = bounded => result,
        };

        if let Err(e) = &result {
            hoprelay_metrics::record_route_error(e.error_type());
            debug!(chain = chain.name(), %network, addr, error = %e, "route failed");
        }
        result
    }

    async fn dial_chain(
        &self,
        ctx: &DialContext,
        network: Network,
        addr: &str,
        chain: &Chain,
    ) -> Result<BoxStream, RouteError> {
        if chain.is_empty() {
            debug!(%network, addr, "dialing directly");
            return transport::dial_direct(network, addr)
                .await
                .map_err(|source| RouteError::Dial {
                    addr: addr.to_string(),
                    source,
                });
        }

        let hops = chain.hops();
        let last = hops.len() - 1;
        // Nodes chosen for hops 0..i and the tunnel that currently ends at
        // route[i - 1]. The tunnel is consumed by every extension attempt.
        let mut route: Vec<Arc<Node>> = Vec::with_capacity(hops.len());
        let mut tunnel: Option<BoxStream> = None;

        for (i, hop) in hops.iter().enumerate() {
            let target = (i == last).then_some((network, addr));
            let mut tried: Vec<Arc<Node>> = Vec::new();
            let mut cause: Option<DialError> = None;

            let reached = loop {
                if tried.len() >= self.options.attempts_per_hop {
                    break None;
                }
                let node = match hop.select(ctx.hash_source(), &tried) {
                    Ok(node) => node,
                    Err(_) if cause.is_some() => break None,
                    Err(_) => {
                        return Err(RouteError::NoEligibleNode {
                            hop: hop.name().to_string(),
                        });
                    }
                };
                check_bypass(chain, i, &route, &node, addr)?;
                tried.push(Arc::clone(&node));

                let prefix = match tunnel.take() {
                    Some(stream) => Some(stream),
                    None if i > 0 => Some(self.rebuild(ctx, chain, &route).await?),
                    None => None,
                };

                match extend(ctx, prefix, route.last(), &node, target).await {
                    Ok(stream) => {
                        hop.mark_success(&node);
                        debug!(hop = hop.name(), node = node.name(), "hop reached");
                        break Some((node, stream));
                    }
                    Err(e) => {
                        hop.mark_failure(&node);
                        hoprelay_metrics::record_node_failure(hop.name());
                        warn!(
                            hop = hop.name(),
                            node = node.name(),
                            addr = node.addr(),
                            error = %e,
                            "node dial failed"
                        );
                        cause = Some(e);
                    }
                }
            };

            match reached {
                Some((node, stream)) => {
                    route.push(node);
                    tunnel = Some(stream);
                }
                None => {
                    return Err(match cause {
                        Some(cause) => RouteError::RouteFailed {
                            hop: hop.name().to_string(),
                            cause,
                        },
                        None => RouteError::NoEligibleNode {
                            hop: hop.name().to_string(),
                        },
                    });
                }
            }
        }

        match tunnel {
            Some(stream) => Ok(stream),
            None => Err(RouteError::NoEligibleNode {
                hop: chain.name().to_string(),
            }),
        }
    }

    /// Re-dial the already chosen nodes of hops `0..route.len()`.
    async fn rebuild(
        &self,
        ctx: &DialContext,
        chain: &Chain,
        route: &[Arc<Node>],
    ) -> Result<BoxStream, RouteError> {
        let mut stream: Option<BoxStream> = None;
        let mut prev: Option<&Arc<Node>> = None;
        for (hop, node) in chain.hops().iter().zip(route) {
            match extend(ctx, stream.take(), prev, node, None).await {
                Ok(s) => stream = Some(s),
                Err(cause) => {
                    hop.mark_failure(node);
                    hoprelay_metrics::record_node_failure(hop.name());
                    return Err(RouteError::RouteFailed {
                        hop: hop.name().to_string(),
                        cause,
                    });
                }
            }
            prev = Some(node);
        }
        stream.ok_or_else(|| RouteError::NoEligibleNode {
            hop: chain.name().to_string(),
        })
    }
}

/// Extend `prefix` (a tunnel ending at `prev`) to `node`, then optionally
/// ask `node` to connect to the final target.
async fn extend(
    ctx: &DialContext,
    prefix: Option<BoxStream>,
    prev: Option<&Arc<Node>>,
    node: &Node,
    target: Option<(Network, &str)>,
) -> Result<BoxStream, DialError> {
    let stream = match (prefix, prev) {
        (Some(stream), Some(prev)) => {
            let stream = prev
                .connector()
                .connect(ctx, stream, Network::Tcp, node.addr())
                .await?;
            node.dialer().handshake(ctx, stream).await?
        }
        _ => node.dialer().dial(ctx, node.addr()).await?,
    };
    match target {
        Some((network, addr)) => node.connector().connect(ctx, stream, network, addr).await,
        None => Ok(stream),
    }
}

fn check_bypass(
    chain: &Chain,
    i: usize,
    route: &[Arc<Node>],
    node: &Node,
    addr: &str,
) -> Result<(), RouteError> {
    let hops = chain.hops();
    let guard = |hop: &Hop, node: &Node, against: &str| {
        if hop.bypasses(node, against) {
            debug!(hop = hop.name(), node = node.name(), addr = against, "bypassed");
            Err(RouteError::Bypassed {
                hop: hop.name().to_string(),
                addr: against.to_string(),
            })
        } else {
            Ok(())
        }
    };

    match chain.bypass_target() {
        BypassTarget::Destination => guard(&hops[i], node, addr),
        BypassTarget::NextHop => {
            if i > 0 {
                guard(&hops[i - 1], &route[i - 1], node.addr())?;
            }
            if i + 1 == hops.len() {
                guard(&hops[i], node, addr)?;
            }
            Ok(())
        }
    }
}

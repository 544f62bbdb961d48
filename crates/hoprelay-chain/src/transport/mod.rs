//! Pluggable dialers and connectors.
//!
//! A [`Dialer`] produces the transport stream to a node: directly for the
//! first hop, or by running its handshake over a tunnel that the previous
//! node's [`Connector`] opened. A [`Connector`] asks an already-reached node
//! to open a stream to some further address.

mod forward;
mod http;
mod tcp;
mod udp;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use hoprelay_core::io::BoxStream;
use serde::{Deserialize, Serialize};

use crate::context::DialContext;
use crate::error::DialError;

pub use forward::ForwardConnector;
pub use http::HttpConnector;
pub use tcp::TcpDialer;
pub use udp::UdpStream;

/// Transport network of a destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Tcp,
    Udp,
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Network::Tcp => "tcp",
            Network::Udp => "udp",
        })
    }
}

impl FromStr for Network {
    type Err = DialError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" | "tcp4" | "tcp6" => Ok(Network::Tcp),
            "udp" | "udp4" | "udp6" => Ok(Network::Udp),
            other => Err(DialError::Unsupported(format!("network {}", other))),
        }
    }
}

/// Reaches a node.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Open a fresh transport stream to `addr` (first hop).
    async fn dial(&self, ctx: &DialContext, addr: &str) -> Result<BoxStream, DialError>;

    /// Run this dialer's transport handshake over a tunnelled stream.
    async fn handshake(
        &self,
        _ctx: &DialContext,
        stream: BoxStream,
    ) -> Result<BoxStream, DialError> {
        Ok(stream)
    }
}

/// Asks a reached node to connect onwards.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        ctx: &DialContext,
        stream: BoxStream,
        network: Network,
        addr: &str,
    ) -> Result<BoxStream, DialError>;
}

/// Dial `addr` without any proxy.
pub async fn dial_direct(network: Network, addr: &str) -> Result<BoxStream, DialError> {
    match network {
        Network::Tcp => TcpDialer::default().dial_addr(addr).await,
        Network::Udp => Ok(Box::new(UdpStream::connect(addr).await?)),
    }
}

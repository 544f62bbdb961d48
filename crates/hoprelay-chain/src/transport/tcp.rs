//! Plain TCP dialer.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use hoprelay_core::io::BoxStream;
use hoprelay_core::{
    DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_TCP_NO_DELAY, DEFAULT_TCP_RECV_BUFFER,
    DEFAULT_TCP_SEND_BUFFER,
};
use tokio::net::{TcpSocket, TcpStream};
use tracing::trace;

use super::Dialer;
use crate::context::DialContext;
use crate::error::DialError;

#[derive(Debug, Clone)]
pub struct TcpDialer {
    pub connect_timeout: Duration,
    pub no_delay: bool,
    /// 0 keeps the OS default.
    pub send_buffer: usize,
    /// 0 keeps the OS default.
    pub recv_buffer: usize,
}

impl Default for TcpDialer {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            no_delay: DEFAULT_TCP_NO_DELAY,
            send_buffer: DEFAULT_TCP_SEND_BUFFER,
            recv_buffer: DEFAULT_TCP_RECV_BUFFER,
        }
    }
}

impl TcpDialer {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Resolve `addr` and connect to the first address that answers.
    pub async fn dial_addr(&self, addr: &str) -> Result<BoxStream, DialError> {
        let stream = tokio::time::timeout(self.connect_timeout, self.connect_any(addr))
            .await
            .map_err(|_| DialError::Timeout(addr.to_string()))??;
        Ok(Box::new(stream))
    }

    async fn connect_any(&self, addr: &str) -> Result<TcpStream, DialError> {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host(addr)
            .await
            .map_err(|_| DialError::Resolve(addr.to_string()))?
            .collect();
        if addrs.is_empty() {
            return Err(DialError::Resolve(addr.to_string()));
        }

        let mut last_err = None;
        for target in addrs {
            match self.connect_one(target).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    trace!(%target, error = %e, "tcp connect attempt failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.map_or_else(|| DialError::Resolve(addr.to_string()), DialError::Io))
    }

    async fn connect_one(&self, target: SocketAddr) -> std::io::Result<TcpStream> {
        let socket = if target.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        if self.send_buffer > 0 {
            socket.set_send_buffer_size(self.send_buffer as u32)?;
        }
        if self.recv_buffer > 0 {
            socket.set_recv_buffer_size(self.recv_buffer as u32)?;
        }
        let stream = socket.connect(target).await?;
        stream.set_nodelay(self.no_delay)?;
        Ok(stream)
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, _ctx: &DialContext, addr: &str) -> Result<BoxStream, DialError> {
        self.dial_addr(addr).await
    }
}

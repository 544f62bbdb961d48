//! HTTP CONNECT connector.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hoprelay_core::MAX_CONNECT_RESPONSE_BYTES;
use hoprelay_core::io::BoxStream;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use super::{Connector, Network};
use crate::context::DialContext;
use crate::error::DialError;

/// Opens a tunnel through an HTTP proxy node with `CONNECT host:port`.
#[derive(Clone, Default)]
pub struct HttpConnector {
    auth: Option<String>,
}

impl std::fmt::Debug for HttpConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpConnector")
            .field("auth", &self.auth.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl HttpConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send `Proxy-Authorization: Basic` with every request.
    pub fn with_basic_auth(mut self, username: &str, password: &str) -> Self {
        self.auth = Some(STANDARD.encode(format!("{}:{}", username, password)));
        self
    }

    fn request(&self, addr: &str) -> String {
        let mut req = format!(
            "CONNECT {addr} HTTP/1.1\r\nHost: {addr}\r\nProxy-Connection: keep-alive\r\n"
        );
        if let Some(auth) = &self.auth {
            req.push_str("Proxy-Authorization: Basic ");
            req.push_str(auth);
            req.push_str("\r\n");
        }
        req.push_str("\r\n");
        req
    }
}

#[async_trait]
impl Connector for HttpConnector {
    async fn connect(
        &self,
        _ctx: &DialContext,
        mut stream: BoxStream,
        network: Network,
        addr: &str,
    ) -> Result<BoxStream, DialError> {
        if network != Network::Tcp {
            return Err(DialError::Unsupported(format!(
                "http connector cannot carry {}",
                network
            )));
        }

        stream.write_all(self.request(addr).as_bytes()).await?;
        stream.flush().await?;

        let head = read_response_head(&mut stream).await?;
        let status = parse_status(&head)?;
        if status != 200 {
            return Err(DialError::Handshake(format!(
                "proxy answered CONNECT {} with status {}",
                addr, status
            )));
        }
        debug!(addr, "http tunnel established");
        Ok(stream)
    }
}

/// Read byte by byte up to the blank line so no tunnel payload is consumed.
async fn read_response_head(stream: &mut BoxStream) -> Result<Vec<u8>, DialError> {
    let mut head = Vec::with_capacity(128);
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(DialError::Handshake(
                "proxy closed connection during CONNECT".into(),
            ));
        }
        head.push(byte[0]);
        if head.ends_with(b"\r\n\r\n") {
            return Ok(head);
        }
        if head.len() >= MAX_CONNECT_RESPONSE_BYTES {
            return Err(DialError::Handshake("CONNECT response too large".into()));
        }
    }
}

fn parse_status(head: &[u8]) -> Result<u16, DialError> {
    let text = String::from_utf8_lossy(head);
    let line = text.lines().next().unwrap_or_default();
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(version), Some(code)) if version.starts_with("HTTP/1.") => code
            .parse()
            .map_err(|_| DialError::Handshake(format!("bad status line: {}", line))),
        _ => Err(DialError::Handshake(format!("bad status line: {}", line))),
    }
}

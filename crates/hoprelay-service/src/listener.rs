//! Listeners and accept-error classification.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use hoprelay_core::io::BoxStream;
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio_util::sync::CancellationToken;

/// An accepted client connection.
pub struct Conn {
    pub stream: BoxStream,
    pub peer: SocketAddr,
    pub local: SocketAddr,
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("peer", &self.peer)
            .field("local", &self.local)
            .finish_non_exhaustive()
    }
}

/// Why `accept` returned without a connection.
#[derive(Debug, thiserror::Error)]
pub enum AcceptError {
    /// Worth retrying after a pause (resource exhaustion, aborted handshake).
    #[error("transient accept error: {0}")]
    Transient(io::Error),
    /// The listener is unusable.
    #[error("fatal accept error: {0}")]
    Fatal(io::Error),
    /// `close` was called.
    #[error("listener closed")]
    Closed,
}

impl AcceptError {
    /// Classify an error returned by the OS.
    pub fn classify(err: io::Error) -> Self {
        if is_transient(&err) {
            AcceptError::Transient(err)
        } else {
            AcceptError::Fatal(err)
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, AcceptError::Transient(_))
    }
}

/// EMFILE and ENFILE are reported as raw OS errors with no dedicated kind.
const EMFILE: i32 = 24;
const ENFILE: i32 = 23;

fn is_transient(err: &io::Error) -> bool {
    match err.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock
        | io::ErrorKind::TimedOut
        | io::ErrorKind::OutOfMemory => true,
        _ => matches!(err.raw_os_error(), Some(EMFILE) | Some(ENFILE)),
    }
}

/// Source of client connections for a service.
#[async_trait]
pub trait Listener: Send + Sync {
    async fn accept(&self) -> Result<Conn, AcceptError>;

    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Stop accepting. A pending `accept` returns [`AcceptError::Closed`].
    fn close(&self);
}

/// TCP listener bound through socket2 with a custom backlog.
pub struct TcpListener {
    inner: Mutex<Option<Arc<tokio::net::TcpListener>>>,
    local: SocketAddr,
    closed: CancellationToken,
}

impl TcpListener {
    pub fn bind(addr: SocketAddr, backlog: u32) -> io::Result<Self> {
        let listener = create_listener(addr, backlog)?;
        Self::from_tokio(listener)
    }

    pub fn from_tokio(listener: tokio::net::TcpListener) -> io::Result<Self> {
        let local = listener.local_addr()?;
        Ok(Self {
            inner: Mutex::new(Some(Arc::new(listener))),
            local,
            closed: CancellationToken::new(),
        })
    }
}

#[async_trait]
impl Listener for TcpListener {
    async fn accept(&self) -> Result<Conn, AcceptError> {
        let listener = self.inner.lock().clone().ok_or(AcceptError::Closed)?;
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(AcceptError::Closed),
            result = listener.accept() => {
                let (stream, peer) = result.map_err(AcceptError::classify)?;
                // Best effort; a failure here does not make the connection unusable.
                let _ = stream.set_nodelay(true);
                Ok(Conn {
                    stream: Box::new(stream),
                    peer,
                    local: self.local,
                })
            }
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local)
    }

    fn close(&self) {
        self.closed.cancel();
        self.inner.lock().take();
    }
}

/// Create a TCP listener with custom backlog.
pub fn create_listener(addr: SocketAddr, backlog: u32) -> io::Result<tokio::net::TcpListener> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog.min(i32::MAX as u32) as i32)?;
    tokio::net::TcpListener::from_std(std::net::TcpListener::from(socket))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn classify_accept_errors() {
        let aborted = io::Error::from(io::ErrorKind::ConnectionAborted);
        assert!(AcceptError::classify(aborted).is_transient());

        let emfile = io::Error::from_raw_os_error(EMFILE);
        assert!(AcceptError::classify(emfile).is_transient());

        let invalid = io::Error::from(io::ErrorKind::InvalidInput);
        assert!(!AcceptError::classify(invalid).is_transient());
    }

    #[tokio::test]
    async fn accepts_loopback_connections() {
        let listener = TcpListener::bind("127.0.0.1:0".parse().unwrap(), 16).unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let mut s = tokio::net::TcpStream::connect(addr).await.unwrap();
            s.write_all(b"hi").await.unwrap();
        });

        let mut conn = listener.accept().await.unwrap();
        assert_eq!(conn.local, addr);
        assert!(conn.peer.ip().is_loopback());
        let mut buf = [0u8; 2];
        conn.stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");
        client.await.unwrap();
    }

    #[tokio::test]
    async fn close_wakes_pending_accept() {
        let listener = Arc::new(TcpListener::bind("127.0.0.1:0".parse().unwrap(), 16).unwrap());
        let pending = {
            let listener = Arc::clone(&listener);
            tokio::spawn(async move { listener.accept().await })
        };
        tokio::task::yield_now().await;
        listener.close();

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(AcceptError::Closed)));
        assert!(matches!(listener.accept().await, Err(AcceptError::Closed)));
    }
}

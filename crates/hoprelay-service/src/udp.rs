//! UDP listener.
//!
//! One bound socket is split into client sessions keyed by source address.
//! The first datagram from an unknown address yields a new [`Conn`]; later
//! datagrams from that address are queued to its session while `accept` is
//! being driven by the service loop. A session reads one datagram per read,
//! writes back to its client through the shared socket, and fails with
//! `TimedOut` after `ttl` without traffic.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use hoprelay_core::{DEFAULT_UDP_SESSION_QUEUE, DEFAULT_UDP_SESSION_TTL_SECS};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{Instant, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::listener::{AcceptError, Conn, Listener};

/// Largest UDP payload.
const MAX_DATAGRAM: usize = 65535;

pub struct UdpListener {
    socket: Arc<UdpSocket>,
    local: SocketAddr,
    sessions: Mutex<HashMap<SocketAddr, mpsc::Sender<Vec<u8>>>>,
    ttl: Duration,
    queue: usize,
    closed: CancellationToken,
}

impl UdpListener {
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = std::net::UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        Self::from_tokio(UdpSocket::from_std(socket)?)
    }

    pub fn from_tokio(socket: UdpSocket) -> io::Result<Self> {
        let local = socket.local_addr()?;
        Ok(Self {
            socket: Arc::new(socket),
            local,
            sessions: Mutex::new(HashMap::new()),
            ttl: Duration::from_secs(DEFAULT_UDP_SESSION_TTL_SECS),
            queue: DEFAULT_UDP_SESSION_QUEUE,
            closed: CancellationToken::new(),
        })
    }

    /// Idle time after which a session read fails.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Datagrams buffered per session. 0 is treated as 1.
    pub fn with_queue(mut self, queue: usize) -> Self {
        self.queue = queue.max(1);
        self
    }

    /// Sessions whose stream is still alive.
    pub fn sessions(&self) -> usize {
        self.sessions.lock().values().filter(|tx| !tx.is_closed()).count()
    }

    /// Queue `datagram` to the live session of `peer`, or return it.
    fn deliver(&self, peer: SocketAddr, datagram: Vec<u8>) -> Option<Vec<u8>> {
        let mut sessions = self.sessions.lock();
        let Some(tx) = sessions.get(&peer) else {
            return Some(datagram);
        };
        match tx.try_send(datagram) {
            Ok(()) => None,
            Err(mpsc::error::TrySendError::Full(_)) => {
                trace!(%peer, "udp session queue full, datagram dropped");
                None
            }
            Err(mpsc::error::TrySendError::Closed(datagram)) => {
                sessions.remove(&peer);
                Some(datagram)
            }
        }
    }

    fn open_session(&self, peer: SocketAddr, first: Vec<u8>) -> Conn {
        let (tx, rx) = mpsc::channel(self.queue);
        // A fresh channel has room for the first datagram.
        let _ = tx.try_send(first);

        let mut sessions = self.sessions.lock();
        sessions.retain(|_, tx| !tx.is_closed());
        sessions.insert(peer, tx);
        debug!(%peer, sessions = sessions.len(), "udp session opened");

        Conn {
            stream: Box::new(UdpSession {
                socket: Arc::clone(&self.socket),
                peer,
                rx,
                ttl: self.ttl,
                idle: Box::pin(tokio::time::sleep(self.ttl)),
            }),
            peer,
            local: self.local,
        }
    }
}

#[async_trait]
impl Listener for UdpListener {
    async fn accept(&self) -> Result<Conn, AcceptError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let (n, peer) = tokio::select! {
                biased;
                _ = self.closed.cancelled() => return Err(AcceptError::Closed),
                result = self.socket.recv_from(&mut buf) => result.map_err(AcceptError::classify)?,
            };
            if let Some(datagram) = self.deliver(peer, buf[..n].to_vec()) {
                return Ok(self.open_session(peer, datagram));
            }
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local)
    }

    /// Stop accepting and end every session: their reads return end of stream.
    fn close(&self) {
        self.closed.cancel();
        self.sessions.lock().clear();
    }
}

/// One client of a [`UdpListener`].
struct UdpSession {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    rx: mpsc::Receiver<Vec<u8>>,
    ttl: Duration,
    idle: Pin<Box<Sleep>>,
}

impl UdpSession {
    fn touch(&mut self) {
        let deadline = Instant::now() + self.ttl;
        self.idle.as_mut().reset(deadline);
    }
}

impl AsyncRead for UdpSession {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(datagram)) => {
                let n = datagram.len().min(buf.remaining());
                buf.put_slice(&datagram[..n]);
                this.touch();
                Poll::Ready(Ok(()))
            }
            Poll::Ready(None) => Poll::Ready(Ok(())),
            Poll::Pending => match this.idle.as_mut().poll(cx) {
                Poll::Ready(()) => Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "udp session idle",
                ))),
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

impl AsyncWrite for UdpSession {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let sent = this.socket.poll_send_to(cx, buf, this.peer);
        if let Poll::Ready(Ok(_)) = sent {
            this.touch();
        }
        sent
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

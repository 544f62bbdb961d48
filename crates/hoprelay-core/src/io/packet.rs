//! Datagram relay between two packet endpoints.
//!
//! One forwarding loop runs per direction on its own task. Each iteration
//! borrows a pooled buffer, reads a single datagram, drops it when its source
//! is bypassed, optionally passes it through a [`PacketHook`] (first endpoint
//! to second only) and writes it to the other endpoint under the same address.
//! The first loop error ends the session; the sibling loop is cancelled and
//! both endpoints are closed.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::BoxStream;
use super::pool::{BufferPool, global_pool};
use crate::defaults::DEFAULT_UDP_BUFFER_SIZE;
use crate::policy::Bypass;

/// A datagram socket as seen by the relay.
#[async_trait]
pub trait PacketEndpoint: Send + Sync + 'static {
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize>;

    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Release the endpoint. Pending reads may still complete afterwards.
    fn close(&self) {}
}

#[async_trait]
impl PacketEndpoint for UdpSocket {
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf).await
    }

    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, addr).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }
}

/// Packet view of a message-preserving stream, such as a connected UDP
/// socket or one client session of a UDP listener.
///
/// Each read yields one datagram, labelled with the fixed `peer` address;
/// a zero-length read is end of stream. Writes ignore the address.
pub struct StreamEndpoint {
    reader: Mutex<ReadHalf<BoxStream>>,
    writer: Mutex<WriteHalf<BoxStream>>,
    local: SocketAddr,
    peer: SocketAddr,
}

impl StreamEndpoint {
    pub fn new(stream: BoxStream, local: SocketAddr, peer: SocketAddr) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            local,
            peer,
        }
    }
}

#[async_trait]
impl PacketEndpoint for StreamEndpoint {
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let n = self.reader.lock().await.read(buf).await?;
        if n == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        Ok((n, self.peer))
    }

    async fn send_to(&self, buf: &[u8], _addr: SocketAddr) -> io::Result<usize> {
        self.writer.lock().await.write_all(buf).await?;
        Ok(buf.len())
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local)
    }
}

/// Outcome of running a datagram through a [`PacketHook`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookVerdict {
    /// Forward the first `n` bytes of the (possibly rewritten) buffer.
    Forward(usize),
    /// The hook handled the datagram itself; nothing is forwarded.
    Consumed,
}

/// Inspects or rewrites datagrams travelling from the first endpoint to the
/// second, e.g. to answer STUN binding requests with a spoofed address.
pub trait PacketHook: Send + Sync + 'static {
    /// `packet` is the whole buffer; the datagram occupies `packet[..len]`.
    /// `local` is the local address of the endpoint the datagram goes out on.
    /// An error ends the relay session.
    fn inspect(
        &self,
        packet: &mut [u8],
        len: usize,
        src: SocketAddr,
        local: SocketAddr,
    ) -> io::Result<HookVerdict>;

    fn close(&self) {}
}

/// Observer for per-datagram outcomes.
pub trait PacketMetrics: Send + Sync + 'static {
    fn record_forwarded(&self, bytes: u64);
    fn record_bypassed(&self);
    fn record_consumed(&self);
}

/// Builder and runner for one datagram relay session.
pub struct PacketRelay {
    pc1: Arc<dyn PacketEndpoint>,
    pc2: Arc<dyn PacketEndpoint>,
    bypass: Option<Arc<dyn Bypass>>,
    hook: Option<Arc<dyn PacketHook>>,
    metrics: Option<Arc<dyn PacketMetrics>>,
    buffer_size: usize,
    pool: Arc<BufferPool>,
}

impl PacketRelay {
    pub fn new(pc1: Arc<dyn PacketEndpoint>, pc2: Arc<dyn PacketEndpoint>) -> Self {
        Self {
            pc1,
            pc2,
            bypass: None,
            hook: None,
            metrics: None,
            buffer_size: DEFAULT_UDP_BUFFER_SIZE,
            pool: Arc::clone(global_pool()),
        }
    }

    /// Datagrams whose source address matches are dropped in both directions.
    pub fn with_bypass(mut self, bypass: Arc<dyn Bypass>) -> Self {
        self.bypass = Some(bypass);
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn PacketHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn PacketMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Per-datagram buffer size; 0 keeps the default MTU-sized buffer.
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        if size > 0 {
            self.buffer_size = size;
        }
        self
    }

    pub fn with_pool(mut self, pool: Arc<BufferPool>) -> Self {
        self.pool = pool;
        self
    }

    /// Run until either direction fails and return that first error.
    pub async fn run(self) -> io::Result<()> {
        let (err_tx, mut err_rx) = mpsc::channel::<io::Error>(2);
        let cancel = CancellationToken::new();
        // Loops also stop if the session future itself is dropped.
        let _guard = cancel.clone().drop_guard();

        let upstream = Direction {
            src: Arc::clone(&self.pc1),
            dst: Arc::clone(&self.pc2),
            bypass: self.bypass.clone(),
            hook: self.hook.clone(),
            metrics: self.metrics.clone(),
            buffer_size: self.buffer_size,
            pool: Arc::clone(&self.pool),
        };
        let downstream = Direction {
            src: Arc::clone(&self.pc2),
            dst: Arc::clone(&self.pc1),
            bypass: self.bypass.clone(),
            hook: None,
            metrics: self.metrics.clone(),
            buffer_size: self.buffer_size,
            pool: Arc::clone(&self.pool),
        };

        for dir in [upstream, downstream] {
            let tx = err_tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let err = tokio::select! {
                    _ = cancel.cancelled() => return,
                    err = dir.pump() => err,
                };
                let _ = tx.send(err).await;
            });
        }
        drop(err_tx);

        let err = match err_rx.recv().await {
            Some(err) => err,
            None => io::Error::other("datagram relay loops exited"),
        };
        debug!(error = %err, "datagram relay finished");

        cancel.cancel();
        self.pc1.close();
        self.pc2.close();
        Err(err)
    }
}

struct Direction {
    src: Arc<dyn PacketEndpoint>,
    dst: Arc<dyn PacketEndpoint>,
    bypass: Option<Arc<dyn Bypass>>,
    hook: Option<Arc<dyn PacketHook>>,
    metrics: Option<Arc<dyn PacketMetrics>>,
    buffer_size: usize,
    pool: Arc<BufferPool>,
}

impl Direction {
    async fn pump(&self) -> io::Error {
        loop {
            if let Err(e) = self.forward_one().await {
                return e;
            }
        }
    }

    async fn forward_one(&self) -> io::Result<()> {
        let mut buf = self.pool.get(self.buffer_size);
        let (n, addr) = self.src.recv_from(&mut buf).await?;

        if let Some(bypass) = &self.bypass
            && bypass.contains(&addr.to_string())
        {
            trace!(%addr, bytes = n, "datagram bypassed");
            if let Some(m) = &self.metrics {
                m.record_bypassed();
            }
            return Ok(());
        }

        let n = match &self.hook {
            Some(hook) => match hook.inspect(&mut buf, n, addr, self.dst.local_addr()?)? {
                HookVerdict::Forward(len) => len.min(buf.len()),
                HookVerdict::Consumed => {
                    trace!(%addr, "datagram consumed by hook");
                    if let Some(m) = &self.metrics {
                        m.record_consumed();
                    }
                    return Ok(());
                }
            },
            None => n,
        };

        self.dst.send_to(&buf[..n], addr).await?;
        trace!(%addr, bytes = n, "datagram forwarded");
        if let Some(m) = &self.metrics {
            m.record_forwarded(n as u64);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Mutex;

    type Datagram = (Vec<u8>, SocketAddr);

    /// Endpoint backed by channels: tests push inbound datagrams and read
    /// what the relay sent.
    struct ChannelEndpoint {
        local: SocketAddr,
        inbound: Mutex<mpsc::Receiver<io::Result<Datagram>>>,
        outbound: mpsc::UnboundedSender<Datagram>,
        closed: AtomicBool,
    }

    fn endpoint(
        port: u16,
    ) -> (
        Arc<ChannelEndpoint>,
        mpsc::Sender<io::Result<Datagram>>,
        mpsc::UnboundedReceiver<Datagram>,
    ) {
        let (in_tx, in_rx) = mpsc::channel(16);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let ep = Arc::new(ChannelEndpoint {
            local: SocketAddr::from(([127, 0, 0, 1], port)),
            inbound: Mutex::new(in_rx),
            outbound: out_tx,
            closed: AtomicBool::new(false),
        });
        (ep, in_tx, out_rx)
    }

    #[async_trait]
    impl PacketEndpoint for ChannelEndpoint {
        async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
            let next = self.inbound.lock().await.recv().await;
            match next {
                Some(Ok((data, addr))) => {
                    buf[..data.len()].copy_from_slice(&data);
                    Ok((data.len(), addr))
                }
                Some(Err(e)) => Err(e),
                None => Err(io::ErrorKind::UnexpectedEof.into()),
            }
        }

        async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
            self.outbound
                .send((buf.to_vec(), addr))
                .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
            Ok(buf.len())
        }

        fn local_addr(&self) -> io::Result<SocketAddr> {
            Ok(self.local)
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    struct BlockPort(u16);

    impl Bypass for BlockPort {
        fn contains(&self, addr: &str) -> bool {
            addr.ends_with(&format!(":{}", self.0))
        }
    }

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 1], port))
    }

    #[tokio::test]
    async fn test_forwards_both_directions() {
        let (pc1, pc1_in, mut pc1_out) = endpoint(1000);
        let (pc2, pc2_in, mut pc2_out) = endpoint(2000);
        let relay = tokio::spawn(PacketRelay::new(pc1.clone(), pc2.clone()).run());

        pc1_in.send(Ok((b"ping".to_vec(), peer(5000)))).await.unwrap();
        assert_eq!(pc2_out.recv().await.unwrap(), (b"ping".to_vec(), peer(5000)));

        pc2_in.send(Ok((b"pong".to_vec(), peer(6000)))).await.unwrap();
        assert_eq!(pc1_out.recv().await.unwrap(), (b"pong".to_vec(), peer(6000)));

        pc2_in
            .send(Err(io::ErrorKind::ConnectionRefused.into()))
            .await
            .unwrap();
        let err = relay.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
        assert!(pc1.closed.load(Ordering::SeqCst));
        assert!(pc2.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_bypassed_datagram_does_not_end_loop() {
        let (pc1, pc1_in, _pc1_out) = endpoint(1000);
        let (pc2, _pc2_in, mut pc2_out) = endpoint(2000);
        let relay = tokio::spawn(
            PacketRelay::new(pc1, pc2)
                .with_bypass(Arc::new(BlockPort(53)))
                .run(),
        );

        pc1_in.send(Ok((b"dns".to_vec(), peer(53)))).await.unwrap();
        pc1_in.send(Ok((b"data".to_vec(), peer(443)))).await.unwrap();

        // Only the second datagram comes out.
        assert_eq!(pc2_out.recv().await.unwrap(), (b"data".to_vec(), peer(443)));
        assert!(!relay.is_finished());
        relay.abort();
    }

    #[tokio::test]
    async fn test_reused_buffer_never_corrupts_payloads() {
        let (pc1, pc1_in, _pc1_out) = endpoint(1000);
        let (pc2, _pc2_in, mut pc2_out) = endpoint(2000);
        let pool = Arc::new(BufferPool::new(1));
        let relay = tokio::spawn(
            PacketRelay::new(pc1, pc2)
                .with_pool(pool.clone())
                .with_buffer_size(64)
                .run(),
        );

        let payloads: Vec<Vec<u8>> = [64usize, 3, 40, 1, 17]
            .iter()
            .enumerate()
            .map(|(i, &len)| (0..len).map(|j| (i * 50 + j) as u8).collect())
            .collect();
        for (i, payload) in payloads.iter().enumerate() {
            pc1_in
                .send(Ok((payload.clone(), peer(7000 + i as u16))))
                .await
                .unwrap();
        }
        for (i, payload) in payloads.iter().enumerate() {
            let (data, addr) = pc2_out.recv().await.unwrap();
            assert_eq!(&data, payload, "datagram {i}");
            assert_eq!(addr, peer(7000 + i as u16));
        }

        assert!(pool.stats().reuses() >= 4);
        relay.abort();
    }

    struct StunHook {
        calls: AtomicUsize,
    }

    impl PacketHook for StunHook {
        fn inspect(
            &self,
            packet: &mut [u8],
            len: usize,
            _src: SocketAddr,
            local: SocketAddr,
        ) -> io::Result<HookVerdict> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(local.port(), 2000);
            match &packet[..len] {
                b"stun" => Ok(HookVerdict::Consumed),
                b"rewrite" => {
                    packet[..3].copy_from_slice(b"new");
                    Ok(HookVerdict::Forward(3))
                }
                _ => Ok(HookVerdict::Forward(len)),
            }
        }
    }

    #[tokio::test]
    async fn test_hook_consumes_and_rewrites_upstream_only() {
        let (pc1, pc1_in, mut pc1_out) = endpoint(1000);
        let (pc2, pc2_in, mut pc2_out) = endpoint(2000);
        let hook = Arc::new(StunHook {
            calls: AtomicUsize::new(0),
        });
        let relay = tokio::spawn(PacketRelay::new(pc1, pc2).with_hook(hook.clone()).run());

        pc1_in.send(Ok((b"stun".to_vec(), peer(1)))).await.unwrap();
        pc1_in.send(Ok((b"rewrite".to_vec(), peer(2)))).await.unwrap();
        assert_eq!(pc2_out.recv().await.unwrap(), (b"new".to_vec(), peer(2)));

        pc2_in.send(Ok((b"stun".to_vec(), peer(3)))).await.unwrap();
        assert_eq!(pc1_out.recv().await.unwrap(), (b"stun".to_vec(), peer(3)));

        assert_eq!(hook.calls.load(Ordering::SeqCst), 2);
        relay.abort();
    }

    #[tokio::test]
    async fn test_stream_endpoint_labels_datagrams_with_peer() {
        let (near, mut far) = tokio::io::duplex(256);
        let local = SocketAddr::from(([127, 0, 0, 1], 1000));
        let ep = StreamEndpoint::new(Box::new(near), local, peer(53));

        far.write_all(b"query").await.unwrap();
        let mut buf = [0u8; 64];
        let (n, from) = ep.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"query");
        assert_eq!(from, peer(53));

        ep.send_to(b"answer", peer(9)).await.unwrap();
        let mut out = [0u8; 6];
        far.read_exact(&mut out).await.unwrap();
        assert_eq!(&out, b"answer");

        drop(far);
        let err = ep.recv_from(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_over_loopback_udp() {
        let pc1 = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let pc2 = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let target = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let pc1_addr = pc1.local_addr().unwrap();
        let pc2_addr = pc2.local_addr().unwrap();
        let relay = tokio::spawn(PacketRelay::new(pc1, pc2).run());

        // pc2 sends to whatever address the datagram came from, so the
        // target must be that address: send from the target itself.
        target.send_to(b"hello", pc1_addr).await.unwrap();
        let mut buf = [0u8; 64];
        let (n, from) = tokio::time::timeout(Duration::from_secs(2), target.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], b"hello");
        assert_eq!(from, pc2_addr);

        relay.abort();
    }
}

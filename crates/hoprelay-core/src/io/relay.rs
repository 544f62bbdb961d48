//! Bidirectional stream relay with configurable metrics.
//!
//! Each direction is driven as an independent poll-based state machine within
//! a single future, so back-pressure on one direction never stalls the other.
//! The session ends as soon as either direction finishes.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Trait for recording relay metrics.
pub trait RelayMetrics {
    /// Bytes copied from the first stream to the second.
    fn record_inbound(&self, bytes: u64);
    /// Bytes copied from the second stream to the first.
    fn record_outbound(&self, bytes: u64);
}

/// No-op metrics implementation for cases where metrics aren't needed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpMetrics;

impl RelayMetrics for NoOpMetrics {
    #[inline]
    fn record_inbound(&self, _bytes: u64) {}
    #[inline]
    fn record_outbound(&self, _bytes: u64) {}
}

enum CopyState {
    Reading,
    Writing(usize, usize), // (pos, len)
    Flushing(usize),
    ShuttingDown,
    Done,
}

enum CopyPoll {
    Flushed(usize),
    /// EOF seen and the writer shut down.
    Finished,
}

fn poll_copy_direction<R, W>(
    cx: &mut Context<'_>,
    reader: &mut R,
    writer: &mut W,
    buf: &mut [u8],
    state: &mut CopyState,
) -> Poll<io::Result<CopyPoll>>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    loop {
        match state {
            CopyState::Reading => {
                let mut read_buf = ReadBuf::new(buf);
                match Pin::new(&mut *reader).poll_read(cx, &mut read_buf) {
                    Poll::Ready(Ok(())) => {
                        let n = read_buf.filled().len();
                        *state = if n == 0 {
                            CopyState::ShuttingDown
                        } else {
                            CopyState::Writing(0, n)
                        };
                    }
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                }
            }
            CopyState::Writing(pos, len) => {
                match Pin::new(&mut *writer).poll_write(cx, &buf[*pos..*len]) {
                    Poll::Ready(Ok(0)) => {
                        return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
                    }
                    Poll::Ready(Ok(n)) => {
                        *pos += n;
                        if *pos >= *len {
                            *state = CopyState::Flushing(*len);
                        }
                    }
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                }
            }
            CopyState::Flushing(bytes) => {
                let bytes = *bytes;
                match Pin::new(&mut *writer).poll_flush(cx) {
                    Poll::Ready(Ok(())) => {
                        *state = CopyState::Reading;
                        return Poll::Ready(Ok(CopyPoll::Flushed(bytes)));
                    }
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                }
            }
            CopyState::ShuttingDown => match Pin::new(&mut *writer).poll_shutdown(cx) {
                Poll::Ready(_) => {
                    *state = CopyState::Done;
                    return Poll::Ready(Ok(CopyPoll::Finished));
                }
                Poll::Pending => return Poll::Pending,
            },
            CopyState::Done => return Poll::Ready(Ok(CopyPoll::Finished)),
        }
    }
}

/// Copy bytes between `a` and `b` until one side finishes.
///
/// Returns `Ok(())` when a direction reaches EOF and the error of the first
/// direction that fails otherwise. Both streams are dropped (closed) on
/// return. There is no idle timeout: callers own cancellation.
pub async fn forward<A, B, M>(a: A, b: B, buffer_size: usize, metrics: &M) -> io::Result<()>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
    M: RelayMetrics + ?Sized,
{
    let (mut a_r, mut a_w) = tokio::io::split(a);
    let (mut b_r, mut b_w) = tokio::io::split(b);

    let buffer_size = buffer_size.max(1);
    let mut buf_ab = vec![0u8; buffer_size];
    let mut buf_ba = vec![0u8; buffer_size];
    let mut state_ab = CopyState::Reading;
    let mut state_ba = CopyState::Reading;

    std::future::poll_fn(|cx| {
        loop {
            let mut progressed = false;

            match poll_copy_direction(cx, &mut a_r, &mut b_w, &mut buf_ab, &mut state_ab) {
                Poll::Ready(Ok(CopyPoll::Flushed(n))) => {
                    metrics.record_inbound(n as u64);
                    progressed = true;
                }
                Poll::Ready(Ok(CopyPoll::Finished)) => return Poll::Ready(Ok(())),
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => {}
            }

            match poll_copy_direction(cx, &mut b_r, &mut a_w, &mut buf_ba, &mut state_ba) {
                Poll::Ready(Ok(CopyPoll::Flushed(n))) => {
                    metrics.record_outbound(n as u64);
                    progressed = true;
                }
                Poll::Ready(Ok(CopyPoll::Finished)) => return Poll::Ready(Ok(())),
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => {}
            }

            // Both directions registered a waker.
            if !progressed {
                return Poll::Pending;
            }
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};

    #[derive(Default)]
    struct TestMetrics {
        inbound: AtomicU64,
        outbound: AtomicU64,
    }

    impl RelayMetrics for TestMetrics {
        fn record_inbound(&self, bytes: u64) {
            self.inbound.fetch_add(bytes, Ordering::Relaxed);
        }
        fn record_outbound(&self, bytes: u64) {
            self.outbound.fetch_add(bytes, Ordering::Relaxed);
        }
    }

    struct FailingStream;

    impl AsyncRead for FailingStream {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::ErrorKind::ConnectionReset.into()))
        }
    }

    impl AsyncWrite for FailingStream {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Ok(buf.len()))
        }
        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_forward_both_directions() {
        let (client, relay_a) = duplex(1024);
        let (relay_b, target) = duplex(1024);
        let metrics = std::sync::Arc::new(TestMetrics::default());

        let m = metrics.clone();
        let relay = tokio::spawn(async move { forward(relay_a, relay_b, 1024, &*m).await });

        let (mut client_r, mut client_w) = tokio::io::split(client);
        let (mut target_r, mut target_w) = tokio::io::split(target);

        client_w.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 16];
        let n = target_r.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");

        target_w.write_all(b"world").await.unwrap();
        let n = client_r.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"world");

        // Client EOF ends the whole session.
        client_w.shutdown().await.unwrap();
        relay.await.unwrap().unwrap();

        assert_eq!(metrics.inbound.load(Ordering::Relaxed), 5);
        assert_eq!(metrics.outbound.load(Ordering::Relaxed), 5);
    }

    #[tokio::test]
    async fn test_forward_ends_when_first_side_finishes() {
        let (client, relay_a) = duplex(64);
        let (relay_b, _target) = duplex(64);

        // The target stays open; dropping the client must still end the relay.
        drop(client);
        forward(relay_a, relay_b, 64, &NoOpMetrics).await.unwrap();
    }

    #[tokio::test]
    async fn test_forward_propagates_error() {
        let (_client, relay_a) = duplex(64);
        let err = forward(relay_a, FailingStream, 64, &NoOpMetrics)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }

    #[tokio::test]
    async fn test_forward_large_payload_small_buffer() {
        let (client, relay_a) = duplex(256);
        let (relay_b, target) = duplex(256);
        let relay = tokio::spawn(async move { forward(relay_a, relay_b, 17, &NoOpMetrics).await });

        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();
        let (_client_r, mut client_w) = tokio::io::split(client);
        let writer = tokio::spawn(async move {
            client_w.write_all(&payload).await.unwrap();
            client_w
        });

        let (mut target_r, _target_w) = tokio::io::split(target);
        let mut received = vec![0u8; expected.len()];
        target_r.read_exact(&mut received).await.unwrap();
        assert_eq!(received, expected);

        let mut client_w = writer.await.unwrap();
        client_w.shutdown().await.unwrap();
        relay.await.unwrap().unwrap();
    }
}

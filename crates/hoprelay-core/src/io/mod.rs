//! I/O utilities for stream and datagram relay.
//!
//! This module provides shared I/O primitives used by the router, the
//! built-in handlers and protocol handlers that plug into a service.

mod packet;
mod pool;
mod relay;

use tokio::io::{AsyncRead, AsyncWrite};

pub use packet::{
    HookVerdict, PacketEndpoint, PacketHook, PacketMetrics, PacketRelay, StreamEndpoint,
};
pub use pool::{BufferPool, BufferPoolStats, PooledBuffer, SIZE_CLASSES, global_pool};
pub use relay::{NoOpMetrics, RelayMetrics, forward};

/// Any bidirectional byte stream that can be boxed and moved across tasks.
pub trait TransportStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> TransportStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Type-erased stream handed between dialers, connectors and handlers.
pub type BoxStream = Box<dyn TransportStream>;

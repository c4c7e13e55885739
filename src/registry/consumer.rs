//! Consumer handle types
//!
//! A [`ConsumerHandle`] wraps one writable sink. Once it is handed to the
//! registry, only the registry touches it. `close` consumes the handle, so a
//! handle can be closed at most once.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Boxed sink a consumer is written through
pub type ConsumerSink = Box<dyn AsyncWrite + Send + Unpin>;

/// Identity of a registered consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerId(pub(super) u64);

impl ConsumerId {
    /// Raw numeric id
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Why a consumer was dropped from the registry
#[derive(Debug, thiserror::Error)]
pub enum WriteFailure {
    /// The write returned an error (broken pipe, reset, short write)
    #[error("write failed: {0}")]
    Io(#[from] io::Error),

    /// The consumer did not accept the chunk within the write timeout
    #[error("write timed out after {0:?}")]
    TimedOut(Duration),
}

/// One connected stream sink
pub struct ConsumerHandle {
    sink: ConsumerSink,
    peer_addr: Option<SocketAddr>,
    connected_at: Instant,
    bytes_sent: u64,
}

impl ConsumerHandle {
    /// Wrap a writable sink
    pub fn new<W>(sink: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            sink: Box::new(sink),
            peer_addr: None,
            connected_at: Instant::now(),
            bytes_sent: 0,
        }
    }

    /// Attach the remote address, used for logging only
    pub fn with_peer(mut self, addr: SocketAddr) -> Self {
        self.peer_addr = Some(addr);
        self
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Total bytes delivered to this consumer
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Time since the handle was created
    pub fn connected_for(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Write the whole of `data` or fail
    ///
    /// A write that stalls past `timeout` counts as a failure. There is no
    /// retry: the caller is expected to prune the consumer.
    pub(super) async fn write_all(
        &mut self,
        data: &[u8],
        timeout: Duration,
    ) -> Result<(), WriteFailure> {
        let sink = &mut self.sink;
        let write = async move {
            sink.write_all(data).await?;
            sink.flush().await
        };

        match tokio::time::timeout(timeout, write).await {
            Ok(Ok(())) => {
                self.bytes_sent += data.len() as u64;
                Ok(())
            }
            Ok(Err(e)) => Err(WriteFailure::Io(e)),
            Err(_) => Err(WriteFailure::TimedOut(timeout)),
        }
    }

    /// Shut the sink down and release it
    pub(super) async fn close(mut self, timeout: Duration) {
        match tokio::time::timeout(timeout, self.sink.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::trace!(peer = ?self.peer_addr, error = %e, "Consumer shutdown failed");
            }
            Err(_) => {
                tracing::trace!(peer = ?self.peer_addr, "Consumer shutdown timed out");
            }
        }
    }
}

impl fmt::Debug for ConsumerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerHandle")
            .field("peer_addr", &self.peer_addr)
            .field("bytes_sent", &self.bytes_sent)
            .finish_non_exhaustive()
    }
}

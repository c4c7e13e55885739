//! Raw PCM receiver
//!
//! The wire format is bare PCM with no framing: chunk boundaries on the
//! server side are not visible here, reads return whatever has arrived.

use std::io;
use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::error::Result;

/// Client side of a PCM broadcast
///
/// # Example
/// ```no_run
/// use pcmcast::client::PcmReceiver;
///
/// # async fn example() -> pcmcast::error::Result<()> {
/// let mut receiver = PcmReceiver::connect("127.0.0.1:5016", 4096).await?;
/// while let Some(pcm) = receiver.recv().await? {
///     println!("{} bytes", pcm.len());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct PcmReceiver {
    stream: TcpStream,
    buf: BytesMut,
    read_size: usize,
    bytes_received: u64,
}

impl PcmReceiver {
    /// Connect to a server; each `recv` reads at most `read_size` bytes
    pub async fn connect<A: ToSocketAddrs>(addr: A, read_size: usize) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let read_size = read_size.max(1);

        tracing::debug!(peer = ?stream.peer_addr().ok(), "Connected to PCM server");

        Ok(Self {
            stream,
            buf: BytesMut::with_capacity(read_size),
            read_size,
            bytes_received: 0,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.stream.local_addr()?)
    }

    /// Total PCM bytes received so far
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Read the next available block of PCM
    ///
    /// Returns `None` once the server has closed the stream.
    pub async fn recv(&mut self) -> Result<Option<Bytes>> {
        self.buf.reserve(self.read_size);
        let mut limited = (&mut self.stream).take(self.read_size as u64);
        let n = limited.read_buf(&mut self.buf).await?;
        if n == 0 {
            return Ok(None);
        }

        self.bytes_received += n as u64;
        Ok(Some(self.buf.split().freeze()))
    }

    /// Read exactly `len` bytes
    ///
    /// Returns `None` if the server closes the stream first.
    pub async fn recv_exact(&mut self, len: usize) -> Result<Option<Bytes>> {
        self.buf.resize(len, 0);
        match self.stream.read_exact(&mut self.buf).await {
            Ok(_) => {
                self.bytes_received += len as u64;
                Ok(Some(self.buf.split().freeze()))
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                self.buf.clear();
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn test_recv_until_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(&[1u8; 10]).await.unwrap();
            socket.shutdown().await.unwrap();
        });

        let mut receiver = PcmReceiver::connect(addr, 4).await.unwrap();
        let mut total = Vec::new();
        while let Some(pcm) = receiver.recv().await.unwrap() {
            assert!(pcm.len() <= 4);
            total.extend_from_slice(&pcm);
        }

        server.await.unwrap();
        assert_eq!(total, vec![1u8; 10]);
        assert_eq!(receiver.bytes_received(), 10);
    }

    #[tokio::test]
    async fn test_recv_exact() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"abcdefg").await.unwrap();
        });

        let mut receiver = PcmReceiver::connect(addr, 4096).await.unwrap();
        assert_eq!(receiver.recv_exact(3).await.unwrap().unwrap(), &b"abc"[..]);
        assert_eq!(receiver.recv_exact(3).await.unwrap().unwrap(), &b"def"[..]);

        server.await.unwrap();
        // Only one byte left before the close
        assert!(receiver.recv_exact(3).await.unwrap().is_none());
    }
}

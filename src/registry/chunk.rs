//! Audio chunk buffer
//!
//! One fixed-capacity buffer is allocated by the broadcast loop and refilled
//! by the decoder on every iteration. Only the first `len()` bytes are valid.

use bytes::BytesMut;

/// A fixed-capacity block of raw PCM plus the number of valid bytes in it
#[derive(Debug, Clone)]
pub struct AudioChunk {
    buf: BytesMut,
    len: usize,
}

impl AudioChunk {
    /// Create an empty chunk that holds at most `capacity` bytes
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::zeroed(capacity),
            len: 0,
        }
    }

    /// Create a full chunk holding a copy of `data`
    pub fn from_slice(data: &[u8]) -> Self {
        let mut chunk = Self::with_capacity(data.len());
        chunk.fill(data);
        chunk
    }

    /// Fixed capacity in bytes
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Number of valid bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the chunk has reached its capacity
    pub fn is_full(&self) -> bool {
        self.len == self.buf.len()
    }

    /// Free space left before the chunk is full
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.len
    }

    /// Valid bytes of this chunk
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Discard the valid bytes, keeping the allocation
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Append as much of `data` as fits and return the number of bytes copied
    pub fn fill(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.remaining());
        self.buf[self.len..self.len + n].copy_from_slice(&data[..n]);
        self.len += n;
        n
    }
}

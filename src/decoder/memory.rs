//! In-memory decoder
//!
//! Replays a fixed list of PCM blocks. Each block becomes exactly one chunk
//! (truncated to the chunk capacity), which makes the broadcast sequence
//! fully predictable.

use bytes::Bytes;

use super::{AudioDecoder, ChunkStatus, DecodeError, StreamFormat};
use crate::registry::AudioChunk;

/// Decoder over pre-rendered PCM blocks
#[derive(Debug, Clone)]
pub struct MemoryDecoder {
    blocks: Vec<Bytes>,
    position: usize,
    format: Option<StreamFormat>,
    closed: bool,
}

impl MemoryDecoder {
    /// Play `blocks` in order, then report end of stream
    pub fn new<I, B>(blocks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        Self {
            blocks: blocks
                .into_iter()
                .map(Into::into)
                .filter(|b: &Bytes| !b.is_empty())
                .collect(),
            position: 0,
            format: None,
            closed: false,
        }
    }

    /// Split one PCM buffer into blocks of `block_size` bytes
    pub fn from_pcm(pcm: impl Into<Bytes>, block_size: usize) -> Self {
        let mut pcm: Bytes = pcm.into();
        let block_size = block_size.max(1);
        let mut blocks = Vec::with_capacity(pcm.len() / block_size + 1);
        while !pcm.is_empty() {
            let n = block_size.min(pcm.len());
            blocks.push(pcm.split_to(n));
        }
        Self::new(blocks)
    }

    /// Report `format` as the PCM layout
    pub fn with_format(mut self, format: StreamFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Index of the next block to be returned
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl AudioDecoder for MemoryDecoder {
    fn next_chunk(&mut self, chunk: &mut AudioChunk) -> Result<ChunkStatus, DecodeError> {
        match self.blocks.get(self.position) {
            Some(block) => {
                chunk.fill(block);
                self.position += 1;
                Ok(ChunkStatus::Ready)
            }
            None => Ok(ChunkStatus::EndOfStream),
        }
    }

    fn rewind(&mut self) -> Result<(), DecodeError> {
        self.position = 0;
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn format(&self) -> Option<StreamFormat> {
        self.format
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocks_then_end_of_stream() {
        let mut decoder = MemoryDecoder::new(vec![b"one".to_vec(), b"two".to_vec()]);
        let mut chunk = AudioChunk::with_capacity(16);

        assert_eq!(decoder.next_chunk(&mut chunk).unwrap(), ChunkStatus::Ready);
        assert_eq!(chunk.as_bytes(), b"one");

        chunk.clear();
        assert_eq!(decoder.next_chunk(&mut chunk).unwrap(), ChunkStatus::Ready);
        assert_eq!(chunk.as_bytes(), b"two");

        chunk.clear();
        assert_eq!(
            decoder.next_chunk(&mut chunk).unwrap(),
            ChunkStatus::EndOfStream
        );
        assert!(chunk.is_empty());

        decoder.rewind().unwrap();
        assert_eq!(decoder.position(), 0);
        assert_eq!(decoder.next_chunk(&mut chunk).unwrap(), ChunkStatus::Ready);
        assert_eq!(chunk.as_bytes(), b"one");
    }

    #[test]
    fn test_from_pcm_splits_blocks() {
        let mut decoder = MemoryDecoder::from_pcm(vec![1u8; 10], 4);
        let mut chunk = AudioChunk::with_capacity(4);
        let mut sizes = Vec::new();

        while decoder.next_chunk(&mut chunk).unwrap() == ChunkStatus::Ready {
            sizes.push(chunk.len());
            chunk.clear();
        }
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[test]
    fn test_block_truncated_to_capacity() {
        let mut decoder = MemoryDecoder::new(vec![vec![9u8; 8]]);
        let mut chunk = AudioChunk::with_capacity(5);

        decoder.next_chunk(&mut chunk).unwrap();
        assert_eq!(chunk.len(), 5);
    }

    #[test]
    fn test_close() {
        let mut decoder = MemoryDecoder::new(Vec::<Bytes>::new());
        assert!(!decoder.is_closed());
        decoder.close();
        assert!(decoder.is_closed());
    }
}

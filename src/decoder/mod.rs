//! Decoder capability
//!
//! The broadcast loop pulls raw PCM from an [`AudioDecoder`] one chunk at a
//! time. Decoders are blocking; the loop runs every call on the blocking
//! thread pool, so implementations are free to do file I/O and CPU work.
//!
//! - [`FileDecoder`]: decodes an audio file (MP3, FLAC, Vorbis, WAV, ...)
//!   to interleaved signed 16-bit little-endian PCM
//! - [`MemoryDecoder`]: plays back a fixed list of chunks

pub mod file;
pub mod memory;

use std::fmt;
use std::io;

use crate::registry::AudioChunk;

pub use file::FileDecoder;
pub use memory::MemoryDecoder;

/// Result of one [`AudioDecoder::next_chunk`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStatus {
    /// The chunk holds new audio (possibly fewer bytes than its capacity)
    Ready,
    /// The source is exhausted; the chunk holds nothing
    EndOfStream,
}

/// Raw PCM layout produced by a decoder
///
/// Consumers learn this out of band; it is never sent on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    /// Frames per second
    pub sample_rate: u32,
    /// Interleaved channel count
    pub channels: u16,
}

impl StreamFormat {
    /// Bytes per interleaved frame (16-bit samples)
    pub fn frame_size(&self) -> usize {
        self.channels as usize * 2
    }

    /// Bytes per second of audio
    pub fn byte_rate(&self) -> usize {
        self.sample_rate as usize * self.frame_size()
    }
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s16le {} Hz {} ch", self.sample_rate, self.channels)
    }
}

/// Fatal decoder failure
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Reading the source failed
    #[error("source I/O error: {0}")]
    Io(#[from] io::Error),

    /// Container or codec cannot be handled
    #[error("unsupported source: {0}")]
    Unsupported(String),

    /// The source contains no decodable audio track
    #[error("no audio track in source")]
    NoAudioTrack,

    /// Rewinding completed but the source produced no audio at all
    #[error("source produced no audio")]
    Empty,

    /// Corrupt data the decoder cannot continue past
    #[error("{0}")]
    Corrupt(String),
}

/// Source of raw PCM chunks
pub trait AudioDecoder: Send + 'static {
    /// Fill `chunk` with the next block of audio
    ///
    /// `chunk` arrives cleared. On [`ChunkStatus::Ready`] it holds at least
    /// one byte; it is filled to capacity except at the end of the source.
    fn next_chunk(&mut self, chunk: &mut AudioChunk) -> Result<ChunkStatus, DecodeError>;

    /// Restart from the beginning of the source
    fn rewind(&mut self) -> Result<(), DecodeError>;

    /// Release the source
    fn close(&mut self) {}

    /// Layout of the produced PCM, when known
    fn format(&self) -> Option<StreamFormat> {
        None
    }
}

impl<D: AudioDecoder + ?Sized> AudioDecoder for Box<D> {
    fn next_chunk(&mut self, chunk: &mut AudioChunk) -> Result<ChunkStatus, DecodeError> {
        (**self).next_chunk(chunk)
    }

    fn rewind(&mut self) -> Result<(), DecodeError> {
        (**self).rewind()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn format(&self) -> Option<StreamFormat> {
        (**self).format()
    }
}

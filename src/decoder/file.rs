//! File decoder backed by symphonia
//!
//! Decodes any container/codec symphonia supports into interleaved signed
//! 16-bit little-endian PCM and cuts it into chunks. Packets rarely line up
//! with chunk boundaries, so decoded samples that do not fit the current
//! chunk wait in `pending` for the next call.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut, BytesMut};
use symphonia::core::audio::{SampleBuffer, SignalSpec};
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::{AudioDecoder, ChunkStatus, DecodeError, StreamFormat};
use crate::registry::AudioChunk;

impl From<SymphoniaError> for DecodeError {
    fn from(e: SymphoniaError) -> Self {
        match e {
            SymphoniaError::IoError(e) => DecodeError::Io(e),
            SymphoniaError::Unsupported(what) => DecodeError::Unsupported(what.to_string()),
            other => DecodeError::Corrupt(other.to_string()),
        }
    }
}

/// An opened source: demuxer plus codec for the selected track
struct OpenSource {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    format: StreamFormat,
}

impl OpenSource {
    fn open(path: &Path) -> Result<Self, DecodeError> {
        let file = File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;
        let reader = probed.format;

        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecodeError::NoAudioTrack)?;

        let track_id = track.id;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| DecodeError::Unsupported("unknown sample rate".to_string()))?;
        let channels = track
            .codec_params
            .channels
            .map(|c| c.count() as u16)
            .ok_or_else(|| DecodeError::Unsupported("unknown channel layout".to_string()))?;

        let decoder =
            symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

        Ok(Self {
            reader,
            decoder,
            track_id,
            format: StreamFormat {
                sample_rate,
                channels,
            },
        })
    }
}

/// Decoder for an audio file on disk
pub struct FileDecoder {
    path: PathBuf,
    source: Option<OpenSource>,
    format: StreamFormat,
    /// Decoded PCM not yet handed out
    pending: BytesMut,
    /// Conversion buffer, reused while the signal spec and packet size allow
    samples: Option<(SignalSpec, u64, SampleBuffer<i16>)>,
    /// The demuxer reported end of file
    exhausted: bool,
}

impl FileDecoder {
    /// Open and probe `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DecodeError> {
        let path = path.as_ref().to_path_buf();
        let source = OpenSource::open(&path)?;

        tracing::debug!(
            path = %path.display(),
            format = %source.format,
            "Opened audio source"
        );

        Ok(Self {
            format: source.format,
            path,
            source: Some(source),
            pending: BytesMut::new(),
            samples: None,
            exhausted: false,
        })
    }

    /// Path this decoder reads from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Decode one packet into `pending`, or mark the source exhausted
    fn decode_packet(&mut self) -> Result<(), DecodeError> {
        let source = self
            .source
            .as_mut()
            .ok_or_else(|| DecodeError::Io(io::Error::other("decoder is closed")))?;

        let packet = match source.reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                self.exhausted = true;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != source.track_id {
            return Ok(());
        }

        let decoded = match source.decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(msg)) => {
                // A damaged frame; the next one is usually fine
                tracing::warn!(path = %self.path.display(), error = msg, "Skipping undecodable packet");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if decoded.frames() == 0 {
            return Ok(());
        }

        let spec = *decoded.spec();
        let duration = decoded.capacity() as u64;
        let reusable = matches!(&self.samples, Some((s, d, _)) if *s == spec && *d >= duration);
        if !reusable {
            self.samples = Some((spec, duration, SampleBuffer::new(duration, spec)));
        }

        if let Some((_, _, buf)) = self.samples.as_mut() {
            buf.copy_interleaved_ref(decoded);
            let samples = buf.samples();
            self.pending.reserve(samples.len() * 2);
            for sample in samples {
                self.pending.put_i16_le(*sample);
            }
        }

        Ok(())
    }
}

impl AudioDecoder for FileDecoder {
    fn next_chunk(&mut self, chunk: &mut AudioChunk) -> Result<ChunkStatus, DecodeError> {
        loop {
            if !self.pending.is_empty() {
                let n = chunk.fill(&self.pending);
                self.pending.advance(n);
                if chunk.is_full() {
                    return Ok(ChunkStatus::Ready);
                }
            }

            if self.exhausted {
                // The tail of the file may leave a short final chunk
                return Ok(if chunk.is_empty() {
                    ChunkStatus::EndOfStream
                } else {
                    ChunkStatus::Ready
                });
            }

            self.decode_packet()?;
        }
    }

    fn rewind(&mut self) -> Result<(), DecodeError> {
        self.pending.clear();
        self.exhausted = false;

        let source = self
            .source
            .as_mut()
            .ok_or_else(|| DecodeError::Io(io::Error::other("decoder is closed")))?;

        let seek = source.reader.seek(
            SeekMode::Accurate,
            SeekTo::TimeStamp {
                ts: 0,
                track_id: source.track_id,
            },
        );

        match seek {
            Ok(_) => source.decoder.reset(),
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "Seek failed, reopening source");
                *source = OpenSource::open(&self.path)?;
            }
        }

        Ok(())
    }

    fn close(&mut self) {
        if self.source.take().is_some() {
            tracing::debug!(path = %self.path.display(), "Closed audio source");
        }
        self.pending.clear();
        self.samples = None;
    }

    fn format(&self) -> Option<StreamFormat> {
        Some(self.format)
    }
}

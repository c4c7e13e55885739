//! Broadcast loop
//!
//! Pulls chunks from the decoder and sweeps each one through the registry.
//!
//! ```text
//!              ┌──────────── EndOfStream: rewind ───────────┐
//!              ▼                                             │
//!   ┌─────────────────┐  next_chunk()  ┌──────────────────┐  │
//!   │     Running     │ ─────────────► │ broadcast_and_   │ ─┘
//!   │ (stop checked   │ ◄───────────── │ prune(chunk)     │
//!   │  every step)    │                └──────────────────┘
//!   └────────┬────────┘
//!            │ stop requested / decoder error
//!            ▼
//!   ┌─────────────────┐
//!   │     Stopped     │  close decoder, drain registry
//!   └─────────────────┘
//! ```
//!
//! Decoder calls run on the blocking pool and never overlap a sweep, so the
//! registry lock is free while the decoder works.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::decoder::{AudioDecoder, ChunkStatus, DecodeError, StreamFormat};
use crate::registry::{AudioChunk, ClientRegistry};
use crate::server::config::MIN_CHUNK_SIZE;
use crate::server::shutdown::RunState;

/// Broadcast loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Pulling and broadcasting chunks
    Running,
    /// Decoder released and consumers closed
    Stopped,
}

/// Why the loop stopped
#[derive(Debug)]
pub enum StopReason {
    /// Shutdown was requested
    Shutdown,
    /// The shared source failed; no consumer can be served
    SourceFailed(DecodeError),
}

/// Summary returned when the loop stops
#[derive(Debug)]
pub struct LoopOutcome {
    pub reason: StopReason,
    /// Chunks pulled from the decoder and broadcast
    pub chunks: u64,
    /// Times the source was rewound
    pub rewinds: u64,
    /// Consumers still registered at stop, now closed
    pub consumers_closed: usize,
}

/// Holds chunk emission to the audio clock
#[derive(Debug)]
struct Pacer {
    byte_rate: u64,
    started: Instant,
    bytes: u64,
}

impl Pacer {
    fn new(byte_rate: usize) -> Self {
        Self {
            byte_rate: byte_rate.max(1) as u64,
            started: Instant::now(),
            bytes: 0,
        }
    }

    fn play_time(&self, bytes: u64) -> Duration {
        Duration::from_secs_f64(bytes as f64 / self.byte_rate as f64)
    }

    /// Account for `len` more bytes and return when they finish playing
    fn advance(&mut self, len: usize) -> Instant {
        self.bytes += len as u64;
        let due = self.started + self.play_time(self.bytes);

        // After a long stall, restart the clock at this chunk instead of
        // bursting to catch up
        let now = Instant::now();
        if now > due + Duration::from_secs(1) {
            self.started = now;
            self.bytes = len as u64;
            return now + self.play_time(self.bytes);
        }
        due
    }
}

/// The single producer feeding every consumer
pub struct BroadcastLoop<D: AudioDecoder> {
    /// `None` only while a blocking decoder call is in flight
    decoder: Option<D>,
    chunk: Option<AudioChunk>,
    registry: Arc<ClientRegistry>,
    run_state: RunState,
    state: LoopState,
    pacer: Option<Pacer>,
    chunks: u64,
    rewinds: u64,
    chunks_since_rewind: u64,
}

impl<D: AudioDecoder> BroadcastLoop<D> {
    /// Create a loop broadcasting `chunk_size`-byte chunks from `decoder`
    ///
    /// `chunk_size` is raised to at least one byte.
    pub fn new(
        decoder: D,
        chunk_size: usize,
        registry: Arc<ClientRegistry>,
        run_state: RunState,
    ) -> Self {
        Self {
            decoder: Some(decoder),
            chunk: Some(AudioChunk::with_capacity(chunk_size.max(MIN_CHUNK_SIZE))),
            registry,
            run_state,
            state: LoopState::Running,
            pacer: None,
            chunks: 0,
            rewinds: 0,
            chunks_since_rewind: 0,
        }
    }

    /// Emit chunks no faster than `format` plays back
    ///
    /// Without pacing the loop runs as fast as the decoder and the slowest
    /// consumer allow.
    pub fn with_realtime_pacing(mut self, format: StreamFormat) -> Self {
        self.pacer = Some(Pacer::new(format.byte_rate()));
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Run until shutdown is requested or the decoder fails
    pub async fn run(mut self) -> LoopOutcome {
        tracing::info!(
            chunk_size = self.chunk.as_ref().map_or(0, AudioChunk::capacity),
            "Broadcast loop started"
        );

        let mut reason = StopReason::Shutdown;
        while self.state == LoopState::Running {
            self.state = match self.step().await {
                Ok(next) => next,
                Err(e) => {
                    tracing::error!(error = %e, "Decoder failed, stopping broadcast");
                    reason = StopReason::SourceFailed(e);
                    LoopState::Stopped
                }
            };
        }

        let consumers_closed = self.release().await;

        tracing::info!(
            chunks = self.chunks,
            rewinds = self.rewinds,
            consumers_closed = consumers_closed,
            "Broadcast loop stopped"
        );

        LoopOutcome {
            reason,
            chunks: self.chunks,
            rewinds: self.rewinds,
            consumers_closed,
        }
    }

    /// One iteration: pull a chunk and broadcast it, or rewind at end of stream
    async fn step(&mut self) -> Result<LoopState, DecodeError> {
        if self.run_state.is_stopping() {
            return Ok(LoopState::Stopped);
        }

        let status = self
            .with_decoder(|decoder, chunk| {
                chunk.clear();
                decoder.next_chunk(chunk)
            })
            .await?;

        match status {
            ChunkStatus::Ready => {
                if let Some(chunk) = self.chunk.as_ref().filter(|c| !c.is_empty()) {
                    let report = self.registry.broadcast_and_prune(chunk).await;
                    self.chunks += 1;
                    self.chunks_since_rewind += 1;

                    if report.pruned > 0 {
                        tracing::debug!(
                            delivered = report.delivered,
                            pruned = report.pruned,
                            "Sweep pruned consumers"
                        );
                    }

                    if let Some(pacer) = self.pacer.as_mut() {
                        let due = pacer.advance(chunk.len());
                        tokio::select! {
                            _ = tokio::time::sleep_until(due) => {}
                            _ = self.run_state.stopped() => {}
                        }
                    }
                }
            }
            ChunkStatus::EndOfStream => {
                if self.chunks_since_rewind == 0 {
                    return Err(DecodeError::Empty);
                }

                self.with_decoder(|decoder, _| decoder.rewind()).await?;
                self.chunks_since_rewind = 0;
                self.rewinds += 1;
                self.registry.stats().rewound();

                tracing::debug!(rewinds = self.rewinds, "End of source, rewinding");
            }
        }

        Ok(LoopState::Running)
    }

    /// Run a decoder call on the blocking pool
    async fn with_decoder<T, F>(&mut self, f: F) -> Result<T, DecodeError>
    where
        F: FnOnce(&mut D, &mut AudioChunk) -> Result<T, DecodeError> + Send + 'static,
        T: Send + 'static,
    {
        let (mut decoder, mut chunk) = match (self.decoder.take(), self.chunk.take()) {
            (Some(decoder), Some(chunk)) => (decoder, chunk),
            _ => {
                return Err(DecodeError::Io(io::Error::other(
                    "decoder is no longer available",
                )))
            }
        };

        let joined = tokio::task::spawn_blocking(move || {
            let result = f(&mut decoder, &mut chunk);
            (decoder, chunk, result)
        })
        .await;

        match joined {
            Ok((decoder, chunk, result)) => {
                self.decoder = Some(decoder);
                self.chunk = Some(chunk);
                result
            }
            Err(e) => Err(DecodeError::Corrupt(format!("decoder task failed: {e}"))),
        }
    }

    /// Release the decoder, then close every consumer
    async fn release(&mut self) -> usize {
        if let Some(mut decoder) = self.decoder.take() {
            decoder.close();
        }
        self.chunk = None;
        self.registry.drain().await
    }
}

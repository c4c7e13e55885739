//! # pcmcast
//!
//! Live raw PCM fan-out over TCP. One decoder produces audio; every
//! connected client receives the identical byte stream from the moment it
//! connects. The source loops forever.
//!
//! A client that cannot accept a whole chunk in time is disconnected rather
//! than buffered for, so memory use does not grow with slow listeners.
//!
//! ## Running a server
//!
//! ```no_run
//! use pcmcast::decoder::FileDecoder;
//! use pcmcast::{PcmServer, ServerConfig};
//!
//! # async fn example() -> pcmcast::error::Result<()> {
//! let decoder = FileDecoder::open("track.mp3")?;
//! let server = PcmServer::new(ServerConfig::default());
//!
//! // Serves until SIGINT/SIGTERM
//! server.run(decoder).await?;
//! # Ok(())
//! # }
//! ```
//!
//! Listen with e.g. `nc <host> 5016 | aplay -f S16_LE -c 2 -r 44100 -t raw`,
//! matching the format the server logs at startup.

pub mod client;
pub mod decoder;
pub mod error;
pub mod registry;
pub mod server;
pub mod stats;

pub use decoder::{AudioDecoder, ChunkStatus, DecodeError, StreamFormat};
pub use error::{Error, Result};
pub use registry::{AudioChunk, ClientRegistry, ConsumerHandle, ConsumerId};
pub use server::{PcmServer, RunState, ServerConfig};

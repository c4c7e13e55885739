//! Error types
//!
//! The crate-level [`Error`] covers everything that can stop the server.
//! Consumer write failures are not errors at this level: they are handled
//! inside the registry by pruning the consumer.

use std::io;

use crate::decoder::DecodeError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for server operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Socket or file I/O failure outside of a consumer write
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The shared audio source failed; nothing can be served
    #[error("decoder failed: {0}")]
    Decode(#[from] DecodeError),

    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A background task panicked or was cancelled
    #[error("task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::Task(e.to_string())
    }
}

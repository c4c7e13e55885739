//! PCM fan-out server
//!
//! - [`PcmServer`]: owns the registry and run state, runs everything
//! - [`Acceptor`]: turns accepted TCP connections into consumers
//! - [`BroadcastLoop`]: the single decoder-to-registry producer
//! - [`RunState`]: one-way running/stopping switch

pub mod broadcast;
pub mod config;
pub mod listener;
pub mod shutdown;

pub use broadcast::{BroadcastLoop, LoopOutcome, LoopState, StopReason};
pub use config::ServerConfig;
pub use listener::{Acceptor, ConnectionSource, PcmServer};
pub use shutdown::{shutdown_signal, RunPhase, RunState};

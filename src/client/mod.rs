//! PCM stream client
//!
//! Connects to a running server and reads the raw PCM broadcast, e.g. to
//! pipe it into a player.

pub mod receiver;

pub use receiver::PcmReceiver;

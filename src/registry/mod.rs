//! Client registry for live fan-out
//!
//! The registry owns every connected consumer and pushes each decoded chunk
//! to all of them. A consumer that cannot take a whole chunk is dropped on
//! the spot: there is no per-consumer queue.
//!
//! # Architecture
//!
//! ```text
//!                          Arc<ClientRegistry>
//!                     ┌─────────────────────────┐
//!                     │ Mutex<{                 │
//!                     │   consumers: HashMap<   │
//!                     │     ConsumerId,         │
//!                     │     ConsumerHandle>,    │
//!                     │   closed,               │
//!                     │ }>                      │
//!                     └───────────┬─────────────┘
//!                                 │
//!         ┌───────────────────────┼───────────────────────┐
//!         │                       │                       │
//!         ▼                       ▼                       ▼
//!    [Acceptor]             [Broadcast loop]          [Shutdown]
//!    registry.add()         broadcast_and_prune()     registry.drain()
//!                                 │
//!                                 └──► write_all() ──► TCP (each consumer)
//! ```
//!
//! # Ownership
//!
//! A [`ConsumerHandle`] moves into the registry on `add` and only leaves it
//! by being removed, pruned or drained. Closing consumes the handle, so no
//! consumer can be closed twice or written after removal.

pub mod chunk;
pub mod consumer;
pub mod store;

pub use chunk::AudioChunk;
pub use consumer::{ConsumerHandle, ConsumerId, ConsumerSink, WriteFailure};
pub use store::{ClientRegistry, SweepReport, DEFAULT_WRITE_TIMEOUT};

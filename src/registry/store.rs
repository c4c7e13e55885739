//! Client registry implementation
//!
//! The set of live consumers. Membership means "believed writable": a
//! consumer whose write fails is removed and closed during the same sweep.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Mutex;

use super::chunk::AudioChunk;
use super::consumer::{ConsumerHandle, ConsumerId};
use crate::stats::BroadcastStats;

/// Default time a single consumer write may take before the consumer is pruned
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Upper bound on closing one consumer's transport
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Outcome of one broadcast sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Consumers that received the full chunk
    pub delivered: usize,
    /// Consumers removed because their write failed
    pub pruned: usize,
}

struct Members {
    consumers: HashMap<ConsumerId, ConsumerHandle>,
    /// Set once the registry has been drained at shutdown
    closed: bool,
}

/// Concurrency-safe set of active consumers
///
/// Every operation takes the single membership lock for its whole duration,
/// so add, remove and sweep never interleave. The lock is never held while
/// the decoder is reading.
pub struct ClientRegistry {
    members: Mutex<Members>,
    next_id: AtomicU64,
    write_timeout: Duration,
    stats: Arc<BroadcastStats>,
}

impl ClientRegistry {
    /// Create a registry with the default write timeout
    pub fn new() -> Self {
        Self::with_write_timeout(DEFAULT_WRITE_TIMEOUT)
    }

    /// Create a registry whose sweeps give each consumer `write_timeout`
    pub fn with_write_timeout(write_timeout: Duration) -> Self {
        Self {
            members: Mutex::new(Members {
                consumers: HashMap::new(),
                closed: false,
            }),
            next_id: AtomicU64::new(1),
            write_timeout,
            stats: Arc::new(BroadcastStats::new()),
        }
    }

    /// Counters shared with the broadcast loop
    pub fn stats(&self) -> &Arc<BroadcastStats> {
        &self.stats
    }

    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    /// Register a consumer
    ///
    /// The consumer takes part in the next sweep. If the registry has already
    /// been drained the handle is closed straight away.
    pub async fn add(&self, handle: ConsumerHandle) -> ConsumerId {
        let id = ConsumerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let peer = handle.peer_addr();

        let mut members = self.members.lock().await;
        if members.closed {
            drop(members);
            tracing::debug!(consumer_id = %id, peer = ?peer, "Registry closed, dropping consumer");
            handle.close(CLOSE_TIMEOUT).await;
            return id;
        }

        members.consumers.insert(id, handle);
        self.stats.consumer_added();

        tracing::info!(
            consumer_id = %id,
            peer = ?peer,
            consumers = members.consumers.len(),
            "Consumer added"
        );

        id
    }

    /// Remove and close a consumer
    ///
    /// Removing a consumer that is no longer registered is a no-op. Returns
    /// whether the consumer was present.
    pub async fn remove(&self, id: ConsumerId) -> bool {
        let handle = {
            let mut members = self.members.lock().await;
            members.consumers.remove(&id)
        };

        match handle {
            Some(handle) => {
                tracing::debug!(consumer_id = %id, "Consumer removed");
                handle.close(CLOSE_TIMEOUT).await;
                true
            }
            None => false,
        }
    }

    /// Write `chunk` to every consumer and prune the ones that fail
    ///
    /// All writes of a sweep run concurrently, each consumer exactly once.
    /// Failed consumers are removed and closed before this returns.
    pub async fn broadcast_and_prune(&self, chunk: &AudioChunk) -> SweepReport {
        let data = chunk.as_bytes();
        let timeout = self.write_timeout;

        let mut members = self.members.lock().await;

        let writes = members.consumers.iter_mut().map(|(id, handle)| async move {
            (*id, handle.write_all(data, timeout).await)
        });
        let results = join_all(writes).await;

        let mut report = SweepReport::default();
        let mut dead = Vec::new();
        for (id, result) in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(failure) => {
                    if let Some(handle) = members.consumers.remove(&id) {
                        tracing::warn!(
                            consumer_id = %id,
                            peer = ?handle.peer_addr(),
                            bytes_sent = handle.bytes_sent(),
                            reason = %failure,
                            "Pruning consumer"
                        );
                        dead.push(handle);
                    }
                }
            }
        }
        report.pruned = dead.len();
        drop(members);

        for handle in dead {
            handle.close(CLOSE_TIMEOUT).await;
        }

        self.stats.sweep_done(data.len(), report);
        report
    }

    /// Close every remaining consumer and refuse further additions
    ///
    /// Returns the number of consumers closed. Calling it again closes nothing.
    pub async fn drain(&self) -> usize {
        let drained: Vec<(ConsumerId, ConsumerHandle)> = {
            let mut members = self.members.lock().await;
            members.closed = true;
            members.consumers.drain().collect()
        };

        let count = drained.len();
        for (id, handle) in drained {
            tracing::debug!(consumer_id = %id, bytes_sent = handle.bytes_sent(), "Closing consumer");
            handle.close(CLOSE_TIMEOUT).await;
        }

        if count > 0 {
            tracing::info!(consumers = count, "Registry drained");
        }
        count
    }

    /// Number of registered consumers
    pub async fn len(&self) -> usize {
        self.members.lock().await.consumers.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Whether `id` is still registered
    pub async fn contains(&self, id: ConsumerId) -> bool {
        self.members.lock().await.consumers.contains_key(&id)
    }

    /// Whether [`drain`](Self::drain) has run
    pub async fn is_closed(&self) -> bool {
        self.members.lock().await.closed
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

//! Statistics for the broadcast

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::registry::SweepReport;

/// Server-wide counters, updated by the registry and the broadcast loop
#[derive(Debug)]
pub struct BroadcastStats {
    started_at: Instant,
    consumers_added: AtomicU64,
    consumers_pruned: AtomicU64,
    sweeps: AtomicU64,
    bytes_delivered: AtomicU64,
    rewinds: AtomicU64,
}

/// Point-in-time copy of [`BroadcastStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Consumers ever registered
    pub consumers_added: u64,
    /// Consumers dropped after a failed write
    pub consumers_pruned: u64,
    /// Broadcast sweeps performed
    pub sweeps: u64,
    /// Bytes delivered, summed over all consumers
    pub bytes_delivered: u64,
    /// Times the source was rewound to its start
    pub rewinds: u64,
    /// Time since the counters were created
    pub uptime: Duration,
}

impl BroadcastStats {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            consumers_added: AtomicU64::new(0),
            consumers_pruned: AtomicU64::new(0),
            sweeps: AtomicU64::new(0),
            bytes_delivered: AtomicU64::new(0),
            rewinds: AtomicU64::new(0),
        }
    }

    pub(crate) fn consumer_added(&self) {
        self.consumers_added.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn sweep_done(&self, chunk_len: usize, report: SweepReport) {
        self.sweeps.fetch_add(1, Ordering::Relaxed);
        self.consumers_pruned
            .fetch_add(report.pruned as u64, Ordering::Relaxed);
        self.bytes_delivered.fetch_add(
            chunk_len as u64 * report.delivered as u64,
            Ordering::Relaxed,
        );
    }

    pub(crate) fn rewound(&self) {
        self.rewinds.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot of all counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            consumers_added: self.consumers_added.load(Ordering::Relaxed),
            consumers_pruned: self.consumers_pruned.load(Ordering::Relaxed),
            sweeps: self.sweeps.load(Ordering::Relaxed),
            bytes_delivered: self.bytes_delivered.load(Ordering::Relaxed),
            rewinds: self.rewinds.load(Ordering::Relaxed),
            uptime: self.started_at.elapsed(),
        }
    }
}

impl Default for BroadcastStats {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsSnapshot {
    /// Average delivered throughput in bits per second
    pub fn bitrate(&self) -> u64 {
        let secs = self.uptime.as_secs();
        if secs > 0 {
            (self.bytes_delivered * 8) / secs
        } else {
            0
        }
    }
}

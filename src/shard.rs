//! Bounded per-shard queues.
//!
//! Points are partitioned over a fixed set of shards by series fingerprint,
//! so all points of one series traverse the same FIFO and per-series arrival
//! order survives end to end.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

use crate::backend::TimeSeries;
use crate::metrics::ExportMetrics;

/// One queued point together with its series fingerprint.
#[derive(Debug, Clone)]
pub(crate) struct QueueEntry {
    pub hash: u64,
    pub series: TimeSeries,
}

/// A bounded FIFO holding pending points for a subset of series.
///
/// Producers offer concurrently; only the drainer consumes. The `leases`
/// count tracks how many in-flight batches carry points from this shard;
/// the drainer skips a shard while any lease is held, which bounds fan-out
/// to one in-flight batch per shard on the normal path.
pub(crate) struct Shard {
    queue: ArrayQueue<QueueEntry>,
    leases: AtomicUsize,
    metrics: Arc<ExportMetrics>,
}

impl Shard {
    pub fn new(capacity: usize, metrics: Arc<ExportMetrics>) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            leases: AtomicUsize::new(0),
            metrics,
        }
    }

    /// Offer a point. Never blocks: when the queue is full the point is
    /// dropped and counted. Every offer counts as an export attempt.
    pub fn enqueue(&self, hash: u64, series: TimeSeries) {
        self.metrics.inc_samples_exported();
        if self.queue.push(QueueEntry { hash, series }).is_err() {
            self.metrics.inc_samples_dropped();
        }
    }

    /// Pop the oldest queued point, if any.
    pub fn get(&self) -> Option<QueueEntry> {
        self.queue.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Whether any in-flight batch carries points from this shard.
    pub fn is_pending(&self) -> bool {
        self.leases.load(Ordering::Acquire) > 0
    }

    /// Taken by the drainer when points from this shard enter a batch.
    pub fn take_lease(&self) {
        self.leases.fetch_add(1, Ordering::AcqRel);
    }

    /// Released by the send task once its batch is done.
    pub fn release_lease(&self) {
        self.leases.fetch_sub(1, Ordering::AcqRel);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

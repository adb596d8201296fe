//! Export pipeline counters.
//!
//! Six counters form the observable contract of the pipeline. They are
//! plain atomics so the hot path (producers, drainer, send tasks) can
//! advance them without synchronization, and so tests can read them back;
//! [`ExportMetrics::register`] bridges them to a host OpenTelemetry meter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use opentelemetry::metrics::Meter;

/// Counters for the export pipeline.
#[derive(Debug, Default)]
pub struct ExportMetrics {
    samples_exported: AtomicU64,
    samples_dropped: AtomicU64,
    samples_sent: AtomicU64,
    send_iterations: AtomicU64,
    shard_process: AtomicU64,
    shard_process_pending: AtomicU64,
}

impl ExportMetrics {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn inc_samples_exported(&self) {
        self.samples_exported.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_samples_dropped(&self) {
        self.samples_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_samples_sent(&self, n: u64) {
        self.samples_sent.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn inc_send_iterations(&self) {
        self.send_iterations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_shard_process(&self) {
        self.shard_process.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_shard_process_pending(&self) {
        self.shard_process_pending.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of samples offered to shard queues at scrape time.
    pub fn samples_exported_total(&self) -> u64 {
        self.samples_exported.load(Ordering::Relaxed)
    }

    /// Number of offered samples dropped because their shard queue was full.
    pub fn samples_dropped_total(&self) -> u64 {
        self.samples_dropped.load(Ordering::Relaxed)
    }

    /// Number of samples handed to the backend. Counts attempts: failed and
    /// aborted sends are included.
    pub fn samples_sent_total(&self) -> u64 {
        self.samples_sent.load(Ordering::Relaxed)
    }

    /// Number of wake-driven drain passes.
    pub fn send_iterations_total(&self) -> u64 {
        self.send_iterations.load(Ordering::Relaxed)
    }

    /// Number of shard visits during drain passes.
    pub fn shard_process_total(&self) -> u64 {
        self.shard_process.load(Ordering::Relaxed)
    }

    /// Number of shard visits skipped because the shard was pending.
    pub fn shard_process_pending_total(&self) -> u64 {
        self.shard_process_pending.load(Ordering::Relaxed)
    }

    /// Register the six counters with a host meter as observable counters.
    pub fn register(self: &Arc<Self>, meter: &Meter) {
        let instruments: [(&str, &str, fn(&ExportMetrics) -> u64); 6] = [
            (
                "samples_exported_total",
                "Number of samples exported at scrape time.",
                ExportMetrics::samples_exported_total,
            ),
            (
                "samples_dropped_total",
                "Number of exported samples that were dropped because shard queues were full.",
                ExportMetrics::samples_dropped_total,
            ),
            (
                "samples_sent_total",
                "Number of exported samples sent to the backend.",
                ExportMetrics::samples_sent_total,
            ),
            (
                "send_iterations_total",
                "Number of processing iterations of the sample export send handler.",
                ExportMetrics::send_iterations_total,
            ),
            (
                "shard_process_total",
                "Number of shard retrievals.",
                ExportMetrics::shard_process_total,
            ),
            (
                "shard_process_pending_total",
                "Number of shard retrievals skipped because the shard was pending.",
                ExportMetrics::shard_process_pending_total,
            ),
        ];

        for (name, description, read) in instruments {
            let metrics = Arc::clone(self);
            let _ = meter
                .u64_observable_counter(name.to_string())
                .with_description(description.to_string())
                .with_callback(move |observer| observer.observe(read(&metrics), &[]))
                .init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = ExportMetrics::new();
        metrics.inc_samples_exported();
        metrics.inc_samples_exported();
        metrics.inc_samples_dropped();
        metrics.add_samples_sent(200);
        metrics.inc_send_iterations();
        metrics.inc_shard_process();
        metrics.inc_shard_process_pending();

        assert_eq!(metrics.samples_exported_total(), 2);
        assert_eq!(metrics.samples_dropped_total(), 1);
        assert_eq!(metrics.samples_sent_total(), 200);
        assert_eq!(metrics.send_iterations_total(), 1);
        assert_eq!(metrics.shard_process_total(), 1);
        assert_eq!(metrics.shard_process_pending_total(), 1);
    }
}

//! Exporter core: enqueue path, drain/batch loop, send dispatcher.
//!
//! Producers hash each built point into one of a fixed set of bounded shard
//! queues, which preserves per-series arrival order while letting scrapes
//! run in parallel. A single drainer assembles bounded batches across
//! shards, never putting two points of one series into the same write, and
//! detached send tasks carry the batches to the backend. Everything here is
//! in-memory: buffered points do not survive a crash or shutdown, and
//! failed writes are logged and counted, never retried.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::backend::{BackendHandle, CreateTimeSeriesRequest, MetricBackend, TimeSeries};
use crate::builder::SampleBuilder;
use crate::cache::SeriesCache;
use crate::config::ExporterOpts;
use crate::metrics::ExportMetrics;
use crate::series::{RefSample, Target};
use crate::shard::Shard;
use crate::{Error, Result};

/// Number of shards by which series are bucketed.
pub const SHARD_COUNT: usize = 512;
/// Buffer size for each individual shard.
pub const SHARD_BUFFER_SIZE: usize = 2048;
/// Maximum number of samples to pack into one batched write.
pub const BATCH_SIZE_MAX: usize = 200;
/// Time after which an accumulating batch is flushed regardless of size.
/// Keeping it short generally prevents two scrapes of the same target from
/// landing in the same batch, which the backend would reject.
pub const BATCH_DELAY_MAX: Duration = Duration::from_secs(5);

/// The batch under assembly: its points, the fingerprints they carry, and
/// the shard leases to release once the batch has been sent.
struct BatchState {
    series: Vec<TimeSeries>,
    seen: HashSet<u64>,
    releases: Vec<Arc<Shard>>,
}

/// A finished batch captured by value for one send task.
struct BatchPayload {
    series: Vec<TimeSeries>,
    releases: Vec<Arc<Shard>>,
}

impl BatchState {
    fn new() -> Self {
        Self {
            series: Vec::with_capacity(BATCH_SIZE_MAX),
            seen: HashSet::with_capacity(BATCH_SIZE_MAX),
            releases: Vec::new(),
        }
    }

    fn len(&self) -> usize {
        self.series.len()
    }

    fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    fn contains(&self, hash: u64) -> bool {
        self.seen.contains(&hash)
    }

    fn push(&mut self, hash: u64, series: TimeSeries) {
        self.seen.insert(hash);
        self.series.push(series);
    }

    /// Take a lease on `shard` for the current batch.
    fn attach(&mut self, shard: &Arc<Shard>) {
        shard.take_lease();
        self.releases.push(Arc::clone(shard));
    }

    /// Hand off the accumulated batch and reset for the next one.
    fn take(&mut self) -> BatchPayload {
        self.seen.clear();
        BatchPayload {
            series: std::mem::replace(&mut self.series, Vec::with_capacity(BATCH_SIZE_MAX)),
            releases: std::mem::take(&mut self.releases),
        }
    }
}

struct DrainOutcome {
    visited: usize,
    /// The pass ended early with queued points left behind; the caller must
    /// re-signal the wake channel.
    cut_short: bool,
}

/// Converts scraped samples into batched time-series writes.
pub struct Exporter {
    opts: ExporterOpts,
    /// Precomputed `projects/<project_id>` write target.
    write_target: String,
    backend: BackendHandle,
    series_cache: Arc<SeriesCache>,
    builder: SampleBuilder,
    shards: Vec<Arc<Shard>>,
    metrics: Arc<ExportMetrics>,
    /// Edge-trigger signaling that there may be more work. Concurrent
    /// signals coalesce into a single stored permit.
    next: Notify,
}

impl Exporter {
    /// Create a new exporter. Fails when no project ID is configured.
    pub fn new(opts: ExporterOpts, backend: BackendHandle) -> Result<Self> {
        if opts.project_id.is_empty() {
            return Err(Error::Config("project ID missing".to_string()));
        }

        let metrics = ExportMetrics::new();
        let series_cache = Arc::new(SeriesCache::new(opts.project_id.clone()));
        let builder = SampleBuilder::new(Arc::clone(&series_cache));
        let shards = (0..SHARD_COUNT)
            .map(|_| Arc::new(Shard::new(SHARD_BUFFER_SIZE, Arc::clone(&metrics))))
            .collect();
        let write_target = format!("projects/{}", opts.project_id);

        Ok(Self {
            opts,
            write_target,
            backend,
            series_cache,
            builder,
            shards,
            metrics,
            next: Notify::new(),
        })
    }

    pub fn opts(&self) -> &ExporterOpts {
        &self.opts
    }

    /// Counter surface of this exporter.
    pub fn metrics(&self) -> Arc<ExportMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Install the function resolving series refs to label sets. Must be
    /// called before any call to [`Exporter::export`].
    pub fn set_labels_by_ref_func<F>(&self, f: F)
    where
        F: Fn(u64) -> crate::series::LabelSet + Send + Sync + 'static,
    {
        self.series_cache.set_labels_by_ref_func(f);
    }

    /// Enqueue the samples of one scrape for export.
    ///
    /// Drives the builder over the slice, hashes every emitted point into
    /// its shard, and signals the drainer. Never blocks on the drainer or
    /// the backend; a full shard queue drops the point.
    ///
    /// Panics when the builder reports a precondition violation (no label
    /// lookup installed) — that is a programming error, not a runtime
    /// condition.
    pub fn export(&self, target: &Target, samples: &[RefSample]) {
        let mut remaining = samples;
        while !remaining.is_empty() {
            let (emitted, rest) = match self.builder.next(target, remaining) {
                Ok(step) => step,
                Err(err) => panic!("sample builder precondition violated: {err}"),
            };
            if let Some((hash, series)) = emitted {
                self.enqueue(hash, series);
            }
            remaining = rest;
        }
        // Signal that new data is available.
        self.trigger_next();
    }

    fn enqueue(&self, hash: u64, series: TimeSeries) {
        let idx = (hash % self.shards.len() as u64) as usize;
        self.shards[idx].enqueue(hash, series);
    }

    fn trigger_next(&self) {
        self.next.notify_one();
    }

    /// Drive the drain/batch loop until `shutdown` is cancelled.
    ///
    /// Also runs the series-cache housekeeping task. Cancellation stops the
    /// loop immediately and aborts in-flight sends through the same token;
    /// points still buffered in shard queues are lost.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        {
            let cache = Arc::clone(&self.series_cache);
            let cache_shutdown = shutdown.clone();
            tokio::spawn(async move { cache.run(cache_shutdown).await });
        }

        let mut state = BatchState::new();
        let mut shard_offset = 0usize;
        let mut deadline = Instant::now() + BATCH_DELAY_MAX;

        loop {
            tokio::select! {
                // Polled in order: a cancelled context must never lose the
                // race against a stored wake permit.
                biased;
                _ = shutdown.cancelled() => return Ok(()),
                _ = self.next.notified() => {
                    self.metrics.inc_send_iterations();

                    let mut sent = false;
                    let outcome = {
                        let mut sink = |payload: BatchPayload| {
                            self.dispatch(payload, &shutdown);
                            sent = true;
                        };
                        self.drain_pass(&mut state, shard_offset, &mut sink)
                    };

                    shard_offset = (shard_offset + outcome.visited) % self.shards.len();
                    if sent {
                        deadline = Instant::now() + BATCH_DELAY_MAX;
                    }
                    if outcome.cut_short {
                        // Queued points were left behind; run another pass
                        // promptly instead of waiting for the next scrape.
                        self.trigger_next();
                    }
                }
                _ = sleep_until(deadline) => {
                    if !state.is_empty() {
                        debug!(samples = state.len(), "flushing batch on deadline");
                        self.dispatch(state.take(), &shutdown);
                    }
                    deadline = Instant::now() + BATCH_DELAY_MAX;
                }
            }
        }
    }

    /// One traversal of the shard set starting at `shard_offset`.
    ///
    /// Shards represented in an in-flight batch are skipped. Each remaining
    /// shard is pulled until it is empty or the batch fills; a fingerprint
    /// already present in the batch forces a send so no write ever carries
    /// two points of one series. A cap-out that leaves the current shard
    /// non-empty ends the pass, so the next pass resumes at that shard.
    fn drain_pass(
        &self,
        state: &mut BatchState,
        shard_offset: usize,
        sink: &mut dyn FnMut(BatchPayload),
    ) -> DrainOutcome {
        let shard_count = self.shards.len();
        let mut visited = 0;
        let mut cut_short = false;

        for i in 0..shard_count {
            let shard = &self.shards[(shard_offset + i) % shard_count];
            visited += 1;
            self.metrics.inc_shard_process();

            if shard.is_pending() {
                self.metrics.inc_shard_process_pending();
                continue;
            }

            // Whether the shard holds a lease for the batch under assembly.
            let mut contributed = false;
            while state.len() < BATCH_SIZE_MAX {
                let Some(entry) = shard.get() else { break };
                if state.contains(entry.hash) {
                    // The batch already carries this series; ship it and put
                    // the new point into the fresh one.
                    sink(state.take());
                    contributed = false;
                }
                if !contributed {
                    state.attach(shard);
                    contributed = true;
                }
                state.push(entry.hash, entry.series);
            }

            if state.len() == BATCH_SIZE_MAX {
                sink(state.take());
                if !shard.is_empty() {
                    cut_short = true;
                    break;
                }
            }
        }

        DrainOutcome { visited, cut_short }
    }

    /// Launch one detached send for a finished batch.
    ///
    /// The send aborts on cancellation. `samples_sent_total` advances by the
    /// batch size in every case — it counts attempts, not deliveries — and
    /// the shard leases are released so the drainer may visit those shards
    /// again.
    fn dispatch(&self, payload: BatchPayload, shutdown: &CancellationToken) {
        let BatchPayload { series, releases } = payload;
        debug_assert!(!series.is_empty());

        let request = CreateTimeSeriesRequest {
            time_series: series,
            name: self.write_target.clone(),
        };
        let count = request.time_series.len() as u64;
        let backend = Arc::clone(&self.backend);
        let metrics = Arc::clone(&self.metrics);
        let shutdown = shutdown.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!(samples = count, "send aborted by shutdown");
                }
                result = backend.create_time_series(request) => {
                    if let Err(err) = result {
                        // No retry: a retried batch would need per-series
                        // dedup and would hold shard leases across attempts.
                        error!(error = %err, samples = count, "send batch");
                    }
                }
            }
            metrics.add_samples_sent(count);
            for shard in releases {
                shard.release_lease();
            }
        });
    }
}

static GLOBAL_EXPORTER: OnceLock<Exporter> = OnceLock::new();

/// Initialize the process-wide exporter instance.
///
/// The ingestion path reaches the exporter from deep call sites where
/// threading a handle through every function is impractical; prefer
/// dependency injection where feasible. A second initialization is a
/// configuration error.
pub fn init_global(opts: ExporterOpts, backend: BackendHandle) -> Result<&'static Exporter> {
    let exporter = Exporter::new(opts, backend)?;
    match GLOBAL_EXPORTER.set(exporter) {
        Ok(()) => Ok(global()),
        Err(_) => Err(Error::Config(
            "global exporter already initialized".to_string(),
        )),
    }
}

/// The process-wide exporter instance.
///
/// Panics when called before [`init_global`]; that is a programming error.
pub fn global() -> &'static Exporter {
    GLOBAL_EXPORTER
        .get()
        .expect("global exporter used before initialization")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Metric, Point};
    use async_trait::async_trait;

    struct NoopBackend;

    #[async_trait]
    impl MetricBackend for NoopBackend {
        async fn create_time_series(&self, _req: CreateTimeSeriesRequest) -> Result<()> {
            Ok(())
        }
    }

    fn exporter() -> Exporter {
        Exporter::new(
            ExporterOpts {
                project_id: "test-project".to_string(),
                ..Default::default()
            },
            Arc::new(NoopBackend),
        )
        .unwrap()
    }

    fn series(tag: &str) -> TimeSeries {
        TimeSeries {
            metric: Some(Metric {
                r#type: format!("external.googleapis.com/prometheus/{tag}"),
                labels: Default::default(),
            }),
            resource: None,
            metric_kind: 1,
            value_type: 3,
            points: vec![Point::default()],
        }
    }

    fn collect_sink(collected: &mut Vec<BatchPayload>) -> impl FnMut(BatchPayload) + '_ {
        move |payload| collected.push(payload)
    }

    #[test]
    fn new_requires_project_id() {
        let result = Exporter::new(ExporterOpts::default(), Arc::new(NoopBackend));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn enqueue_maps_hash_mod_shard_count() {
        let e = exporter();
        e.enqueue(7, series("a"));
        e.enqueue(7 + SHARD_COUNT as u64, series("b"));
        e.enqueue(8, series("c"));
        assert_eq!(e.shards[7].len(), 2);
        assert_eq!(e.shards[8].len(), 1);
    }

    #[test]
    fn drain_collects_distinct_series_into_one_batch() {
        let e = exporter();
        e.enqueue(100, series("a"));
        e.enqueue(101, series("b"));

        let mut state = BatchState::new();
        let mut batches = Vec::new();
        let outcome = {
            let mut sink = collect_sink(&mut batches);
            e.drain_pass(&mut state, 0, &mut sink)
        };

        // Both points fit: nothing shipped yet, batch holds both in
        // enqueue order, both shards are pending.
        assert!(batches.is_empty());
        assert_eq!(state.len(), 2);
        assert_eq!(outcome.visited, SHARD_COUNT);
        assert!(!outcome.cut_short);
        assert!(e.shards[100].is_pending());
        assert!(e.shards[101].is_pending());

        let payload = state.take();
        assert_eq!(payload.series.len(), 2);
        assert_eq!(
            payload.series[0].metric.as_ref().unwrap().r#type,
            "external.googleapis.com/prometheus/a"
        );
        for shard in payload.releases {
            shard.release_lease();
        }
        assert!(!e.shards[100].is_pending());
        assert!(!e.shards[101].is_pending());
    }

    #[test]
    fn duplicate_series_in_one_pass_splits_batches() {
        let e = exporter();
        e.enqueue(100, series("t0"));
        e.enqueue(100, series("t1"));

        let mut state = BatchState::new();
        let mut batches = Vec::new();
        {
            let mut sink = collect_sink(&mut batches);
            e.drain_pass(&mut state, 0, &mut sink);
        }

        // The first point shipped alone; the second went into the fresh
        // batch, in arrival order.
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].series.len(), 1);
        assert_eq!(
            batches[0].series[0].metric.as_ref().unwrap().r#type,
            "external.googleapis.com/prometheus/t0"
        );
        assert_eq!(state.len(), 1);

        // The shard holds one lease per batch carrying its points.
        assert!(e.shards[100].is_pending());
        for shard in batches.remove(0).releases {
            shard.release_lease();
        }
        assert!(e.shards[100].is_pending());
        for shard in state.take().releases {
            shard.release_lease();
        }
        assert!(!e.shards[100].is_pending());
    }

    #[test]
    fn pending_shard_is_skipped_and_counted() {
        let e = exporter();
        e.enqueue(100, series("a"));
        e.shards[100].take_lease();

        let mut state = BatchState::new();
        let mut batches = Vec::new();
        {
            let mut sink = collect_sink(&mut batches);
            e.drain_pass(&mut state, 0, &mut sink);
        }

        assert!(batches.is_empty());
        assert!(state.is_empty());
        assert_eq!(e.shards[100].len(), 1);
        assert_eq!(e.metrics.shard_process_total(), SHARD_COUNT as u64);
        assert_eq!(e.metrics.shard_process_pending_total(), 1);
    }

    #[test]
    fn cap_out_sends_and_cuts_the_pass_short() {
        let e = exporter();
        // 201 distinct series all mapped to shard 7.
        for k in 0..=BATCH_SIZE_MAX as u64 {
            e.enqueue(7 + k * SHARD_COUNT as u64, series(&format!("s{k}")));
        }

        let mut state = BatchState::new();
        let mut batches = Vec::new();
        let outcome = {
            let mut sink = collect_sink(&mut batches);
            e.drain_pass(&mut state, 0, &mut sink)
        };

        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].series.len(), BATCH_SIZE_MAX);
        assert!(state.is_empty());
        // One point is still queued; the pass ended at shard 7.
        assert_eq!(e.shards[7].len(), 1);
        assert!(outcome.cut_short);
        assert_eq!(outcome.visited, 8);
    }

    #[test]
    fn cap_out_on_emptied_shard_continues_walking() {
        let e = exporter();
        for k in 0..BATCH_SIZE_MAX as u64 {
            e.enqueue(7 + k * SHARD_COUNT as u64, series(&format!("s{k}")));
        }
        e.enqueue(8, series("later"));

        let mut state = BatchState::new();
        let mut batches = Vec::new();
        let outcome = {
            let mut sink = collect_sink(&mut batches);
            e.drain_pass(&mut state, 0, &mut sink)
        };

        // Shard 7 capped the batch but was emptied, so the walk went on and
        // picked up shard 8 into the next batch.
        assert_eq!(batches.len(), 1);
        assert!(!outcome.cut_short);
        assert_eq!(outcome.visited, SHARD_COUNT);
        assert_eq!(state.len(), 1);
        assert!(e.shards[8].is_pending());
    }

    #[test]
    fn rotation_resumes_where_a_cut_pass_ended() {
        let e = exporter();
        for k in 0..=BATCH_SIZE_MAX as u64 {
            e.enqueue(5 + k * SHARD_COUNT as u64, series(&format!("s{k}")));
        }

        let mut state = BatchState::new();
        let mut batches = Vec::new();
        let outcome = {
            let mut sink = collect_sink(&mut batches);
            e.drain_pass(&mut state, 0, &mut sink)
        };
        assert!(outcome.cut_short);
        // Next pass starts at the shard that capped out.
        assert_eq!(outcome.visited % SHARD_COUNT, 6 % SHARD_COUNT);

        // Release the in-flight batch, then resume from the rotated offset.
        for shard in batches.remove(0).releases {
            shard.release_lease();
        }
        let offset = outcome.visited % SHARD_COUNT;
        // The leftover point lives in shard 5, one slot before the offset;
        // a full rotation still reaches it.
        let outcome = {
            let mut sink = collect_sink(&mut batches);
            e.drain_pass(&mut state, offset, &mut sink)
        };
        assert!(!outcome.cut_short);
        assert_eq!(state.len(), 1);
        assert!(e.shards[5].is_empty());
    }
}

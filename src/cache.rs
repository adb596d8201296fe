//! Series metadata cache.
//!
//! Maps opaque series refs to the backend-shaped descriptor a point needs:
//! metric type, monitored-resource labels, projected metric labels, kind and
//! value type, plus the fingerprint used for sharding. Entries materialize
//! lazily through the lookup installed by the ingestion path and are fully
//! built before insertion, so concurrent readers observe either a miss or a
//! complete entry. A housekeeping task evicts idle entries, which is what
//! picks up relabel changes and target churn: the next sample re-resolves.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::backend::{MetricKind, Point, Timestamp, TimeInterval, TypedValue, ValueType};
use crate::series::{
    Label, LabelSet, RefSample, Target, INSTANCE_LABEL, JOB_LABEL, LE_LABEL, METRIC_NAME_LABEL,
};
use crate::{Error, Result};

/// Prefix of metric type URLs written to the backend.
const METRIC_TYPE_PREFIX: &str = "external.googleapis.com/prometheus";

/// Monitored resource type all series are written against.
const RESOURCE_TYPE: &str = "prometheus_target";

/// Entries idle longer than this are evicted and re-resolved on next sight.
const REFRESH_HORIZON: Duration = Duration::from_secs(10 * 60);

type LabelsByRefFn = Arc<dyn Fn(u64) -> LabelSet + Send + Sync>;

/// Role of one series within a classic histogram exposition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum HistogramPart {
    /// A `<base>_bucket` series; carries the upper bound from its `le` label.
    Bucket(f64),
    Sum,
    Count,
}

/// Histogram membership of a series, derived from its name suffix and `le`
/// label. All members of one histogram share `group_key`, the fingerprint of
/// the joined series (labels minus `le`, name stripped of its suffix).
#[derive(Debug)]
pub(crate) struct HistogramMember {
    pub part: HistogramPart,
    pub group_key: u64,
    /// Metric type URL of the joined series.
    pub base_type: String,
}

/// Reset tracking for a cumulative series.
#[derive(Debug, Clone, Copy)]
struct ResetState {
    /// Timestamp the current accumulation started at.
    reset_ms: i64,
    /// Raw counter value at the reset point; emitted values are deltas
    /// against it.
    reset_value: f64,
    last_value: f64,
}

/// A fully resolved series descriptor.
#[derive(Debug)]
pub(crate) struct SeriesEntry {
    pub fingerprint: u64,
    pub kind: MetricKind,
    pub value_type: ValueType,
    pub metric_type: String,
    pub metric_labels: HashMap<String, String>,
    pub resource_labels: HashMap<String, String>,
    /// Set when this series is part of a classic histogram exposition.
    pub histogram: Option<HistogramMember>,
    tombstone: bool,
    last_used: AtomicU64,
    cumulative: Mutex<Option<ResetState>>,
}

impl SeriesEntry {
    fn tombstone(now: u64) -> Self {
        Self {
            fingerprint: 0,
            kind: MetricKind::Unspecified,
            value_type: ValueType::Unspecified,
            metric_type: String::new(),
            metric_labels: HashMap::new(),
            resource_labels: HashMap::new(),
            histogram: None,
            tombstone: true,
            last_used: AtomicU64::new(now),
            cumulative: Mutex::new(None),
        }
    }

    fn touch(&self, now: u64) {
        self.last_used.store(now, Ordering::Relaxed);
    }

    /// Build the point for a gauge sample.
    pub fn gauge_point(&self, sample: &RefSample) -> Point {
        Point {
            interval: Some(TimeInterval {
                end_time: Some(Timestamp::from_millis(sample.timestamp_ms)),
                start_time: None,
            }),
            value: Some(TypedValue::double(sample.value)),
        }
    }

    /// Build the point for a cumulative sample, tracking counter resets.
    ///
    /// The first sample of a series establishes the reset point and emits
    /// nothing; so does a value regression, which re-arms the reset point.
    /// Emitted points report the delta since the reset value over the
    /// interval `[reset, sample]`, which must be non-empty.
    pub fn cumulative_point(&self, sample: &RefSample) -> Option<Point> {
        let mut state = self
            .cumulative
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match state.as_mut() {
            None => {
                *state = Some(ResetState {
                    reset_ms: sample.timestamp_ms,
                    reset_value: sample.value,
                    last_value: sample.value,
                });
                None
            }
            Some(reset) => {
                if sample.value < reset.last_value {
                    *reset = ResetState {
                        reset_ms: sample.timestamp_ms,
                        reset_value: sample.value,
                        last_value: sample.value,
                    };
                    return None;
                }
                if sample.timestamp_ms <= reset.reset_ms {
                    return None;
                }
                reset.last_value = sample.value;
                Some(Point {
                    interval: Some(TimeInterval {
                        end_time: Some(Timestamp::from_millis(sample.timestamp_ms)),
                        start_time: Some(Timestamp::from_millis(reset.reset_ms)),
                    }),
                    value: Some(TypedValue::double(sample.value - reset.reset_value)),
                })
            }
        }
    }
}

/// Cumulative histogram state assembled from one scrape: total count, total
/// sum, and cumulative bucket values by ascending upper bound.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DistributionSnapshot {
    pub timestamp_ms: i64,
    pub count: f64,
    pub sum: f64,
    pub buckets: Vec<(f64, f64)>,
}

/// Growth of a histogram since its reset point. Bucket values stay
/// cumulative-within-the-histogram; only the reset baseline is subtracted.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DistributionDelta {
    pub start_ms: i64,
    pub count: f64,
    pub sum: f64,
    pub buckets: Vec<(f64, f64)>,
}

struct DistributionState {
    reset: DistributionSnapshot,
    last_count: f64,
}

struct HistogramResetEntry {
    last_used: AtomicU64,
    state: Mutex<Option<DistributionState>>,
}

/// Write-through cache from series refs to descriptors.
pub struct SeriesCache {
    project_id: String,
    entries: DashMap<u64, Arc<SeriesEntry>>,
    /// Reset tracking for joined histogram series, keyed by group fingerprint.
    histogram_resets: DashMap<u64, HistogramResetEntry>,
    labels_by_ref: RwLock<Option<LabelsByRefFn>>,
    epoch: Instant,
    refresh_horizon: Duration,
}

impl SeriesCache {
    pub(crate) fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            entries: DashMap::new(),
            histogram_resets: DashMap::new(),
            labels_by_ref: RwLock::new(None),
            epoch: Instant::now(),
            refresh_horizon: REFRESH_HORIZON,
        }
    }

    /// Install the ref → label set lookup. Must happen before the first
    /// sample is built.
    pub(crate) fn set_labels_by_ref_func<F>(&self, f: F)
    where
        F: Fn(u64) -> LabelSet + Send + Sync + 'static,
    {
        let mut guard = self
            .labels_by_ref
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *guard = Some(Arc::new(f));
    }

    /// Resolve a ref to its descriptor, materializing it on first sight.
    ///
    /// Returns `Ok(None)` for refs whose lookup yields an empty label set or
    /// no metric name; those insert a tombstone so repeated misses stay
    /// cheap. Errors only when no lookup is installed.
    pub(crate) fn get_or_create(
        &self,
        series_ref: u64,
        target: &Target,
    ) -> Result<Option<Arc<SeriesEntry>>> {
        let now = self.tick();
        if let Some(entry) = self.entries.get(&series_ref) {
            entry.touch(now);
            if entry.tombstone {
                return Ok(None);
            }
            return Ok(Some(entry.value().clone()));
        }

        let lookup = {
            let guard = self
                .labels_by_ref
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            guard.clone().ok_or(Error::LabelLookupMissing)?
        };

        let series_labels = lookup(series_ref);
        if series_labels.is_empty() {
            self.entries
                .insert(series_ref, Arc::new(SeriesEntry::tombstone(now)));
            return Ok(None);
        }

        let labels = series_labels.merge_base(target.labels());
        let Some(name) = labels.get(METRIC_NAME_LABEL).map(str::to_string) else {
            debug!(series_ref, %labels, "series without a metric name");
            self.entries
                .insert(series_ref, Arc::new(SeriesEntry::tombstone(now)));
            return Ok(None);
        };

        let entry = Arc::new(self.build_entry(&name, &labels, now));
        self.entries.insert(series_ref, Arc::clone(&entry));
        Ok(Some(entry))
    }

    fn build_entry(&self, name: &str, labels: &LabelSet, now: u64) -> SeriesEntry {
        let mut resource_labels = HashMap::with_capacity(3);
        resource_labels.insert("project_id".to_string(), self.project_id.clone());
        resource_labels.insert(
            "job".to_string(),
            labels.get(JOB_LABEL).unwrap_or_default().to_string(),
        );
        resource_labels.insert(
            "instance".to_string(),
            labels.get(INSTANCE_LABEL).unwrap_or_default().to_string(),
        );

        let metric_labels = labels
            .iter()
            .filter(|l| {
                !matches!(
                    l.name.as_str(),
                    METRIC_NAME_LABEL | JOB_LABEL | INSTANCE_LABEL
                )
            })
            .map(|l| (l.name.clone(), l.value.clone()))
            .collect();

        SeriesEntry {
            fingerprint: labels.fingerprint(),
            kind: metric_kind_for(name),
            value_type: ValueType::Double,
            metric_type: format!("{METRIC_TYPE_PREFIX}/{name}"),
            metric_labels,
            resource_labels,
            histogram: histogram_member(name, labels),
            tombstone: false,
            last_used: AtomicU64::new(now),
            cumulative: Mutex::new(None),
        }
    }

    /// Advance the reset tracking of a joined histogram series with one
    /// scrape's snapshot and return its growth since the reset point.
    ///
    /// First sight establishes the reset point; a shrinking count or a
    /// changed bucket layout re-arms it. All three cases return `None`.
    pub(crate) fn distribution_delta(
        &self,
        group_key: u64,
        snapshot: DistributionSnapshot,
    ) -> Option<DistributionDelta> {
        let now = self.tick();
        let entry = self
            .histogram_resets
            .entry(group_key)
            .or_insert_with(|| HistogramResetEntry {
                last_used: AtomicU64::new(now),
                state: Mutex::new(None),
            });
        entry.last_used.store(now, Ordering::Relaxed);

        let mut state = entry.state.lock().unwrap_or_else(PoisonError::into_inner);
        match state.as_mut() {
            None => {
                *state = Some(DistributionState {
                    last_count: snapshot.count,
                    reset: snapshot,
                });
                None
            }
            Some(st) => {
                let layout_changed = st.reset.buckets.len() != snapshot.buckets.len()
                    || st
                        .reset
                        .buckets
                        .iter()
                        .zip(&snapshot.buckets)
                        .any(|(a, b)| a.0 != b.0);
                if layout_changed || snapshot.count < st.last_count {
                    *st = DistributionState {
                        last_count: snapshot.count,
                        reset: snapshot,
                    };
                    return None;
                }
                if snapshot.timestamp_ms <= st.reset.timestamp_ms {
                    return None;
                }
                st.last_count = snapshot.count;
                Some(DistributionDelta {
                    start_ms: st.reset.timestamp_ms,
                    count: snapshot.count - st.reset.count,
                    sum: snapshot.sum - st.reset.sum,
                    buckets: snapshot
                        .buckets
                        .iter()
                        .zip(&st.reset.buckets)
                        .map(|(cur, reset)| (cur.0, cur.1 - reset.1))
                        .collect(),
                })
            }
        }
    }

    /// Resource type all entries are written against.
    pub(crate) fn resource_type(&self) -> &'static str {
        RESOURCE_TYPE
    }

    /// Housekeeping loop: periodically evict idle entries until cancelled.
    pub(crate) async fn run(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.refresh_horizon);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = interval.tick() => {
                    let evicted = self.evict_at(self.tick());
                    if evicted > 0 {
                        debug!(evicted, "evicted idle series cache entries");
                    }
                }
            }
        }
    }

    fn tick(&self) -> u64 {
        self.epoch.elapsed().as_secs()
    }

    fn evict_at(&self, now: u64) -> usize {
        let horizon = self.refresh_horizon.as_secs();
        let before = self.entries.len() + self.histogram_resets.len();
        self.entries
            .retain(|_, entry| now.saturating_sub(entry.last_used.load(Ordering::Relaxed)) < horizon);
        self.histogram_resets
            .retain(|_, entry| now.saturating_sub(entry.last_used.load(Ordering::Relaxed)) < horizon);
        before - self.entries.len() - self.histogram_resets.len()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Infer the metric kind from the Prometheus naming convention. The scrape
/// metadata that would settle this authoritatively lives with the ingestion
/// path, outside the export pipeline.
fn metric_kind_for(name: &str) -> MetricKind {
    if name.ends_with("_total")
        || name.ends_with("_sum")
        || name.ends_with("_count")
        || name.ends_with("_bucket")
    {
        MetricKind::Cumulative
    } else {
        MetricKind::Gauge
    }
}

/// Classify a series as a histogram member by its name suffix. A `_bucket`
/// series must carry a parseable `le` label; `_sum` and `_count` series are
/// members only when the builder joins them behind that histogram's buckets,
/// and stay plain cumulative series otherwise.
fn histogram_member(name: &str, labels: &LabelSet) -> Option<HistogramMember> {
    let (base, part) = if let Some(base) = name.strip_suffix("_bucket") {
        let upper = parse_le(labels.get(LE_LABEL)?)?;
        (base, HistogramPart::Bucket(upper))
    } else if let Some(base) = name.strip_suffix("_sum") {
        (base, HistogramPart::Sum)
    } else if let Some(base) = name.strip_suffix("_count") {
        (base, HistogramPart::Count)
    } else {
        return None;
    };
    if base.is_empty() {
        return None;
    }

    let group_labels = LabelSet::new(
        labels
            .iter()
            .filter(|l| l.name != LE_LABEL)
            .map(|l| {
                if l.name == METRIC_NAME_LABEL {
                    Label::new(METRIC_NAME_LABEL, base)
                } else {
                    l.clone()
                }
            })
            .collect(),
    );

    Some(HistogramMember {
        part,
        group_key: group_labels.fingerprint(),
        base_type: format!("{METRIC_TYPE_PREFIX}/{base}"),
    })
}

/// Parse a bucket upper bound from an `le` label value.
fn parse_le(raw: &str) -> Option<f64> {
    match raw {
        "+Inf" => Some(f64::INFINITY),
        _ => raw.parse::<f64>().ok().filter(|v| !v.is_nan()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::Label;

    fn target() -> Target {
        Target::new(LabelSet::from_pairs(&[
            ("job", "node"),
            ("instance", "a:9100"),
        ]))
    }

    fn cache_with_lookup() -> SeriesCache {
        let cache = SeriesCache::new("test-project");
        cache.set_labels_by_ref_func(|series_ref| match series_ref {
            1 => LabelSet::from_pairs(&[("__name__", "up")]),
            2 => LabelSet::from_pairs(&[("__name__", "http_requests_total"), ("code", "200")]),
            3 => LabelSet::new(vec![Label::new("no_name", "x")]),
            _ => LabelSet::default(),
        });
        cache
    }

    #[test]
    fn get_before_lookup_installation_errors() {
        let cache = SeriesCache::new("test-project");
        let err = cache.get_or_create(1, &target()).unwrap_err();
        assert!(matches!(err, Error::LabelLookupMissing));
    }

    #[test]
    fn materializes_gauge_entry_with_resource_labels() {
        let cache = cache_with_lookup();
        let entry = cache.get_or_create(1, &target()).unwrap().unwrap();
        assert_eq!(entry.kind, MetricKind::Gauge);
        assert_eq!(entry.metric_type, "external.googleapis.com/prometheus/up");
        assert_eq!(
            entry.resource_labels.get("project_id").map(String::as_str),
            Some("test-project")
        );
        assert_eq!(
            entry.resource_labels.get("job").map(String::as_str),
            Some("node")
        );
        assert_eq!(
            entry.resource_labels.get("instance").map(String::as_str),
            Some("a:9100")
        );
        assert!(entry.metric_labels.is_empty());
    }

    #[test]
    fn counter_suffix_yields_cumulative_kind_and_projected_labels() {
        let cache = cache_with_lookup();
        let entry = cache.get_or_create(2, &target()).unwrap().unwrap();
        assert_eq!(entry.kind, MetricKind::Cumulative);
        assert_eq!(
            entry.metric_labels.get("code").map(String::as_str),
            Some("200")
        );
        assert!(!entry.metric_labels.contains_key("job"));
    }

    #[test]
    fn unresolvable_refs_tombstone_and_stay_misses() {
        let cache = cache_with_lookup();
        assert!(cache.get_or_create(99, &target()).unwrap().is_none());
        assert!(cache.get_or_create(3, &target()).unwrap().is_none());
        // Tombstones are cached; the second hit does not re-resolve.
        assert_eq!(cache.len(), 2);
        assert!(cache.get_or_create(99, &target()).unwrap().is_none());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn fingerprint_depends_on_target_labels() {
        let cache = cache_with_lookup();
        let other_target = Target::new(LabelSet::from_pairs(&[
            ("job", "node"),
            ("instance", "b:9100"),
        ]));
        let a = cache.get_or_create(1, &target()).unwrap().unwrap();
        let cache2 = cache_with_lookup();
        let b = cache2.get_or_create(1, &other_target).unwrap().unwrap();
        assert_ne!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn eviction_drops_idle_entries_only() {
        let cache = cache_with_lookup();
        cache.get_or_create(1, &target()).unwrap();
        cache.get_or_create(2, &target()).unwrap();
        // Age entry 1 past the horizon, keep entry 2 fresh.
        let horizon = cache.refresh_horizon.as_secs();
        cache
            .entries
            .get(&2)
            .unwrap()
            .touch(horizon + 1);
        let evicted = cache.evict_at(horizon + 1);
        assert_eq!(evicted, 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.entries.contains_key(&2));
    }

    #[test]
    fn cumulative_point_tracks_resets() {
        let cache = cache_with_lookup();
        let entry = cache.get_or_create(2, &target()).unwrap().unwrap();

        // First sight establishes the reset point, no emission.
        assert!(entry.cumulative_point(&RefSample::new(2, 1_000, 5.0)).is_none());

        // Subsequent increase emits the delta over [reset, sample].
        let point = entry
            .cumulative_point(&RefSample::new(2, 2_000, 8.0))
            .unwrap();
        let interval = point.interval.unwrap();
        assert_eq!(interval.start_time.unwrap().seconds, 1);
        assert_eq!(interval.end_time.unwrap().seconds, 2);
        match point.value.unwrap().value.unwrap() {
            crate::backend::typed_value::Value::DoubleValue(v) => assert_eq!(v, 3.0),
            other => panic!("unexpected value {other:?}"),
        }

        // Regression re-arms the reset point without emitting.
        assert!(entry.cumulative_point(&RefSample::new(2, 3_000, 1.0)).is_none());
        let point = entry
            .cumulative_point(&RefSample::new(2, 4_000, 2.5))
            .unwrap();
        let interval = point.interval.unwrap();
        assert_eq!(interval.start_time.unwrap().seconds, 3);
        match point.value.unwrap().value.unwrap() {
            crate::backend::typed_value::Value::DoubleValue(v) => assert_eq!(v, 1.5),
            other => panic!("unexpected value {other:?}"),
        }
    }

    #[test]
    fn duplicate_timestamp_for_cumulative_is_skipped() {
        let cache = cache_with_lookup();
        let entry = cache.get_or_create(2, &target()).unwrap().unwrap();
        assert!(entry.cumulative_point(&RefSample::new(2, 1_000, 5.0)).is_none());
        assert!(entry.cumulative_point(&RefSample::new(2, 1_000, 6.0)).is_none());
    }

    fn histogram_labels(name: &str, le: Option<&str>) -> LabelSet {
        let mut pairs = vec![("__name__", name)];
        if let Some(le) = le {
            pairs.push(("le", le));
        }
        LabelSet::from_pairs(&pairs)
    }

    #[test]
    fn histogram_members_share_a_group_key() {
        let bucket = histogram_member(
            "http_latency_bucket",
            &histogram_labels("http_latency_bucket", Some("0.5")),
        )
        .unwrap();
        let inf_bucket = histogram_member(
            "http_latency_bucket",
            &histogram_labels("http_latency_bucket", Some("+Inf")),
        )
        .unwrap();
        let sum = histogram_member(
            "http_latency_sum",
            &histogram_labels("http_latency_sum", None),
        )
        .unwrap();
        let count = histogram_member(
            "http_latency_count",
            &histogram_labels("http_latency_count", None),
        )
        .unwrap();

        assert!(matches!(bucket.part, HistogramPart::Bucket(u) if u == 0.5));
        assert!(matches!(inf_bucket.part, HistogramPart::Bucket(u) if u.is_infinite()));
        assert_eq!(sum.part, HistogramPart::Sum);
        assert_eq!(count.part, HistogramPart::Count);

        assert_eq!(bucket.group_key, inf_bucket.group_key);
        assert_eq!(bucket.group_key, sum.group_key);
        assert_eq!(bucket.group_key, count.group_key);
        assert_eq!(
            bucket.base_type,
            "external.googleapis.com/prometheus/http_latency"
        );
    }

    #[test]
    fn bucket_without_le_label_is_not_a_member() {
        assert!(histogram_member(
            "http_latency_bucket",
            &histogram_labels("http_latency_bucket", None),
        )
        .is_none());
        assert!(histogram_member(
            "http_latency_bucket",
            &histogram_labels("http_latency_bucket", Some("fast")),
        )
        .is_none());
        assert!(histogram_member("up", &histogram_labels("up", None)).is_none());
    }

    fn snapshot(ts: i64, count: f64, sum: f64, buckets: &[(f64, f64)]) -> DistributionSnapshot {
        DistributionSnapshot {
            timestamp_ms: ts,
            count,
            sum,
            buckets: buckets.to_vec(),
        }
    }

    #[test]
    fn distribution_delta_needs_a_prior_snapshot() {
        let cache = cache_with_lookup();
        let buckets = [(0.5, 1.0), (f64::INFINITY, 2.0)];
        assert!(cache
            .distribution_delta(42, snapshot(1_000, 2.0, 3.0, &buckets))
            .is_none());

        let delta = cache
            .distribution_delta(42, snapshot(2_000, 5.0, 8.0, &[(0.5, 3.0), (f64::INFINITY, 5.0)]))
            .unwrap();
        assert_eq!(delta.start_ms, 1_000);
        assert_eq!(delta.count, 3.0);
        assert_eq!(delta.sum, 5.0);
        assert_eq!(delta.buckets, vec![(0.5, 2.0), (f64::INFINITY, 3.0)]);
    }

    #[test]
    fn distribution_delta_rearms_on_count_regression_and_layout_change() {
        let cache = cache_with_lookup();
        let buckets = [(0.5, 1.0), (f64::INFINITY, 2.0)];
        assert!(cache
            .distribution_delta(42, snapshot(1_000, 2.0, 3.0, &buckets))
            .is_none());

        // Count shrank: counter reset, re-armed without emission.
        assert!(cache
            .distribution_delta(42, snapshot(2_000, 1.0, 0.5, &[(0.5, 1.0), (f64::INFINITY, 1.0)]))
            .is_none());
        let delta = cache
            .distribution_delta(42, snapshot(3_000, 2.0, 1.5, &[(0.5, 2.0), (f64::INFINITY, 2.0)]))
            .unwrap();
        assert_eq!(delta.start_ms, 2_000);
        assert_eq!(delta.count, 1.0);

        // Changed bucket layout also re-arms.
        assert!(cache
            .distribution_delta(42, snapshot(4_000, 3.0, 2.0, &[(1.0, 3.0), (f64::INFINITY, 3.0)]))
            .is_none());
    }

    #[test]
    fn eviction_sweeps_histogram_reset_state() {
        let cache = cache_with_lookup();
        assert!(cache
            .distribution_delta(42, snapshot(1_000, 1.0, 1.0, &[(f64::INFINITY, 1.0)]))
            .is_none());
        let horizon = cache.refresh_horizon.as_secs();
        let evicted = cache.evict_at(horizon + 1);
        assert_eq!(evicted, 1);
        assert!(cache.histogram_resets.is_empty());
    }
}

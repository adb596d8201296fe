//! Sample builder: reference samples in, backend points out.

use std::sync::Arc;

use crate::backend::{
    BucketOptions, Distribution, ExplicitBuckets, Metric, MetricKind, MonitoredResource, Point,
    TimeInterval, TimeSeries, Timestamp, TypedValue, ValueType,
};
use crate::cache::{
    DistributionDelta, DistributionSnapshot, HistogramPart, SeriesCache, SeriesEntry,
};
use crate::series::{RefSample, Target, LE_LABEL};
use crate::Result;

/// Transforms `(target, reference sample)` pairs into backend time series,
/// consulting the series cache for descriptors.
pub(crate) struct SampleBuilder {
    series: Arc<SeriesCache>,
}

impl SampleBuilder {
    pub fn new(series: Arc<SeriesCache>) -> Self {
        Self { series }
    }

    /// Consume one or more leading samples of `samples` and emit zero or one
    /// backend time series plus its series fingerprint, returning the
    /// unconsumed tail. The caller drives this in a loop until the slice is
    /// empty.
    ///
    /// A histogram bucket at the head joins the run of consecutive
    /// same-timestamp members of its histogram (buckets, sum, count) into a
    /// single distribution point. Everything else consumes exactly one
    /// sample.
    ///
    /// Zero-emission cases: unresolvable or tombstoned refs, staleness
    /// markers, non-finite values, cumulative samples that only establish or
    /// re-arm their reset point, and histogram groups that are incomplete or
    /// only establish theirs.
    ///
    /// An error means the documented precondition was not met (no label
    /// lookup installed); callers treat it as a programming error.
    pub fn next<'a>(
        &self,
        target: &Target,
        samples: &'a [RefSample],
    ) -> Result<(Option<(u64, TimeSeries)>, &'a [RefSample])> {
        let Some((sample, tail)) = samples.split_first() else {
            return Ok((None, samples));
        };

        let Some(entry) = self.series.get_or_create(sample.series_ref, target)? else {
            return Ok((None, tail));
        };

        // A bucket series opens histogram assembly. A lone `_sum` or
        // `_count` head stays on the scalar path: in exposition order the
        // buckets come first, so sum and count of a real histogram are
        // consumed by the group scan below.
        if let Some(member) = entry.histogram.as_ref() {
            if matches!(member.part, HistogramPart::Bucket(_)) {
                return self.next_histogram(target, samples, member.group_key, &entry);
            }
        }

        if sample.is_stale() {
            return Ok((None, tail));
        }
        if !sample.value.is_finite() {
            // The backend accepts only finite doubles.
            return Ok((None, tail));
        }

        let point = if entry.kind == MetricKind::Cumulative {
            match entry.cumulative_point(sample) {
                Some(point) => point,
                None => return Ok((None, tail)),
            }
        } else {
            entry.gauge_point(sample)
        };

        let series = TimeSeries {
            metric: Some(Metric {
                r#type: entry.metric_type.clone(),
                labels: entry.metric_labels.clone(),
            }),
            resource: Some(MonitoredResource {
                r#type: self.series.resource_type().to_string(),
                labels: entry.resource_labels.clone(),
            }),
            metric_kind: entry.kind as i32,
            value_type: entry.value_type as i32,
            points: vec![point],
        };

        Ok((Some((entry.fingerprint, series)), tail))
    }

    /// Join the leading run of histogram members into one distribution
    /// point. The run ends at the first sample with a different timestamp,
    /// a different histogram, or no histogram membership at all; the run is
    /// consumed either way.
    fn next_histogram<'a>(
        &self,
        target: &Target,
        samples: &'a [RefSample],
        group_key: u64,
        head: &SeriesEntry,
    ) -> Result<(Option<(u64, TimeSeries)>, &'a [RefSample])> {
        let timestamp_ms = samples[0].timestamp_ms;
        let mut buckets: Vec<(f64, f64)> = Vec::new();
        let mut sum = 0.0;
        let mut count = None;
        let mut stale = false;

        let mut consumed = 0;
        while consumed < samples.len() {
            let sample = &samples[consumed];
            if sample.timestamp_ms != timestamp_ms {
                break;
            }
            let Some(entry) = self.series.get_or_create(sample.series_ref, target)? else {
                break;
            };
            let Some(part) = entry
                .histogram
                .as_ref()
                .filter(|m| m.group_key == group_key)
                .map(|m| m.part)
            else {
                break;
            };
            consumed += 1;

            if sample.is_stale() {
                stale = true;
                continue;
            }
            if !sample.value.is_finite() {
                continue;
            }
            match part {
                HistogramPart::Bucket(upper) => buckets.push((upper, sample.value)),
                HistogramPart::Sum => sum = sample.value,
                HistogramPart::Count => count = Some(sample.value),
            }
        }
        let tail = &samples[consumed..];

        // A stale member marks the whole histogram stale; without a count
        // the distribution cannot be built.
        if stale {
            return Ok((None, tail));
        }
        let Some(count) = count else {
            return Ok((None, tail));
        };
        buckets.sort_by(|a, b| a.0.total_cmp(&b.0));
        buckets.dedup_by(|b, a| a.0 == b.0);

        let snapshot = DistributionSnapshot {
            timestamp_ms,
            count,
            sum,
            buckets,
        };
        let Some(delta) = self.series.distribution_delta(group_key, snapshot) else {
            return Ok((None, tail));
        };

        let base_type = match head.histogram.as_ref() {
            Some(member) => member.base_type.clone(),
            None => head.metric_type.clone(),
        };
        let mut labels = head.metric_labels.clone();
        labels.remove(LE_LABEL);

        let series = TimeSeries {
            metric: Some(Metric {
                r#type: base_type,
                labels,
            }),
            resource: Some(MonitoredResource {
                r#type: self.series.resource_type().to_string(),
                labels: head.resource_labels.clone(),
            }),
            metric_kind: MetricKind::Cumulative as i32,
            value_type: ValueType::Distribution as i32,
            points: vec![Point {
                interval: Some(TimeInterval {
                    end_time: Some(Timestamp::from_millis(timestamp_ms)),
                    start_time: Some(Timestamp::from_millis(delta.start_ms)),
                }),
                value: Some(TypedValue::distribution(distribution_from(&delta))),
            }],
        };

        Ok((Some((group_key, series)), tail))
    }
}

/// Shape a histogram delta into the backend's distribution value. Bounds
/// exclude the overflow bucket; cumulative bucket values de-cumulate into
/// per-bucket counts, with the overflow bucket absorbing the remainder up to
/// the total count.
fn distribution_from(delta: &DistributionDelta) -> Distribution {
    let mut bounds = Vec::with_capacity(delta.buckets.len());
    let mut cumulative = Vec::with_capacity(delta.buckets.len());
    for (upper, value) in &delta.buckets {
        if upper.is_finite() {
            bounds.push(*upper);
        }
        cumulative.push(*value);
    }

    let mut bucket_counts = Vec::with_capacity(bounds.len() + 1);
    let mut prev = 0.0;
    for value in cumulative.iter().take(bounds.len()) {
        bucket_counts.push((value - prev).max(0.0) as i64);
        prev = *value;
    }
    bucket_counts.push((delta.count - prev).max(0.0) as i64);

    let count = delta.count.max(0.0) as i64;
    Distribution {
        count,
        mean: if count > 0 { delta.sum / delta.count } else { 0.0 },
        // Not derivable from bucketed exposition data.
        sum_of_squared_deviation: 0.0,
        bucket_options: Some(BucketOptions {
            explicit_buckets: Some(ExplicitBuckets { bounds }),
        }),
        bucket_counts,
    }
}

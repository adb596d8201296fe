//! Sample and label model for the export path.
//!
//! Samples arrive reference-encoded: they carry an opaque 64-bit series ID
//! instead of a label set. The ingestion path installs a lookup that resolves
//! refs back to labels (see [`crate::cache::SeriesCache`]).

use std::fmt;

use xxhash_rust::xxh3::xxh3_64;

/// Label name carrying the metric name in a Prometheus label set.
pub const METRIC_NAME_LABEL: &str = "__name__";
/// Label name of the scrape job.
pub const JOB_LABEL: &str = "job";
/// Label name of the scraped instance.
pub const INSTANCE_LABEL: &str = "instance";
/// Label name of a histogram bucket's upper bound.
pub const LE_LABEL: &str = "le";

/// Bit pattern of the Prometheus staleness marker NaN.
const STALE_NAN_BITS: u64 = 0x7ff0_0000_0000_0002;

/// Label key-value pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A set of labels, kept sorted by name with unique names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSet(Vec<Label>);

impl LabelSet {
    /// Build a label set from arbitrary pairs; later duplicates of a name
    /// are discarded.
    pub fn new(mut labels: Vec<Label>) -> Self {
        labels.sort_by(|a, b| a.name.cmp(&b.name));
        labels.dedup_by(|b, a| a.name == b.name);
        Self(labels)
    }

    /// Convenience constructor from string pairs.
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Self::new(
            pairs
                .iter()
                .map(|(name, value)| Label::new(*name, *value))
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .binary_search_by(|l| l.name.as_str().cmp(name))
            .ok()
            .map(|idx| self.0[idx].value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        self.0.iter()
    }

    /// Stable 64-bit fingerprint over the full label set.
    ///
    /// Labels are hashed in sorted order with NUL separators, so the value
    /// only depends on the label contents, never on insertion order.
    pub fn fingerprint(&self) -> u64 {
        let mut buf = Vec::with_capacity(self.0.len() * 16);
        for label in &self.0 {
            buf.extend_from_slice(label.name.as_bytes());
            buf.push(0);
            buf.extend_from_slice(label.value.as_bytes());
            buf.push(0);
        }
        xxh3_64(&buf)
    }

    /// Merge `base` labels beneath this set: names present here win.
    pub fn merge_base(&self, base: &LabelSet) -> LabelSet {
        let mut merged = self.0.clone();
        for label in &base.0 {
            if self.get(&label.name).is_none() {
                merged.push(label.clone());
            }
        }
        LabelSet::new(merged)
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, label) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={:?}", label.name, label.value)?;
        }
        write!(f, "}}")
    }
}

/// A scrape target: the discovered labels merged beneath every series the
/// target exposes (job, instance, and any relabel output).
#[derive(Debug, Clone, Default)]
pub struct Target {
    labels: LabelSet,
}

impl Target {
    pub fn new(labels: LabelSet) -> Self {
        Self { labels }
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }
}

/// A sample referring to its series by an opaque ID.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefSample {
    /// Opaque series reference resolved through the installed lookup.
    pub series_ref: u64,
    /// Sample timestamp in milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    pub value: f64,
}

impl RefSample {
    pub fn new(series_ref: u64, timestamp_ms: i64, value: f64) -> Self {
        Self {
            series_ref,
            timestamp_ms,
            value,
        }
    }

    /// Whether this sample is the Prometheus staleness marker.
    pub fn is_stale(&self) -> bool {
        self.value.to_bits() == STALE_NAN_BITS
    }
}

/// The staleness marker value, exposed for tests and ingestion shims.
pub fn stale_marker() -> f64 {
    f64::from_bits(STALE_NAN_BITS)
}

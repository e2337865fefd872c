//! Threshold histograms with running aggregates and percentile bounds.
//!
//! A [`BucketStats`] accumulates `i64` values into fixed buckets defined by a
//! sorted list of thresholds, and keeps a running sum, count, min and max.
//! Values outside `[thresholds.first(), thresholds.last()]` are counted as
//! discarded and otherwise ignored.
//!
//! # Bucket Layout
//!
//! `n` thresholds define `n - 1` buckets. Bucket `i` covers
//! `[thresholds[i], thresholds[i + 1])`; the last bucket is closed on both
//! ends. Use `i64::MIN` / `i64::MAX` as the outer thresholds for open-ended
//! buckets; they render as `"min"` / `"max"` in exported labels.
//!
//! # Memory Ordering Strategy
//!
//! Every counter is an independent atomic updated with `Ordering::Relaxed`.
//! Bucket selection is a read-only scan over immutable thresholds followed by
//! a single `fetch_add`. Min and max use a compare-and-swap loop ("assign if
//! lesser/greater"). The running sum is an `i128` behind a `parking_lot::Mutex`
//! held for one addition, so sums of `i64` values cannot wrap.
//!
//! A [`BucketStatsSnapshot`] reads the counters one after another, so under
//! concurrent writes the sum and count may come from slightly different
//! moments. Once writers are quiescent the snapshot is exact.
//!
//! # Percentiles
//!
//! The p99 bound is the upper edge of the first bucket whose cumulative count
//! is strictly greater than 99% of the total; p999 likewise at 99.9%. Bounds
//! are undefined (exported as `-1`) with fewer than 100 (resp. 1000) samples,
//! or when the bound would be the open `i64::MAX` edge.
//!
//! # Usage
//!
//! ```
//! use inferadb_common_stats::BucketStats;
//!
//! let stats = BucketStats::new(&[0, 10, 100, i64::MAX])?;
//! for v in [1, 5, 50, 500] {
//!     stats.add_value(v);
//! }
//! assert!(!stats.add_value(-1));
//!
//! let snapshot = stats.snapshot();
//! assert_eq!(snapshot.total_count, 4);
//! assert_eq!(snapshot.discarded, 1);
//! assert_eq!(snapshot.average, 139.0);
//! # Ok::<(), inferadb_common_stats::StatsError>(())
//! ```

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use parking_lot::Mutex;

use serde_json::{Map, Value, json};

use crate::error::{StatsError, StatsResult};

/// Sentinel exported for an undefined percentile bound.
pub const UNDEFINED_BOUND: i64 = -1;

/// Minimum sample count before a p99 bound is reported.
const P99_MIN_SAMPLES: u64 = 100;

/// Minimum sample count before a p999 bound is reported.
const P999_MIN_SAMPLES: u64 = 1000;

/// How bucket counts are rendered by [`BucketStats::to_json`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BucketFormat {
    /// One entry per bucket, e.g. `0_to_10`, `10_to_100`, `100_to_max`.
    #[default]
    Separate,
    /// Running totals from the low end, e.g. `0_to_10`, `0_to_100`.
    CumulativeLeft,
    /// Running totals from the high end, e.g. `100_to_max`, `10_to_max`.
    CumulativeRight,
}

/// Renders a threshold as an export label.
fn threshold_label(value: i64) -> String {
    match value {
        i64::MIN => "min".to_owned(),
        i64::MAX => "max".to_owned(),
        v => v.to_string(),
    }
}

// ── Buckets ─────────────────────────────────────────────────────────────

/// Fixed threshold buckets with independently incrementable counters.
#[derive(Debug)]
pub struct Buckets {
    thresholds: Box<[i64]>,
    counts: Box<[AtomicU64]>,
}

impl Buckets {
    /// Creates buckets from a sorted list of at least two thresholds.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError::InvalidThresholds`] if fewer than two thresholds
    /// are given or they are not strictly ascending.
    pub fn new(thresholds: &[i64]) -> StatsResult<Self> {
        if thresholds.len() < 2 {
            return Err(StatsError::invalid_thresholds(
                thresholds,
                "at least two thresholds are required",
            ));
        }
        if !thresholds.windows(2).all(|w| w[0] < w[1]) {
            return Err(StatsError::invalid_thresholds(
                thresholds,
                "thresholds must be sorted in strictly ascending order",
            ));
        }
        let counts = (1..thresholds.len()).map(|_| AtomicU64::new(0)).collect();
        Ok(Self { thresholds: thresholds.into(), counts })
    }

    /// Returns the thresholds these buckets were built from.
    #[must_use]
    pub fn thresholds(&self) -> &[i64] {
        &self.thresholds
    }

    /// Returns the number of buckets (`thresholds.len() - 1`).
    #[must_use]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Always `false`: construction guarantees at least one bucket.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Whether `value` falls inside `[thresholds.first(), thresholds.last()]`.
    #[must_use]
    pub fn contains(&self, value: i64) -> bool {
        self.thresholds[0] <= value && value <= self.thresholds[self.thresholds.len() - 1]
    }

    /// Counts `value` in its bucket. Returns `false` if it is out of range.
    pub fn add_value(&self, value: i64) -> bool {
        match self.find_bucket(value) {
            Some(counter) => {
                counter.fetch_add(1, Ordering::Relaxed);
                true
            },
            None => false,
        }
    }

    // Linear scan from the low end: most values land in the first few buckets.
    fn find_bucket(&self, value: i64) -> Option<&AtomicU64> {
        if !self.contains(value) {
            return None;
        }
        let last = self.counts.len() - 1;
        let index = self.thresholds[1..last + 1].iter().position(|&high| value < high).unwrap_or(last);
        self.counts.get(index)
    }

    /// Copies the current bucket counts and derives the percentile bounds.
    #[must_use]
    pub fn snapshot(&self) -> BucketsSnapshot {
        let buckets = self
            .counts
            .iter()
            .enumerate()
            .map(|(i, count)| BucketCount {
                low: self.thresholds[i],
                high: self.thresholds[i + 1],
                count: count.load(Ordering::Relaxed),
            })
            .collect();
        BucketsSnapshot::from_counts(buckets)
    }
}

/// One bucket's range and observation count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketCount {
    /// Inclusive lower edge.
    pub low: i64,
    /// Upper edge (exclusive, except for the last bucket).
    pub high: i64,
    /// Number of values observed in the bucket.
    pub count: u64,
}

impl BucketCount {
    /// Export label, e.g. `"5_to_200"` or `"999_to_max"`.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{}_to_{}", threshold_label(self.low), threshold_label(self.high))
    }
}

/// Point-in-time copy of bucket counts with derived percentile bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketsSnapshot {
    /// Buckets in ascending order.
    pub buckets: Vec<BucketCount>,
    p99_bound: Option<i64>,
    p999_bound: Option<i64>,
}

impl BucketsSnapshot {
    /// Builds a snapshot from ascending bucket counts, computing percentile bounds.
    #[must_use]
    pub fn from_counts(buckets: Vec<BucketCount>) -> Self {
        let total: u64 = buckets.iter().map(|b| b.count).sum();
        let p99_bound = if total < P99_MIN_SAMPLES { None } else { upper_bound(&buckets, total, 99, 100) };
        let p999_bound =
            if total < P999_MIN_SAMPLES { None } else { upper_bound(&buckets, total, 999, 1000) };
        Self { buckets, p99_bound, p999_bound }
    }

    /// Sum of all bucket counts.
    #[must_use]
    pub fn total_count(&self) -> u64 {
        self.buckets.iter().map(|b| b.count).sum()
    }

    /// Upper edge of the bucket containing the 99th percentile, if defined.
    #[must_use]
    pub fn p99_upper_bound(&self) -> Option<i64> {
        self.p99_bound
    }

    /// Upper edge of the bucket containing the 99.9th percentile, if defined.
    #[must_use]
    pub fn p999_upper_bound(&self) -> Option<i64> {
        self.p999_bound
    }

    /// Renders bucket counts in `format`, appending `label` to every key.
    #[must_use]
    pub fn buckets_json(&self, format: BucketFormat, label: &str) -> Map<String, Value> {
        let mut map = Map::new();
        let (Some(first), Some(last)) = (self.buckets.first(), self.buckets.last()) else {
            return map;
        };
        match format {
            BucketFormat::Separate => {
                for bucket in &self.buckets {
                    map.insert(format!("{}{label}", bucket.label()), json!(bucket.count));
                }
            },
            BucketFormat::CumulativeLeft => {
                let start = threshold_label(first.low);
                let mut sum = 0u64;
                for bucket in self.buckets.iter().filter(|b| b.high != i64::MAX) {
                    sum += bucket.count;
                    map.insert(
                        format!("{start}_to_{}{label}", threshold_label(bucket.high)),
                        json!(sum),
                    );
                }
            },
            BucketFormat::CumulativeRight => {
                let end = threshold_label(last.high);
                let mut sum = 0u64;
                for bucket in self.buckets.iter().rev().filter(|b| b.low != i64::MIN) {
                    sum += bucket.count;
                    map.insert(
                        format!("{}_to_{end}{label}", threshold_label(bucket.low)),
                        json!(sum),
                    );
                }
            },
        }
        map
    }
}

/// Finds the upper edge of the first bucket whose cumulative count exceeds
/// `numerator / denominator` of `total`.
fn upper_bound(buckets: &[BucketCount], total: u64, numerator: u64, denominator: u64) -> Option<i64> {
    let threshold = u128::from(total) * u128::from(numerator);
    let mut cumulative = 0u128;
    for bucket in buckets {
        cumulative += u128::from(bucket.count);
        if cumulative * u128::from(denominator) > threshold {
            return (bucket.high != i64::MAX).then_some(bucket.high);
        }
    }
    None
}

// ── BucketStats ─────────────────────────────────────────────────────────

/// A concurrent threshold histogram with running sum, count, min and max.
#[derive(Debug)]
pub struct BucketStats {
    buckets: Buckets,
    total_value: Mutex<i128>,
    total_count: AtomicU64,
    min_value: AtomicI64,
    max_value: AtomicI64,
    discarded: AtomicU64,
    /// Suffix for the `average`, `max` and `min` export keys.
    average_max_label: String,
    /// Suffix for every bucket export key.
    bucket_label: String,
}

impl BucketStats {
    /// Creates a histogram over `thresholds` with no export labels.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError::InvalidThresholds`] if fewer than two thresholds
    /// are given or they are not strictly ascending.
    pub fn new(thresholds: &[i64]) -> StatsResult<Self> {
        Self::with_labels(thresholds, "", "")
    }

    /// Creates a histogram whose export keys carry the given suffixes.
    ///
    /// `average_max_label` is appended to the `average`, `max` and `min`
    /// keys; `bucket_label` to each bucket key (e.g. `" ms"`).
    ///
    /// # Errors
    ///
    /// Returns [`StatsError::InvalidThresholds`] as for [`BucketStats::new`].
    pub fn with_labels(
        thresholds: &[i64],
        average_max_label: impl Into<String>,
        bucket_label: impl Into<String>,
    ) -> StatsResult<Self> {
        Ok(Self {
            buckets: Buckets::new(thresholds)?,
            total_value: Mutex::new(0),
            total_count: AtomicU64::new(0),
            min_value: AtomicI64::new(i64::MAX),
            max_value: AtomicI64::new(i64::MIN),
            discarded: AtomicU64::new(0),
            average_max_label: average_max_label.into(),
            bucket_label: bucket_label.into(),
        })
    }

    /// Returns the thresholds this histogram was built from.
    #[must_use]
    pub fn thresholds(&self) -> &[i64] {
        self.buckets.thresholds()
    }

    /// Records `value`.
    ///
    /// Returns `false` and increments the discard counter if `value` lies
    /// outside the histogram's range. Out-of-range values are expected (e.g.
    /// outlier delays) and are not an error.
    pub fn add_value(&self, value: i64) -> bool {
        if !self.buckets.add_value(value) {
            self.discarded.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        assign_min(&self.min_value, value);
        assign_max(&self.max_value, value);
        *self.total_value.lock() += i128::from(value);
        self.total_count.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Returns a best-effort consistent copy of all aggregates.
    #[must_use]
    pub fn snapshot(&self) -> BucketStatsSnapshot {
        let total_value = *self.total_value.lock();
        let total_count = self.total_count.load(Ordering::Relaxed);
        let recorded = total_count > 0;
        BucketStatsSnapshot {
            average: if recorded { total_value as f64 / total_count as f64 } else { f64::NAN },
            max_value: recorded.then(|| self.max_value.load(Ordering::Relaxed)),
            min_value: recorded.then(|| self.min_value.load(Ordering::Relaxed)),
            total_value,
            total_count,
            discarded: self.discarded.load(Ordering::Relaxed),
            buckets: self.buckets.snapshot(),
        }
    }

    /// Exports a snapshot as an ordered JSON object.
    #[must_use]
    pub fn to_json(&self, format: BucketFormat) -> Value {
        self.snapshot().to_json(format, &self.average_max_label, &self.bucket_label)
    }
}

/// Stores `value` into `target` if it is smaller than the current content.
fn assign_min(target: &AtomicI64, value: i64) {
    let mut current = target.load(Ordering::Relaxed);
    while value < current {
        match target.compare_exchange_weak(current, value, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return,
            Err(actual) => current = actual,
        }
    }
}

/// Stores `value` into `target` if it is greater than the current content.
fn assign_max(target: &AtomicI64, value: i64) {
    let mut current = target.load(Ordering::Relaxed);
    while value > current {
        match target.compare_exchange_weak(current, value, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return,
            Err(actual) => current = actual,
        }
    }
}

/// Immutable copy of a [`BucketStats`] taken at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketStatsSnapshot {
    /// `total_value / total_count`, or `NaN` when nothing was recorded.
    pub average: f64,
    /// Largest recorded value, `None` when nothing was recorded.
    pub max_value: Option<i64>,
    /// Smallest recorded value, `None` when nothing was recorded.
    pub min_value: Option<i64>,
    /// Sum of all recorded values, wide enough never to wrap.
    pub total_value: i128,
    /// Number of recorded (in-range) values.
    pub total_count: u64,
    /// Number of out-of-range values that were not recorded.
    pub discarded: u64,
    /// Per-bucket counts and percentile bounds.
    pub buckets: BucketsSnapshot,
}

impl BucketStatsSnapshot {
    /// Exports this snapshot as an ordered JSON object.
    ///
    /// Keys: `average`, `max`, `min` (each suffixed with `average_max_label`),
    /// `total_value`, `total_count`, `discarded`, `buckets`,
    /// `p99_upper_bound`, `p999_upper_bound`.
    #[must_use]
    pub fn to_json(&self, format: BucketFormat, average_max_label: &str, bucket_label: &str) -> Value {
        let mut map = Map::new();
        map.insert(format!("average{average_max_label}"), json!(self.average));
        map.insert(format!("max{average_max_label}"), json!(self.max_value));
        map.insert(format!("min{average_max_label}"), json!(self.min_value));
        map.insert("total_value".to_owned(), sum_json(self.total_value));
        map.insert("total_count".to_owned(), json!(self.total_count));
        map.insert("discarded".to_owned(), json!(self.discarded));
        map.insert(
            "buckets".to_owned(),
            Value::Object(self.buckets.buckets_json(format, bucket_label)),
        );
        map.insert(
            "p99_upper_bound".to_owned(),
            json!(self.buckets.p99_upper_bound().unwrap_or(UNDEFINED_BOUND)),
        );
        map.insert(
            "p999_upper_bound".to_owned(),
            json!(self.buckets.p999_upper_bound().unwrap_or(UNDEFINED_BOUND)),
        );
        Value::Object(map)
    }
}

/// JSON numbers are at most 64 bits wide; larger sums export as floats.
fn sum_json(total: i128) -> Value {
    match i64::try_from(total) {
        Ok(total) => json!(total),
        Err(_) => json!(total as f64),
    }
}

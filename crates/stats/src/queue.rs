//! Queue lifecycle statistics.
//!
//! A packet queue reports three events per item: added, removed and dropped.
//! [`QueueStatisticsObserver`] turns those events into counters, rates and
//! histograms:
//!
//! - **Shared statistics**: one [`QueueStatistics`] per queue id, owned by a
//!   [`QueueStatsRegistry`] and aggregated across every queue instance that
//!   shares the id.
//! - **Local statistics**: an optional per-observer [`QueueStatistics`],
//!   enabled with [`StatsConfig::local_stats`].
//! - **Wait times**: with [`StatsConfig::track_wait_times`], the observer keeps
//!   the insertion time of every in-flight item keyed by [`ItemKey`] and
//!   records how long the item waited when it is removed.
//!
//! # Memory Ordering Strategy
//!
//! Counters and the queue-size mirror use `Ordering::Relaxed`. Each is an
//! independent telemetry value; a snapshot may observe `removed` a moment
//! before the matching histogram count, which is acceptable for reporting.
//!
//! # Usage
//!
//! ```
//! use std::sync::Arc;
//! use inferadb_common_stats::{
//!     ItemKeys, ManualClock, QueueObserver, QueueStatisticsObserver, QueueStatsRegistry,
//!     StatsConfig,
//! };
//!
//! let registry = QueueStatsRegistry::with_clock(StatsConfig::default(), Arc::new(ManualClock::new()))?;
//! let observer = QueueStatisticsObserver::new(&registry, "rtp-sender", 1024)?;
//! let keys = ItemKeys::new();
//!
//! let item = keys.next_key();
//! observer.added(item);
//! observer.removed(item);
//!
//! let snapshot = observer.global_stats().snapshot();
//! assert_eq!(snapshot.added, 1);
//! assert_eq!(snapshot.removed, 1);
//! # Ok::<(), inferadb_common_stats::StatsError>(())
//! ```

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc, OnceLock,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::{
    clock::{Clock, SystemClock},
    config::StatsConfig,
    error::StatsResult,
    histogram::{BucketFormat, BucketStats, BucketStatsSnapshot},
    rate::RateStatistics,
};

/// Export label for the queue-size histogram.
pub const SIZE_AT_REMOVE_LABEL: &str = "_queue_size_at_remove";

/// Export label for the wait-time histogram's `average`/`max`/`min` keys.
pub const WAIT_TIME_LABEL: &str = "_queue_wait_time_ms";

/// Export label for the wait-time histogram's bucket keys.
pub const WAIT_TIME_BUCKET_LABEL: &str = " ms";

/// Rate scale reporting events per second.
const RATE_SCALE_PER_SECOND: f64 = 1000.0;

/// Drop ratio above which [`QueueStatistics::log_stats`] warns.
const HIGH_DROP_RATIO: f64 = 0.05;

/// Builds queue-size histogram thresholds for a queue of `capacity`.
///
/// Thresholds grow by powers of four from 1 up to the capacity, capped at
/// `max_bucketed_capacity`. An uncapped queue also gets marks at one half and
/// three quarters of its capacity, where those exceed the last power of four;
/// a capped queue gets a mark at the cap instead. The last bucket is open
/// ended so that no size is ever discarded.
///
/// ```
/// use inferadb_common_stats::queue_size_thresholds;
///
/// assert_eq!(queue_size_thresholds(16, 16384), [0, 1, 4, 8, 12, i64::MAX]);
/// ```
#[must_use]
pub fn queue_size_thresholds(capacity: usize, max_bucketed_capacity: usize) -> Vec<i64> {
    let bounded = capacity.min(max_bucketed_capacity);
    let mut thresholds = vec![0_i64];
    let mut mark = 1_usize;
    while mark < bounded {
        thresholds.push(to_i64(mark));
        mark = mark.saturating_mul(4);
    }

    let mut push_above_last = |value: usize| {
        let value = to_i64(value);
        if thresholds.last().is_some_and(|&last| value > last) {
            thresholds.push(value);
        }
    };
    if capacity == bounded {
        push_above_last(capacity / 2);
        push_above_last(capacity / 4 * 3 + capacity % 4 * 3 / 4);
    } else {
        push_above_last(bounded);
    }

    thresholds.push(i64::MAX);
    thresholds
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_millis(time: Duration) -> u64 {
    time.as_millis() as u64
}

// ── ItemKey ─────────────────────────────────────────────────────────────

/// Identity of one in-flight queue item.
///
/// Two items that compare equal by value are still distinct queue entries,
/// so wait-time tracking is keyed by this handle rather than by the item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemKey(u64);

impl ItemKey {
    /// Wraps a caller-assigned unique id, e.g. a packet sequence number.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Generator of unique [`ItemKey`]s.
#[derive(Debug, Default)]
pub struct ItemKeys {
    next: AtomicU64,
}

impl ItemKeys {
    /// Creates a generator whose first key is zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a key never returned before by this generator.
    pub fn next_key(&self) -> ItemKey {
        ItemKey(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

// ── QueueStatistics ─────────────────────────────────────────────────────

/// Add, remove and drop rates of one queue.
#[derive(Debug)]
struct QueueRates {
    add: RateStatistics,
    remove: RateStatistics,
    drop: RateStatistics,
}

/// Counters, rates and histograms for one queue.
#[derive(Debug)]
pub struct QueueStatistics {
    added: AtomicU64,
    removed: AtomicU64,
    dropped: AtomicU64,
    first_added_at: OnceLock<Duration>,
    rates: Option<QueueRates>,
    size_at_remove: BucketStats,
    wait_time: Option<BucketStats>,
    clock: Arc<dyn Clock>,
}

impl QueueStatistics {
    /// Creates empty statistics for a queue of `capacity`.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError`](crate::StatsError) if the configured wait-time
    /// thresholds or rate window are invalid.
    pub fn new(capacity: usize, config: &StatsConfig, clock: Arc<dyn Clock>) -> StatsResult<Self> {
        let rates = if config.track_rates() {
            let rate = || RateStatistics::new(config.rate_window(), RATE_SCALE_PER_SECOND, Arc::clone(&clock));
            Some(QueueRates { add: rate()?, remove: rate()?, drop: rate()? })
        } else {
            None
        };
        let wait_time = if config.track_wait_times() {
            Some(BucketStats::with_labels(
                config.wait_time_thresholds_ms(),
                WAIT_TIME_LABEL,
                WAIT_TIME_BUCKET_LABEL,
            )?)
        } else {
            None
        };
        let size_at_remove = BucketStats::with_labels(
            &queue_size_thresholds(capacity, config.max_bucketed_capacity()),
            SIZE_AT_REMOVE_LABEL,
            "",
        )?;

        Ok(Self {
            added: AtomicU64::new(0),
            removed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            first_added_at: OnceLock::new(),
            rates,
            size_at_remove,
            wait_time,
            clock,
        })
    }

    /// Registers an item added at `now`.
    pub fn added(&self, now: Duration) {
        self.first_added_at.get_or_init(|| now);
        if let Some(rates) = &self.rates {
            rates.add.update_at(1, to_millis(now));
        }
        self.added.fetch_add(1, Ordering::Relaxed);
    }

    /// Registers an item removed at `now`, leaving `queue_size` items behind.
    ///
    /// `wait` is how long the item spent in the queue, when known.
    pub fn removed(&self, now: Duration, queue_size: usize, wait: Option<Duration>) {
        if let Some(rates) = &self.rates {
            rates.remove.update_at(1, to_millis(now));
        }
        self.removed.fetch_add(1, Ordering::Relaxed);
        self.size_at_remove.add_value(to_i64(queue_size));
        if let (Some(wait_time), Some(wait)) = (&self.wait_time, wait) {
            wait_time.add_value(i64::try_from(wait.as_millis()).unwrap_or(i64::MAX));
        }
    }

    /// Registers an item dropped at `now`.
    pub fn dropped(&self, now: Duration) {
        if let Some(rates) = &self.rates {
            rates.drop.update_at(1, to_millis(now));
        }
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Whether wait times are recorded.
    #[must_use]
    pub fn tracks_wait_times(&self) -> bool {
        self.wait_time.is_some()
    }

    /// Returns a best-effort consistent copy of all statistics as of the
    /// clock's current time.
    #[must_use]
    pub fn snapshot(&self) -> QueueStatsSnapshot {
        let now = self.clock.now();
        let now_ms = to_millis(now);
        let rates = self.rates.as_ref();
        QueueStatsSnapshot {
            added: self.added.load(Ordering::Relaxed),
            removed: self.removed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            add_rate: rates.map(|r| r.add.rate_at(now_ms)),
            remove_rate: rates.map(|r| r.remove.rate_at(now_ms)),
            drop_rate: rates.map(|r| r.drop.rate_at(now_ms)),
            duration: self.first_added_at.get().map(|&first| now.saturating_sub(first)),
            size_at_remove: self.size_at_remove.snapshot(),
            wait_time: self.wait_time.as_ref().map(BucketStats::snapshot),
        }
    }

    /// Exports a snapshot as an ordered JSON object.
    #[must_use]
    pub fn to_json(&self) -> Value {
        self.snapshot().to_json()
    }

    /// Logs a snapshot under `queue_id`.
    ///
    /// Emits nothing for a queue that has seen no events. Warns when more
    /// than 5% of the added items were dropped.
    pub fn log_stats(&self, queue_id: &str) {
        let snapshot = self.snapshot();
        if snapshot.added == 0 && snapshot.dropped == 0 {
            return;
        }

        info!(
            queue_id,
            added = snapshot.added,
            removed = snapshot.removed,
            dropped = snapshot.dropped,
            add_rate = snapshot.add_rate,
            remove_rate = snapshot.remove_rate,
            drop_rate = snapshot.drop_rate,
            duration_s = snapshot.duration_s(),
            size_at_remove_p99 = snapshot.size_at_remove.buckets.p99_upper_bound(),
            wait_time_ms_p99 = snapshot.wait_time.as_ref().and_then(|w| w.buckets.p99_upper_bound()),
            "Queue statistics snapshot"
        );

        if snapshot.drop_ratio() > HIGH_DROP_RATIO {
            warn!(
                queue_id,
                drop_ratio = snapshot.drop_ratio(),
                dropped = snapshot.dropped,
                added = snapshot.added,
                "High queue drop ratio detected"
            );
        }
    }
}

/// Immutable copy of a [`QueueStatistics`] taken at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueStatsSnapshot {
    /// Items reported as added.
    pub added: u64,
    /// Items reported as removed.
    pub removed: u64,
    /// Items reported as dropped.
    pub dropped: u64,
    /// Adds per second over the rate window, `None` when rates are disabled.
    pub add_rate: Option<u64>,
    /// Removals per second over the rate window.
    pub remove_rate: Option<u64>,
    /// Drops per second over the rate window.
    pub drop_rate: Option<u64>,
    /// Time since the first add, `None` before any item was added.
    pub duration: Option<Duration>,
    /// Queue size observed right after each removal.
    pub size_at_remove: BucketStatsSnapshot,
    /// Milliseconds each removed item waited, `None` when not tracked.
    pub wait_time: Option<BucketStatsSnapshot>,
}

impl QueueStatsSnapshot {
    /// Seconds since the first add.
    #[must_use]
    pub fn duration_s(&self) -> Option<f64> {
        self.duration.map(|d| d.as_secs_f64())
    }

    /// Removals per second averaged over the whole lifetime.
    ///
    /// `None` before any item was added or while no time has passed since.
    #[must_use]
    pub fn average_remove_rate_pps(&self) -> Option<f64> {
        self.duration_s().filter(|&secs| secs > 0.0).map(|secs| self.removed as f64 / secs)
    }

    /// Fraction of added items that were dropped.
    #[must_use]
    pub fn drop_ratio(&self) -> f64 {
        if self.added == 0 { 0.0 } else { self.dropped as f64 / self.added as f64 }
    }

    /// Exports this snapshot as an ordered JSON object.
    ///
    /// Rate keys are present only when rates are tracked, `duration_s` and
    /// `average_remove_rate_pps` only once an item was added, and
    /// `queue_wait_time` only when wait times are tracked.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        map.insert("added".to_owned(), json!(self.added));
        map.insert("removed".to_owned(), json!(self.removed));
        map.insert("dropped".to_owned(), json!(self.dropped));
        for (key, rate) in [
            ("add_rate", self.add_rate),
            ("remove_rate", self.remove_rate),
            ("drop_rate", self.drop_rate),
        ] {
            if let Some(rate) = rate {
                map.insert(key.to_owned(), json!(rate));
            }
        }
        if let Some(duration_s) = self.duration_s() {
            map.insert("duration_s".to_owned(), json!(duration_s));
            map.insert("average_remove_rate_pps".to_owned(), json!(self.average_remove_rate_pps()));
        }
        map.insert(
            "queue_size_at_remove".to_owned(),
            self.size_at_remove.to_json(BucketFormat::Separate, SIZE_AT_REMOVE_LABEL, ""),
        );
        if let Some(wait_time) = &self.wait_time {
            map.insert(
                "queue_wait_time".to_owned(),
                wait_time.to_json(BucketFormat::Separate, WAIT_TIME_LABEL, WAIT_TIME_BUCKET_LABEL),
            );
        }
        Value::Object(map)
    }
}

// ── QueueStatsRegistry ──────────────────────────────────────────────────

/// Shared [`QueueStatistics`] keyed by queue id.
///
/// Records are created on first use and live as long as the registry. The
/// number of distinct queue ids in a process is small, so nothing is ever
/// removed.
#[derive(Debug)]
pub struct QueueStatsRegistry {
    config: StatsConfig,
    clock: Arc<dyn Clock>,
    queues: RwLock<BTreeMap<String, Arc<QueueStatistics>>>,
}

impl QueueStatsRegistry {
    /// Creates an empty registry reading the system clock.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError`](crate::StatsError) if `config` fails validation.
    pub fn new(config: StatsConfig) -> StatsResult<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates an empty registry reading `clock`.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError`](crate::StatsError) if `config` fails validation.
    pub fn with_clock(config: StatsConfig, clock: Arc<dyn Clock>) -> StatsResult<Self> {
        config.validate()?;
        Ok(Self { config, clock, queues: RwLock::new(BTreeMap::new()) })
    }

    #[must_use]
    pub fn config(&self) -> &StatsConfig {
        &self.config
    }

    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Returns the shared statistics for `queue_id`, creating them on first use.
    ///
    /// Queues sharing an id are assumed to share a capacity; only the first
    /// caller's `capacity` shapes the queue-size histogram.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError`](crate::StatsError) if the statistics cannot be
    /// built from the registry's configuration.
    pub fn stats_for(&self, queue_id: &str, capacity: usize) -> StatsResult<Arc<QueueStatistics>> {
        if let Some(stats) = self.queues.read().get(queue_id) {
            return Ok(Arc::clone(stats));
        }

        let mut queues = self.queues.write();
        if let Some(stats) = queues.get(queue_id) {
            return Ok(Arc::clone(stats));
        }
        let stats = Arc::new(QueueStatistics::new(capacity, &self.config, Arc::clone(&self.clock))?);
        queues.insert(queue_id.to_owned(), Arc::clone(&stats));
        debug!(queue_id, capacity, "Created shared queue statistics");
        Ok(stats)
    }

    /// Returns the shared statistics for `queue_id` if any were created.
    #[must_use]
    pub fn get(&self, queue_id: &str) -> Option<Arc<QueueStatistics>> {
        self.queues.read().get(queue_id).cloned()
    }

    /// Ids of all known queues, in lexicographic order.
    #[must_use]
    pub fn queue_ids(&self) -> Vec<String> {
        self.queues.read().keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queues.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queues.read().is_empty()
    }

    /// Exports every queue's statistics as one JSON object keyed by queue id.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let queues = self.queues.read();
        let map: Map<String, Value> =
            queues.iter().map(|(id, stats)| (id.clone(), stats.to_json())).collect();
        Value::Object(map)
    }

    /// Logs every queue's statistics.
    pub fn log_stats(&self) {
        let queues: Vec<_> =
            self.queues.read().iter().map(|(id, stats)| (id.clone(), Arc::clone(stats))).collect();
        for (queue_id, stats) in queues {
            stats.log_stats(&queue_id);
        }
    }
}

// ── QueueObserver ───────────────────────────────────────────────────────

/// Receiver of queue lifecycle events.
///
/// Implementations are called on the queue's hot path and must not block.
pub trait QueueObserver: Send + Sync {
    /// `item` entered the queue.
    fn added(&self, item: ItemKey);

    /// `item` left the queue to be processed.
    fn removed(&self, item: ItemKey);

    /// `item` left the queue without being processed.
    fn dropped(&self, item: ItemKey);
}

/// [`QueueObserver`] recording into shared and, optionally, local
/// [`QueueStatistics`].
#[derive(Debug)]
pub struct QueueStatisticsObserver {
    queue_id: String,
    global: Arc<QueueStatistics>,
    local: Option<QueueStatistics>,
    insertion_times: Option<Mutex<HashMap<ItemKey, Duration>>>,
    queue_size: AtomicUsize,
    clock: Arc<dyn Clock>,
}

impl QueueStatisticsObserver {
    /// Creates an observer for a queue of `capacity` registered under
    /// `queue_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError`](crate::StatsError) if the statistics cannot be
    /// built from the registry's configuration.
    pub fn new(
        registry: &QueueStatsRegistry,
        queue_id: impl Into<String>,
        capacity: usize,
    ) -> StatsResult<Self> {
        let queue_id = queue_id.into();
        let config = registry.config();
        let clock = Arc::clone(registry.clock());
        let global = registry.stats_for(&queue_id, capacity)?;
        let local = if config.local_stats() {
            Some(QueueStatistics::new(capacity, config, Arc::clone(&clock))?)
        } else {
            None
        };
        let insertion_times = config.track_wait_times().then(|| Mutex::new(HashMap::new()));

        Ok(Self { queue_id, global, local, insertion_times, queue_size: AtomicUsize::new(0), clock })
    }

    #[must_use]
    pub fn queue_id(&self) -> &str {
        &self.queue_id
    }

    /// Number of items currently in the observed queue.
    #[must_use]
    pub fn queue_size(&self) -> usize {
        self.queue_size.load(Ordering::Relaxed)
    }

    /// Statistics shared by every queue with this queue's id.
    #[must_use]
    pub fn global_stats(&self) -> &Arc<QueueStatistics> {
        &self.global
    }

    /// Statistics of this queue alone, when enabled.
    #[must_use]
    pub fn local_stats(&self) -> Option<&QueueStatistics> {
        self.local.as_ref()
    }

    /// Exports the local statistics, when enabled.
    #[must_use]
    pub fn local_stats_json(&self) -> Option<Value> {
        self.local.as_ref().map(QueueStatistics::to_json)
    }

    /// Number of in-flight items whose insertion time is being tracked.
    #[must_use]
    pub fn tracked_items(&self) -> usize {
        self.insertion_times.as_ref().map_or(0, |times| times.lock().len())
    }

    /// Decrements the size mirror and returns the new size.
    fn shrink(&self) -> usize {
        let previous = self
            .queue_size
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |size| Some(size.saturating_sub(1)))
            .unwrap_or_default();
        previous.saturating_sub(1)
    }

    fn take_insertion_time(&self, item: ItemKey) -> Option<Duration> {
        self.insertion_times.as_ref().and_then(|times| times.lock().remove(&item))
    }

    fn for_each_stats(&self, record: impl Fn(&QueueStatistics)) {
        if let Some(local) = &self.local {
            record(local);
        }
        record(&self.global);
    }
}

impl QueueObserver for QueueStatisticsObserver {
    fn added(&self, item: ItemKey) {
        let now = self.clock.now();
        if let Some(times) = &self.insertion_times {
            times.lock().insert(item, now);
        }
        self.queue_size.fetch_add(1, Ordering::Relaxed);
        self.for_each_stats(|stats| stats.added(now));
    }

    fn removed(&self, item: ItemKey) {
        let now = self.clock.now();
        let queue_size = self.shrink();
        let wait = self.take_insertion_time(item).map(|then| now.saturating_sub(then));
        self.for_each_stats(|stats| stats.removed(now, queue_size, wait));
    }

    fn dropped(&self, item: ItemKey) {
        let now = self.clock.now();
        self.shrink();
        self.take_insertion_time(item);
        self.for_each_stats(|stats| stats.dropped(now));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn registry(config: StatsConfig) -> (Arc<ManualClock>, QueueStatsRegistry) {
        let clock = Arc::new(ManualClock::new());
        let registry = QueueStatsRegistry::with_clock(config, clock.clone()).unwrap();
        (clock, registry)
    }

    // ------------------------------------------------------------------
    // Thresholds
    // ------------------------------------------------------------------

    #[test]
    fn test_queue_size_thresholds_small_queues() {
        assert_eq!(queue_size_thresholds(0, 16384), [0, i64::MAX]);
        assert_eq!(queue_size_thresholds(1, 16384), [0, i64::MAX]);
        assert_eq!(queue_size_thresholds(2, 16384), [0, 1, i64::MAX]);
        assert_eq!(queue_size_thresholds(16, 16384), [0, 1, 4, 8, 12, i64::MAX]);
    }

    #[test]
    fn test_queue_size_thresholds_skip_marks_below_last_power() {
        // Half (50) is below 64, three quarters (75) is above it.
        assert_eq!(queue_size_thresholds(100, 16384), [0, 1, 4, 16, 64, 75, i64::MAX]);
    }

    #[test]
    fn test_queue_size_thresholds_at_cap() {
        assert_eq!(
            queue_size_thresholds(16384, 16384),
            [0, 1, 4, 16, 64, 256, 1024, 4096, 8192, 12288, i64::MAX]
        );
    }

    #[test]
    fn test_queue_size_thresholds_above_cap() {
        assert_eq!(
            queue_size_thresholds(100_000, 16384),
            [0, 1, 4, 16, 64, 256, 1024, 4096, 16384, i64::MAX]
        );
        assert_eq!(queue_size_thresholds(100, 1), [0, 1, i64::MAX]);
    }

    #[test]
    fn test_queue_size_thresholds_always_build_a_histogram() {
        for capacity in [0, 1, 2, 3, 5, 7, 63, 64, 65, 1000, 16383, 16385, usize::MAX] {
            for cap in [1, 2, 100, 16384] {
                let thresholds = queue_size_thresholds(capacity, cap);
                assert!(BucketStats::new(&thresholds).is_ok(), "{capacity}/{cap}: {thresholds:?}");
            }
        }
    }

    #[test]
    fn test_item_keys_are_unique() {
        let keys = ItemKeys::new();
        let a = keys.next_key();
        let b = keys.next_key();
        assert_eq!(a.get(), 0);
        assert_ne!(a, b);
        assert_eq!(ItemKey::new(7).get(), 7);
    }

    // ------------------------------------------------------------------
    // QueueStatistics
    // ------------------------------------------------------------------

    #[test]
    fn test_statistics_count_events() {
        let clock = Arc::new(ManualClock::new());
        let stats = QueueStatistics::new(16, &StatsConfig::default(), clock.clone()).unwrap();

        stats.added(clock.now());
        stats.added(clock.now());
        stats.removed(clock.now(), 1, None);
        stats.dropped(clock.now());

        let snapshot = stats.snapshot();
        assert_eq!((snapshot.added, snapshot.removed, snapshot.dropped), (2, 1, 1));
        assert_eq!(snapshot.size_at_remove.total_count, 1);
        assert_eq!(snapshot.size_at_remove.min_value, Some(1));
        assert!(snapshot.wait_time.is_none());
        assert!(!stats.tracks_wait_times());
    }

    #[test]
    fn test_statistics_rates_per_second() {
        let clock = Arc::new(ManualClock::new());
        let stats = QueueStatistics::new(16, &StatsConfig::default(), clock.clone()).unwrap();

        for _ in 0..50 {
            stats.added(clock.now());
            clock.elapse(Duration::from_millis(100));
        }
        // 50 adds within the 5 second window.
        assert_eq!(stats.snapshot().add_rate, Some(10));
        assert_eq!(stats.snapshot().remove_rate, Some(0));

        clock.elapse(Duration::from_secs(10));
        assert_eq!(stats.snapshot().add_rate, Some(0));
    }

    #[test]
    fn test_statistics_without_rates() {
        let clock = Arc::new(ManualClock::new());
        let config = StatsConfig::builder().track_rates(false).build().unwrap();
        let stats = QueueStatistics::new(16, &config, clock.clone()).unwrap();
        stats.added(clock.now());

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.add_rate, None);
        let json = snapshot.to_json();
        assert!(json.get("add_rate").is_none());
        assert_eq!(json["added"], 1);
    }

    #[test]
    fn test_statistics_duration_and_average_remove_rate() {
        let clock = Arc::new(ManualClock::starting_at(Duration::from_secs(100)));
        let stats = QueueStatistics::new(16, &StatsConfig::default(), clock.clone()).unwrap();
        assert_eq!(stats.snapshot().duration, None);
        assert_eq!(stats.snapshot().average_remove_rate_pps(), None);

        stats.added(clock.now());
        assert_eq!(stats.snapshot().average_remove_rate_pps(), None);

        clock.elapse(Duration::from_secs(2));
        for _ in 0..10 {
            stats.removed(clock.now(), 0, None);
        }
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.duration_s(), Some(2.0));
        assert_eq!(snapshot.average_remove_rate_pps(), Some(5.0));
    }

    #[test]
    fn test_statistics_wait_times() {
        let clock = Arc::new(ManualClock::new());
        let config = StatsConfig::builder().track_wait_times(true).build().unwrap();
        let stats = QueueStatistics::new(16, &config, clock.clone()).unwrap();

        stats.removed(clock.now(), 0, Some(Duration::from_millis(3)));
        stats.removed(clock.now(), 0, Some(Duration::from_millis(700)));
        stats.removed(clock.now(), 0, None);

        let wait = stats.snapshot().wait_time.unwrap();
        assert_eq!(wait.total_count, 2);
        assert_eq!(wait.total_value, 703);
        assert_eq!(wait.max_value, Some(700));
    }

    #[test]
    fn test_drop_ratio() {
        let clock = Arc::new(ManualClock::new());
        let stats = QueueStatistics::new(16, &StatsConfig::default(), clock.clone()).unwrap();
        assert_eq!(stats.snapshot().drop_ratio(), 0.0);

        for _ in 0..4 {
            stats.added(clock.now());
        }
        stats.dropped(clock.now());
        assert_eq!(stats.snapshot().drop_ratio(), 0.25);
    }

    #[test]
    fn test_json_key_order() {
        let clock = Arc::new(ManualClock::new());
        let config = StatsConfig::builder().track_wait_times(true).build().unwrap();
        let stats = QueueStatistics::new(16, &config, clock.clone()).unwrap();
        stats.added(clock.now());
        clock.elapse(Duration::from_secs(1));
        stats.removed(clock.now(), 0, Some(Duration::from_secs(1)));

        let json = stats.to_json();
        let keys: Vec<_> = json.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            [
                "added",
                "removed",
                "dropped",
                "add_rate",
                "remove_rate",
                "drop_rate",
                "duration_s",
                "average_remove_rate_pps",
                "queue_size_at_remove",
                "queue_wait_time",
            ]
        );

        let size = &json["queue_size_at_remove"];
        assert_eq!(size["average_queue_size_at_remove"], 0.0);
        assert_eq!(size["buckets"]["0_to_1"], 1);
        let wait = &json["queue_wait_time"];
        assert_eq!(wait["max_queue_wait_time_ms"], 1000);
        assert_eq!(wait["buckets"]["1000_to_max ms"], 1);
    }

    // ------------------------------------------------------------------
    // Registry and observer
    // ------------------------------------------------------------------

    #[test]
    fn test_registry_returns_same_record_per_id() {
        let (_clock, registry) = registry(StatsConfig::default());
        let a = registry.stats_for("video", 64).unwrap();
        let b = registry.stats_for("video", 1024).unwrap();
        let c = registry.stats_for("audio", 64).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.queue_ids(), ["audio", "video"]);
        assert!(registry.get("data").is_none());
    }

    #[test]
    fn test_registry_rejects_invalid_config() {
        let mut config = StatsConfig::default();
        config.rate_window = Duration::ZERO;
        assert!(QueueStatsRegistry::with_clock(config, Arc::new(ManualClock::new())).is_err());
    }

    #[test]
    fn test_registry_json_keyed_by_queue_id() {
        let (_clock, registry) = registry(StatsConfig::default());
        registry.stats_for("b", 8).unwrap().added(Duration::ZERO);
        registry.stats_for("a", 8).unwrap();

        let json = registry.to_json();
        let keys: Vec<_> = json.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, ["a", "b"]);
        assert_eq!(json["b"]["added"], 1);
        assert_eq!(json["a"]["added"], 0);
    }

    #[test]
    fn test_observers_share_global_stats() {
        let (_clock, registry) = registry(StatsConfig::default());
        let first = QueueStatisticsObserver::new(&registry, "q", 16).unwrap();
        let second = QueueStatisticsObserver::new(&registry, "q", 16).unwrap();

        first.added(ItemKey::new(1));
        second.added(ItemKey::new(1));
        second.dropped(ItemKey::new(1));

        let global = registry.get("q").unwrap().snapshot();
        assert_eq!(global.added, 2);
        assert_eq!(global.dropped, 1);
        assert!(first.local_stats().is_none());
        assert!(first.local_stats_json().is_none());
    }

    #[test]
    fn test_local_stats_are_per_observer() {
        let config = StatsConfig::builder().local_stats(true).build().unwrap();
        let (_clock, registry) = registry(config);
        let first = QueueStatisticsObserver::new(&registry, "q", 16).unwrap();
        let second = QueueStatisticsObserver::new(&registry, "q", 16).unwrap();

        first.added(ItemKey::new(1));
        first.added(ItemKey::new(2));
        second.added(ItemKey::new(3));

        assert_eq!(first.local_stats().unwrap().snapshot().added, 2);
        assert_eq!(second.local_stats().unwrap().snapshot().added, 1);
        assert_eq!(first.global_stats().snapshot().added, 3);
        assert_eq!(first.local_stats_json().unwrap()["added"], 2);
    }

    #[test]
    fn test_size_at_remove_is_recorded_after_decrement() {
        let (_clock, registry) = registry(StatsConfig::default());
        let observer = QueueStatisticsObserver::new(&registry, "q", 16).unwrap();
        let keys = ItemKeys::new();
        let items: Vec<_> = (0..3).map(|_| keys.next_key()).collect();

        for &item in &items {
            observer.added(item);
        }
        assert_eq!(observer.queue_size(), 3);
        observer.removed(items[0]);
        observer.removed(items[1]);

        let sizes = observer.global_stats().snapshot().size_at_remove;
        assert_eq!(sizes.max_value, Some(2));
        assert_eq!(sizes.min_value, Some(1));
        assert_eq!(observer.queue_size(), 1);
    }

    #[test]
    fn test_queue_size_mirror_never_underflows() {
        let (_clock, registry) = registry(StatsConfig::default());
        let observer = QueueStatisticsObserver::new(&registry, "q", 16).unwrap();
        observer.removed(ItemKey::new(9));
        observer.dropped(ItemKey::new(9));
        assert_eq!(observer.queue_size(), 0);
        assert_eq!(observer.global_stats().snapshot().size_at_remove.min_value, Some(0));
    }

    #[test]
    fn test_wait_time_tracking() {
        let config = StatsConfig::builder().track_wait_times(true).build().unwrap();
        let (clock, registry) = registry(config);
        let observer = QueueStatisticsObserver::new(&registry, "q", 16).unwrap();

        observer.added(ItemKey::new(1));
        observer.added(ItemKey::new(2));
        assert_eq!(observer.tracked_items(), 2);

        clock.elapse(Duration::from_millis(30));
        observer.removed(ItemKey::new(1));
        observer.dropped(ItemKey::new(2));
        assert_eq!(observer.tracked_items(), 0);

        let wait = observer.global_stats().snapshot().wait_time.unwrap();
        assert_eq!(wait.total_count, 1);
        assert_eq!(wait.total_value, 30);
    }

    #[test]
    fn test_unknown_item_has_no_wait_time() {
        let config = StatsConfig::builder().track_wait_times(true).build().unwrap();
        let (_clock, registry) = registry(config);
        let observer = QueueStatisticsObserver::new(&registry, "q", 16).unwrap();

        observer.removed(ItemKey::new(42));

        let snapshot = observer.global_stats().snapshot();
        assert_eq!(snapshot.removed, 1);
        assert_eq!(snapshot.wait_time.unwrap().total_count, 0);
    }

    #[test]
    fn test_wait_tracking_disabled_keeps_no_map() {
        let (_clock, registry) = registry(StatsConfig::default());
        let observer = QueueStatisticsObserver::new(&registry, "q", 16).unwrap();
        observer.added(ItemKey::new(1));
        assert_eq!(observer.tracked_items(), 0);
    }
}

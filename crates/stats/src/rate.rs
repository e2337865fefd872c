//! Windowed event rates over a circular buffer of per-tick counters.
//!
//! A [`RateTracker`] divides time into ticks of `bucket_size` and keeps one
//! counter per tick for the trailing window, plus a running total of all live
//! counters. Ticks that fall out of the window are zeroed lazily, right before
//! the next read or write that would otherwise observe them, so every
//! operation is amortized O(1) and memory is fixed at construction.
//!
//! The buffer, the window start and the running total change together during
//! eviction, so each tracker guards them with a single [`parking_lot::Mutex`]
//! held only for the duration of one update or query.
//!
//! # Example
//!
//! ```
//! use std::{sync::Arc, time::Duration};
//! use inferadb_common_stats::{ManualClock, RateTracker};
//!
//! let clock = Arc::new(ManualClock::new());
//! let tracker = RateTracker::with_window(Duration::from_secs(1), Duration::from_millis(1), clock.clone())?;
//!
//! for _ in 0..1000 {
//!     tracker.update(1);
//!     clock.elapse(Duration::from_millis(1));
//! }
//! assert_eq!(tracker.rate(), 1000);
//!
//! clock.elapse(Duration::from_secs(1));
//! assert_eq!(tracker.rate(), 0);
//! # Ok::<(), inferadb_common_stats::StatsError>(())
//! ```

use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use tracing::trace;

use crate::{
    clock::Clock,
    error::{StatsError, StatsResult},
};

/// Default window for [`RateStatistics`], in milliseconds.
pub const DEFAULT_RATE_WINDOW_MS: u64 = 1000;

/// Default [`RateStatistics`] scale: bytes counted, bits per second reported.
pub const DEFAULT_RATE_SCALE: f64 = 8000.0;

/// Tracks the rate of values added via [`update`](RateTracker::update) over a
/// sliding window.
#[derive(Debug)]
pub struct RateTracker {
    state: Mutex<RateWindow>,
    bucket_size_ms: u64,
    window_size_ms: u64,
    clock: Arc<dyn Clock>,
}

/// Mutable tracker state. One tick corresponds to `bucket_size_ms` on the clock.
#[derive(Debug)]
struct RateWindow {
    /// Circular buffer with `num_buckets + 1` per-tick counters.
    buckets: Box<[u64]>,
    /// Buffer index of the oldest tick.
    oldest_index: usize,
    /// Oldest tick still in the window.
    oldest_time: u64,
    /// Sum of all counters in `buckets`.
    accumulated_count: u64,
}

impl RateWindow {
    fn new(num_buckets: usize) -> Self {
        Self {
            buckets: vec![0; num_buckets + 1].into_boxed_slice(),
            oldest_index: 0,
            oldest_time: 0,
            accumulated_count: 0,
        }
    }

    /// Zeroes every tick older than `now - buckets.len() + 1`.
    fn erase_old(&mut self, now: u64) {
        let len = self.buckets.len();
        let new_oldest_time = now.saturating_sub(len as u64 - 1);
        if new_oldest_time <= self.oldest_time {
            return;
        }
        while self.oldest_time < new_oldest_time {
            let index = self.oldest_index;
            self.accumulated_count -= self.buckets[index];
            self.buckets[index] = 0;
            self.oldest_index = (index + 1) % len;
            self.oldest_time += 1;
            if self.accumulated_count == 0 {
                // Everything left is already zero, so the buffer is visited at
                // most once even when `now` jumps far ahead.
                break;
            }
        }
        self.oldest_time = new_oldest_time;
    }

    /// Adds `count` at tick `now`. Returns `false` if `now` precedes the window.
    fn add(&mut self, count: u64, now: u64) -> bool {
        if now < self.oldest_time {
            return false;
        }
        self.erase_old(now);
        let offset = (now - self.oldest_time) as usize;
        let index = (self.oldest_index + offset) % self.buckets.len();
        self.buckets[index] += count;
        self.accumulated_count += count;
        true
    }
}

/// `d` in milliseconds, or 0 when it has a sub-millisecond remainder.
fn whole_millis(d: Duration) -> u64 {
    if d.subsec_nanos() % 1_000_000 != 0 {
        return 0;
    }
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl RateTracker {
    /// Creates a tracker with `num_buckets` ticks of `bucket_size` each.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError::InvalidWindow`] if `num_buckets` is zero or
    /// `bucket_size` is not a positive whole number of milliseconds.
    pub fn new(num_buckets: usize, bucket_size: Duration, clock: Arc<dyn Clock>) -> StatsResult<Self> {
        let bucket_size_ms = whole_millis(bucket_size);
        let window_size_ms = bucket_size_ms.saturating_mul(num_buckets as u64);
        if num_buckets == 0 || bucket_size_ms == 0 {
            return Err(StatsError::invalid_window(window_size_ms, bucket_size_ms));
        }
        Ok(Self { state: Mutex::new(RateWindow::new(num_buckets)), bucket_size_ms, window_size_ms, clock })
    }

    /// Creates a tracker covering `window`, split into ticks of `bucket_size`.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError::InvalidWindow`] if `bucket_size` does not divide
    /// `window` evenly, or either is not a positive whole number of
    /// milliseconds.
    pub fn with_window(window: Duration, bucket_size: Duration, clock: Arc<dyn Clock>) -> StatsResult<Self> {
        let window_ms = whole_millis(window);
        let bucket_size_ms = whole_millis(bucket_size);
        if window_ms == 0 || bucket_size_ms == 0 || window_ms % bucket_size_ms != 0 {
            return Err(StatsError::invalid_window(window_ms, bucket_size_ms));
        }
        Self::new((window_ms / bucket_size_ms) as usize, bucket_size, clock)
    }

    /// The window length in milliseconds.
    #[must_use]
    pub fn window_size_ms(&self) -> u64 {
        self.window_size_ms
    }

    /// The tick length in milliseconds.
    #[must_use]
    pub fn bucket_size_ms(&self) -> u64 {
        self.bucket_size_ms
    }

    /// Records `count` at the clock's current time.
    pub fn update(&self, count: u64) {
        self.update_at(count, self.clock.now_millis());
    }

    /// Records `count` at `now_ms`.
    ///
    /// Updates older than the window start are too late to count and are
    /// silently ignored.
    pub fn update_at(&self, count: u64, now_ms: u64) {
        let now = now_ms / self.bucket_size_ms;
        if !self.state.lock().add(count, now) {
            trace!(now_ms, count, "Ignoring update older than the rate window");
        }
    }

    /// Returns the rate in units per second at the clock's current time.
    #[must_use]
    pub fn rate(&self) -> u64 {
        self.rate_at(self.clock.now_millis())
    }

    /// Returns the rate in units per second as of `now_ms`, rounded to nearest.
    #[must_use]
    pub fn rate_at(&self, now_ms: u64) -> u64 {
        let count = self.accumulated_count_at(now_ms);
        (count as f64 * 1000.0 / self.window_size_ms as f64 + 0.5) as u64
    }

    /// Returns the windowed sum at the clock's current time.
    #[must_use]
    pub fn accumulated_count(&self) -> u64 {
        self.accumulated_count_at(self.clock.now_millis())
    }

    /// Returns the windowed sum as of `now_ms`, without rate conversion.
    #[must_use]
    pub fn accumulated_count_at(&self, now_ms: u64) -> u64 {
        let mut state = self.state.lock();
        state.erase_old(now_ms / self.bucket_size_ms);
        state.accumulated_count
    }
}

/// A [`RateTracker`] with 1 ms ticks whose rate is reported in an arbitrary
/// unit.
///
/// `scale` converts counts per millisecond to the target unit and is applied
/// only when the rate is read, so no precision is lost at storage time. With
/// bytes as input, a scale of `8000` reports bits per second; `1000` reports
/// units per second.
#[derive(Debug)]
pub struct RateStatistics {
    tracker: RateTracker,
    scale: f64,
}

impl RateStatistics {
    /// Creates rate statistics over `window` with the given `scale`.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError::InvalidWindow`] if `window` is not a positive
    /// whole number of milliseconds.
    pub fn new(window: Duration, scale: f64, clock: Arc<dyn Clock>) -> StatsResult<Self> {
        let tracker = RateTracker::with_window(window, Duration::from_millis(1), clock)?;
        Ok(Self { tracker, scale })
    }

    /// Creates bits-per-second statistics over a one second window.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the default window is always valid.
    pub fn with_defaults(clock: Arc<dyn Clock>) -> StatsResult<Self> {
        Self::new(Duration::from_millis(DEFAULT_RATE_WINDOW_MS), DEFAULT_RATE_SCALE, clock)
    }

    /// The underlying unscaled tracker.
    #[must_use]
    pub fn tracker(&self) -> &RateTracker {
        &self.tracker
    }

    /// Records `count` at the clock's current time.
    pub fn update(&self, count: u64) {
        self.tracker.update(count);
    }

    /// Records `count` at `now_ms`.
    pub fn update_at(&self, count: u64, now_ms: u64) {
        self.tracker.update_at(count, now_ms);
    }

    /// Returns the scaled rate at the clock's current time.
    #[must_use]
    pub fn rate(&self) -> u64 {
        self.rate_at(self.tracker.clock.now_millis())
    }

    /// Returns the scaled rate as of `now_ms`, rounded to nearest.
    #[must_use]
    pub fn rate_at(&self, now_ms: u64) -> u64 {
        let count = self.tracker.accumulated_count_at(now_ms);
        (count as f64 * self.scale / self.tracker.window_size_ms as f64 + 0.5) as u64
    }

    /// Returns the windowed sum at the clock's current time.
    #[must_use]
    pub fn accumulated_count(&self) -> u64 {
        self.tracker.accumulated_count()
    }

    /// Returns the windowed sum as of `now_ms`.
    #[must_use]
    pub fn accumulated_count_at(&self, now_ms: u64) -> u64 {
        self.tracker.accumulated_count_at(now_ms)
    }
}

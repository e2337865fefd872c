//! Bounded-memory, time-windowed statistics for InferaDB services.
//!
//! This crate lets a hot-path component record timestamped events and ask, at
//! any moment, for a moving rate, a histogram with percentile bounds, or a
//! moving average, all in memory fixed at construction.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Queue / pipeline                       │
//! │              (reports added, removed, dropped)              │
//! ├─────────────────────────────────────────────────────────────┤
//! │   QueueStatisticsObserver ──► QueueStatsRegistry (by id)    │
//! │        local QueueStatistics │ shared QueueStatistics       │
//! ├──────────────┬──────────────┬───────────────────────────────┤
//! │ BucketStats  │ RateTracker  │ TimeBasedSlidingWindow        │
//! │ (histogram)  │ (rates)      │   └── MovingAverage           │
//! ├──────────────┴──────────────┴───────────────────────────────┤
//! │                 Clock (SystemClock, ManualClock)            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use std::{sync::Arc, time::Duration};
//! use inferadb_common_stats::{BucketStats, ManualClock, MovingAverage, RateTracker};
//!
//! let clock = Arc::new(ManualClock::new());
//!
//! // Events per second over the last second.
//! let rate = RateTracker::with_window(Duration::from_secs(1), Duration::from_millis(1), clock.clone())?;
//! rate.update(5);
//! assert_eq!(rate.rate(), 5);
//!
//! // Delay histogram with p99/p999 bounds.
//! let delays = BucketStats::new(&[0, 5, 20, 100, i64::MAX])?;
//! delays.add_value(12);
//! assert_eq!(delays.snapshot().total_count, 1);
//!
//! // Average of the last five seconds.
//! let average = MovingAverage::new(Duration::from_secs(5), clock.clone());
//! average.add(3);
//! assert_eq!(average.get(), 3.0);
//! # Ok::<(), inferadb_common_stats::StatsError>(())
//! ```
//!
//! # Error Handling
//!
//! Only construction can fail: invalid thresholds, windows or configuration
//! return a [`StatsError`]. Steady-state operations never fail. Out-of-range
//! histogram values are counted as discarded, and rate updates older than the
//! window are ignored.
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with shared test helpers (virtual-time
//!   drivers, registry factories, assertion macros). Enable this in `[dev-dependencies]` for
//!   integration tests.

#![deny(unsafe_code)]

pub mod average;
pub mod clock;
pub mod config;
pub mod error;
pub mod histogram;
pub mod queue;
pub mod rate;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod testutil;
pub mod window;

// Re-export primary types at crate root for convenience
pub use average::MovingAverage;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    DEFAULT_MAX_BUCKETED_CAPACITY, DEFAULT_RATE_WINDOW, DEFAULT_WAIT_TIME_THRESHOLDS_MS,
    StatsConfig,
};
pub use error::{ConfigError, StatsError, StatsResult};
pub use histogram::{
    BucketCount, BucketFormat, BucketStats, BucketStatsSnapshot, Buckets, BucketsSnapshot,
    UNDEFINED_BOUND,
};
pub use queue::{
    ItemKey, ItemKeys, QueueObserver, QueueStatistics, QueueStatisticsObserver,
    QueueStatsRegistry, QueueStatsSnapshot, queue_size_thresholds,
};
pub use rate::{DEFAULT_RATE_SCALE, DEFAULT_RATE_WINDOW_MS, RateStatistics, RateTracker};
pub use window::{Entry, EvictingQueue, OnEvict, TimeBasedSlidingWindow, TimeEntry};

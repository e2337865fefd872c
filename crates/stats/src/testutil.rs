//! Shared test utilities for statistics testing.
//!
//! This module provides helpers for driving structures on virtual time and
//! asserting on [`StatsResult`] values. It is feature-gated behind `testutil`
//! to prevent leaking into production builds.
//!
//! # Usage
//!
//! In integration tests, enable the feature in `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! inferadb-common-stats = { path = "../stats", features = ["testutil"] }
//! ```
//!
//! Then import helpers:
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use inferadb_common_stats::testutil::{drive, manual_registry};
//! ```

use std::{sync::Arc, time::Duration};

use crate::{
    clock::ManualClock,
    config::StatsConfig,
    error::{StatsError, StatsResult},
    queue::QueueStatsRegistry,
};

/// Create a [`QueueStatsRegistry`] on a fresh [`ManualClock`].
///
/// # Panics
///
/// Panics if `config` fails validation.
#[must_use]
pub fn manual_registry(config: StatsConfig) -> (Arc<ManualClock>, QueueStatsRegistry) {
    let clock = Arc::new(ManualClock::new());
    let registry =
        QueueStatsRegistry::with_clock(config, clock.clone()).expect("test config must be valid");
    (clock, registry)
}

/// Call `step` `count` times, advancing `clock` by `interval` after each call.
///
/// The closure receives the zero-based iteration index.
pub fn drive(clock: &ManualClock, count: usize, interval: Duration, mut step: impl FnMut(usize)) {
    for i in 0..count {
        step(i);
        clock.elapse(interval);
    }
}

/// Geometric thresholds `[0, 1, base, base^2, ...]` up to `limit`, closed by
/// `i64::MAX`. Useful as a generic histogram layout in tests and benchmarks.
#[must_use]
pub fn geometric_thresholds(base: i64, limit: i64) -> Vec<i64> {
    let mut thresholds = vec![0];
    let mut mark = 1_i64;
    while mark < limit {
        thresholds.push(mark);
        mark = mark.saturating_mul(base.max(2));
    }
    thresholds.push(i64::MAX);
    thresholds
}

/// Assert that a [`StatsResult`] is a [`StatsError::InvalidThresholds`].
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use inferadb_common_stats::{BucketStats, assert_invalid_thresholds};
///
/// assert_invalid_thresholds!(BucketStats::new(&[3, 1]));
/// ```
#[macro_export]
macro_rules! assert_invalid_thresholds {
    ($result:expr) => {
        assert!(
            matches!($result, Err($crate::error::StatsError::InvalidThresholds { .. })),
            "expected StatsError::InvalidThresholds, got: {:?}",
            $result,
        );
    };
    ($result:expr, $msg:expr) => {
        assert!(
            matches!($result, Err($crate::error::StatsError::InvalidThresholds { .. })),
            "{}: expected StatsError::InvalidThresholds, got: {:?}",
            $msg,
            $result,
        );
    };
}

/// Assert that a [`StatsResult`] is a [`StatsError::InvalidWindow`].
#[macro_export]
macro_rules! assert_invalid_window {
    ($result:expr) => {
        assert!(
            matches!($result, Err($crate::error::StatsError::InvalidWindow { .. })),
            "expected StatsError::InvalidWindow, got: {:?}",
            $result,
        );
    };
}

/// Assert that a [`StatsResult`] is `Ok`.
///
/// Returns the inner value on success, panics with a descriptive message
/// on failure.
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use inferadb_common_stats::{BucketStats, assert_stats_ok};
///
/// let stats = assert_stats_ok!(BucketStats::new(&[0, 10]));
/// assert!(stats.add_value(5));
/// ```
#[macro_export]
macro_rules! assert_stats_ok {
    ($result:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("expected Ok, got StatsError: {e:?}"),
        }
    };
    ($result:expr, $msg:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("{}: expected Ok, got StatsError: {e:?}", $msg),
        }
    };
}

/// Whether a result is an [`StatsError::InvalidThresholds`] error.
pub fn is_invalid_thresholds<T>(result: &StatsResult<T>) -> bool {
    matches!(result, Err(StatsError::InvalidThresholds { .. }))
}

/// Whether a result is an [`StatsError::InvalidWindow`] error.
pub fn is_invalid_window<T>(result: &StatsResult<T>) -> bool {
    matches!(result, Err(StatsError::InvalidWindow { .. }))
}

/// Whether a result is a configuration error.
pub fn is_config_error<T>(result: &StatsResult<T>) -> bool {
    matches!(result, Err(StatsError::Config(_)))
}

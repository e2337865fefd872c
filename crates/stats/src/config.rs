//! Configuration for queue statistics.
//!
//! [`StatsConfig`] carries the switches that decide how much bookkeeping a
//! [`QueueStatisticsObserver`](crate::QueueStatisticsObserver) does, and the
//! histogram thresholds it uses. It can be built in code with a validating
//! builder or deserialized from a service configuration file.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use inferadb_common_stats::StatsConfig;
//!
//! let config = StatsConfig::builder()
//!     .track_wait_times(true)
//!     .rate_window(Duration::from_secs(2))
//!     .build()?;
//! assert!(config.track_wait_times());
//! # Ok::<(), inferadb_common_stats::StatsError>(())
//! ```
//!
//! From JSON, durations use humantime notation:
//!
//! ```
//! use inferadb_common_stats::StatsConfig;
//!
//! let config: StatsConfig = serde_json::from_str(r#"{ "local_stats": true, "rate_window": "10s" }"#)?;
//! config.validate()?;
//! assert_eq!(config.rate_window().as_secs(), 10);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    error::{ConfigError, StatsResult},
    histogram::Buckets,
};

/// Default window over which add/remove/drop rates are computed (5 seconds).
pub const DEFAULT_RATE_WINDOW: Duration = Duration::from_secs(5);

/// Default wait-time histogram thresholds, in milliseconds.
pub const DEFAULT_WAIT_TIME_THRESHOLDS_MS: [i64; 9] = [0, 2, 5, 20, 50, 200, 500, 1000, i64::MAX];

/// Default largest capacity for which queue-size thresholds are generated.
///
/// Larger queues share the thresholds of a queue of this capacity, plus a
/// final bucket above it.
pub const DEFAULT_MAX_BUCKETED_CAPACITY: usize = 16384;

/// Queue statistics configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct StatsConfig {
    /// Keep per-observer statistics in addition to the shared per-queue record.
    pub(crate) local_stats: bool,

    /// Track insertion times per item and record wait times at removal.
    ///
    /// Costs one map entry per in-flight item.
    pub(crate) track_wait_times: bool,

    /// Maintain add/remove/drop rate trackers.
    pub(crate) track_rates: bool,

    /// Window for the rate trackers.
    #[serde(with = "humantime_serde")]
    pub(crate) rate_window: Duration,

    /// Wait-time histogram thresholds in milliseconds.
    pub(crate) wait_time_thresholds_ms: Vec<i64>,

    /// Capacity cap for queue-size threshold generation.
    pub(crate) max_bucketed_capacity: usize,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            local_stats: false,
            track_wait_times: false,
            track_rates: true,
            rate_window: DEFAULT_RATE_WINDOW,
            wait_time_thresholds_ms: DEFAULT_WAIT_TIME_THRESHOLDS_MS.to_vec(),
            max_bucketed_capacity: DEFAULT_MAX_BUCKETED_CAPACITY,
        }
    }
}

#[bon::bon]
impl StatsConfig {
    /// Creates a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError`](crate::StatsError) if:
    /// - `rate_window` is shorter than one millisecond
    /// - `wait_time_thresholds_ms` has fewer than two entries or is not strictly ascending
    /// - `max_bucketed_capacity` is zero
    #[builder]
    pub fn new(
        #[builder(default)] local_stats: bool,
        #[builder(default)] track_wait_times: bool,
        #[builder(default = true)] track_rates: bool,
        #[builder(default = DEFAULT_RATE_WINDOW)] rate_window: Duration,
        #[builder(default = DEFAULT_WAIT_TIME_THRESHOLDS_MS.to_vec())] wait_time_thresholds_ms: Vec<
            i64,
        >,
        #[builder(default = DEFAULT_MAX_BUCKETED_CAPACITY)] max_bucketed_capacity: usize,
    ) -> StatsResult<Self> {
        let config = Self {
            local_stats,
            track_wait_times,
            track_rates,
            rate_window,
            wait_time_thresholds_ms,
            max_bucketed_capacity,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks every field, for configurations obtained through deserialization.
    ///
    /// # Errors
    ///
    /// Same conditions as [`StatsConfig::builder`].
    pub fn validate(&self) -> StatsResult<()> {
        if self.rate_window.is_zero() {
            return Err(ConfigError::MustBePositive { field: "rate_window", value: "0s".into() }.into());
        }
        if self.rate_window < Duration::from_millis(1) {
            return Err(ConfigError::BelowMinimum {
                field: "rate_window",
                min: "1ms".into(),
                value: format!("{:?}", self.rate_window),
            }
            .into());
        }
        if self.max_bucketed_capacity == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "max_bucketed_capacity",
                min: "1".into(),
                value: "0".into(),
            }
            .into());
        }
        Buckets::new(&self.wait_time_thresholds_ms)?;
        Ok(())
    }

    /// Whether per-observer statistics are kept.
    #[must_use]
    pub fn local_stats(&self) -> bool {
        self.local_stats
    }

    /// Whether wait times are tracked.
    #[must_use]
    pub fn track_wait_times(&self) -> bool {
        self.track_wait_times
    }

    /// Whether rate trackers are maintained.
    #[must_use]
    pub fn track_rates(&self) -> bool {
        self.track_rates
    }

    /// The rate tracker window.
    #[must_use]
    pub fn rate_window(&self) -> Duration {
        self.rate_window
    }

    /// The wait-time histogram thresholds, in milliseconds.
    #[must_use]
    pub fn wait_time_thresholds_ms(&self) -> &[i64] {
        &self.wait_time_thresholds_ms
    }

    /// The capacity cap for queue-size threshold generation.
    #[must_use]
    pub fn max_bucketed_capacity(&self) -> usize {
        self.max_bucketed_capacity
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::StatsError;

    #[test]
    fn test_defaults() {
        let config = StatsConfig::default();
        assert!(!config.local_stats());
        assert!(!config.track_wait_times());
        assert!(config.track_rates());
        assert_eq!(config.rate_window(), Duration::from_secs(5));
        assert_eq!(config.wait_time_thresholds_ms(), &DEFAULT_WAIT_TIME_THRESHOLDS_MS);
        assert_eq!(config.max_bucketed_capacity(), 16384);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_matches_default() {
        assert_eq!(StatsConfig::builder().build().unwrap(), StatsConfig::default());
    }

    #[test]
    fn test_builder_rejects_zero_rate_window() {
        let err = StatsConfig::builder().rate_window(Duration::ZERO).build().unwrap_err();
        assert!(matches!(err, StatsError::Config(ConfigError::MustBePositive { field: "rate_window", .. })));
    }

    #[test]
    fn test_builder_rejects_sub_millisecond_rate_window() {
        let err = StatsConfig::builder().rate_window(Duration::from_micros(500)).build().unwrap_err();
        assert!(matches!(err, StatsError::Config(ConfigError::BelowMinimum { field: "rate_window", .. })));
    }

    #[test]
    fn test_builder_rejects_bad_wait_thresholds() {
        let err = StatsConfig::builder().wait_time_thresholds_ms(vec![5, 2]).build().unwrap_err();
        assert!(matches!(err, StatsError::InvalidThresholds { .. }));
    }

    #[test]
    fn test_builder_rejects_zero_capacity_cap() {
        let err = StatsConfig::builder().max_bucketed_capacity(0).build().unwrap_err();
        assert!(matches!(
            err,
            StatsError::Config(ConfigError::BelowMinimum { field: "max_bucketed_capacity", .. })
        ));
    }

    #[test]
    fn test_deserialize_partial() {
        let config: StatsConfig =
            serde_json::from_str(r#"{ "track_wait_times": true, "rate_window": "250ms" }"#).unwrap();
        assert!(config.track_wait_times());
        assert_eq!(config.rate_window(), Duration::from_millis(250));
        assert_eq!(config.max_bucketed_capacity(), DEFAULT_MAX_BUCKETED_CAPACITY);
    }

    #[test]
    fn test_deserialize_rejects_unknown_fields() {
        let result = serde_json::from_str::<StatsConfig>(r#"{ "debug": true }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_serialize_round_trip() {
        let config = StatsConfig::builder().local_stats(true).build().unwrap();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains(r#""rate_window":"5s""#));
        assert_eq!(serde_json::from_str::<StatsConfig>(&json).unwrap(), config);
    }
}

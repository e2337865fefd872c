//! Statistics error types and result alias.
//!
//! Only construction can fail. Recording and querying never return errors:
//! out-of-range values are counted as discarded, too-late timestamps are
//! ignored, and missing correlation data yields an unknown wait time.
//!
//! # Error Types
//!
//! - [`StatsError::InvalidThresholds`] - Histogram thresholds are too few or unsorted
//! - [`StatsError::InvalidWindow`] - Rate window is not a whole number of buckets
//! - [`StatsError::Config`] - A [`StatsConfig`](crate::StatsConfig) field is out of range
//!
//! # Example
//!
//! ```
//! use inferadb_common_stats::{BucketStats, StatsError};
//!
//! let err = BucketStats::new(&[2, 10, 5]).unwrap_err();
//! assert!(matches!(err, StatsError::InvalidThresholds { .. }));
//! ```

use thiserror::Error;

/// Result type alias for fallible statistics constructors.
pub type StatsResult<T> = Result<T, StatsError>;

/// Errors raised while wiring statistics structures.
///
/// These indicate a programming or configuration mistake and are meant to
/// fail fast at startup rather than be handled at runtime.
///
/// # Non-exhaustive
///
/// New variants may be added in future minor releases. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StatsError {
    /// The histogram thresholds do not define at least one bucket.
    #[error("Invalid histogram thresholds {thresholds:?}: {reason}")]
    InvalidThresholds {
        /// The rejected thresholds.
        thresholds: Vec<i64>,
        /// Why they were rejected.
        reason: &'static str,
    },

    /// The bucket size does not divide the window size evenly.
    #[error(
        "The bucket size ({bucket_size_ms} ms) must divide the window size ({window_ms} ms) evenly"
    )]
    InvalidWindow {
        /// The requested window, in milliseconds.
        window_ms: u64,
        /// The requested bucket size, in milliseconds.
        bucket_size_ms: u64,
    },

    /// A configuration value failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl StatsError {
    /// Creates a new `InvalidThresholds` error.
    #[must_use]
    pub fn invalid_thresholds(thresholds: &[i64], reason: &'static str) -> Self {
        Self::InvalidThresholds { thresholds: thresholds.to_vec(), reason }
    }

    /// Creates a new `InvalidWindow` error.
    #[must_use]
    pub fn invalid_window(window_ms: u64, bucket_size_ms: u64) -> Self {
        Self::InvalidWindow { window_ms, bucket_size_ms }
    }
}

/// Validation errors for configuration values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// A numeric field is below its allowed minimum.
    #[error("{field} must be at least {min}, got {value}")]
    BelowMinimum {
        /// Name of the offending field.
        field: &'static str,
        /// The minimum accepted value.
        min: String,
        /// The rejected value.
        value: String,
    },

    /// A duration field must be strictly positive.
    #[error("{field} must be positive, got {value}")]
    MustBePositive {
        /// Name of the offending field.
        field: &'static str,
        /// The rejected value.
        value: String,
    },
}

//! Time sources for the statistics engine.
//!
//! Every windowed structure reads time through [`Clock`] so that tests can
//! drive it deterministically with a [`ManualClock`].

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// A source of the current instant.
///
/// `now()` returns the time elapsed since the clock's epoch. Only differences
/// between readings of the same clock are meaningful.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the current time since the clock's epoch.
    fn now(&self) -> Duration;

    /// Returns the current time in whole milliseconds since the clock's epoch.
    fn now_millis(&self) -> u64 {
        self.now().as_millis() as u64
    }
}

/// Wall clock time relative to the Unix epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        // A clock set before 1970 reads as the epoch itself.
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default()
    }
}

/// A virtual clock that only moves when told to.
///
/// Starts at zero. Share it behind an `Arc` between the structure under test
/// and the test body.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use inferadb_common_stats::{Clock, ManualClock};
///
/// let clock = ManualClock::new();
/// clock.elapse(Duration::from_millis(1500));
/// assert_eq!(clock.now_millis(), 1500);
/// ```
#[derive(Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    /// Creates a clock at time zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a clock at the given time.
    #[must_use]
    pub fn starting_at(time: Duration) -> Self {
        let clock = Self::new();
        clock.set_time(time);
        clock
    }

    /// Advances the clock by `by`, saturating at `u64::MAX` nanoseconds
    /// (about 584 years).
    pub fn elapse(&self, by: Duration) {
        let by = saturating_nanos(by);
        let _ = self.nanos.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |now| {
            Some(now.saturating_add(by))
        });
    }

    /// Moves the clock to `time`. Moving backwards is allowed. Times past
    /// `u64::MAX` nanoseconds saturate.
    pub fn set_time(&self, time: Duration) {
        self.nanos.store(saturating_nanos(time), Ordering::Relaxed);
    }
}

fn saturating_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::Relaxed))
    }
}

impl fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualClock").field("now", &self.now()).finish()
    }
}

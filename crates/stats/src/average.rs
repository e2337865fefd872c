//! Simple moving average over a trailing time window.

use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;

use crate::{
    clock::Clock,
    window::{OnEvict, TimeBasedSlidingWindow},
};

/// Running sum and count of the values held in the window.
///
/// Only eviction removes a value from the window, and eviction always goes
/// through [`OnEvict::on_evict`], so the totals cannot drift from the window
/// contents.
#[derive(Debug, Default)]
struct RunningTotal {
    sum: f64,
    count: u64,
}

impl RunningTotal {
    fn record(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }
}

impl OnEvict<f64> for RunningTotal {
    fn on_evict(&mut self, value: f64) {
        self.count -= 1;
        if self.count == 0 {
            // Reset instead of subtracting to shed accumulated rounding error.
            self.sum = 0.0;
        } else {
            self.sum -= value;
        }
    }
}

/// The average of the values added within the trailing window.
///
/// `add`, eviction and `get` are serialized by one mutex per instance.
///
/// # Example
///
/// ```
/// use std::{sync::Arc, time::Duration};
/// use inferadb_common_stats::{ManualClock, MovingAverage};
///
/// let clock = Arc::new(ManualClock::new());
/// let average = MovingAverage::new(Duration::from_secs(5), clock.clone());
///
/// average.add(2);
/// average.add(4);
/// assert_eq!(average.get(), 3.0);
///
/// clock.elapse(Duration::from_secs(10));
/// assert_eq!(average.get(), 0.0);
/// ```
#[derive(Debug)]
pub struct MovingAverage {
    window: Mutex<TimeBasedSlidingWindow<f64, RunningTotal>>,
}

impl MovingAverage {
    /// Creates an empty average over `window_size`.
    #[must_use]
    pub fn new(window_size: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            window: Mutex::new(TimeBasedSlidingWindow::new(window_size, clock, RunningTotal::default())),
        }
    }

    /// Adds `value` at the current time.
    pub fn add(&self, value: impl Into<f64>) {
        let value = value.into();
        let mut window = self.window.lock();
        window.handler_mut().record(value);
        window.add(value);
    }

    /// Returns the average of the values still inside the window, or `0.0`
    /// when there are none.
    #[must_use]
    pub fn get(&self) -> f64 {
        let mut window = self.window.lock();
        window.force_eviction();
        let total = window.handler();
        if total.count == 0 { 0.0 } else { total.sum / total.count as f64 }
    }

    /// Number of values inside the window.
    #[must_use]
    pub fn len(&self) -> usize {
        let mut window = self.window.lock();
        window.force_eviction();
        window.len()
    }

    /// Whether the window holds no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

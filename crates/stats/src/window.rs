//! Insertion-ordered queues that evict entries once they age out.
//!
//! [`EvictingQueue`] is the generic building block: it wraps each value in an
//! entry type via an injected constructor, and trims entries from the oldest
//! end while an injected predicate says they are evictable.
//! [`TimeBasedSlidingWindow`] instantiates it with [`TimeEntry`] and an
//! "older than the window" predicate, and reports every eviction to an
//! [`OnEvict`] handler exactly once, oldest first.
//!
//! Neither type synchronizes internally; callers that share a window wrap it
//! in a lock, as [`MovingAverage`](crate::MovingAverage) does.

use std::{collections::VecDeque, fmt, sync::Arc, time::Duration};

use crate::clock::Clock;

/// Receives values evicted from a window.
///
/// Implemented for any `FnMut(T)` closure.
pub trait OnEvict<T> {
    /// Called once per evicted value, oldest first.
    fn on_evict(&mut self, value: T);
}

impl<T, F: FnMut(T)> OnEvict<T> for F {
    fn on_evict(&mut self, value: T) {
        self(value);
    }
}

/// Access to the raw value inside a queue entry.
pub trait Entry<T> {
    /// Borrows the wrapped value.
    fn value(&self) -> &T;

    /// Unwraps the value.
    fn into_value(self) -> T;
}

type EntryFn<T, E> = Box<dyn Fn(T) -> E + Send + Sync>;
type PredicateFn<E> = Box<dyn Fn(&E) -> bool + Send + Sync>;

// ── EvictingQueue ───────────────────────────────────────────────────────

/// A queue that evicts its oldest entries while `is_evictable` holds.
///
/// Values are wrapped by `make_entry` on insertion so entries can carry
/// bookkeeping such as an insertion time. Because the queue is trimmed only
/// from the oldest end, the predicate must be monotonic: once an entry is
/// evictable, every older entry must be too.
pub struct EvictingQueue<T, E> {
    entries: VecDeque<E>,
    make_entry: EntryFn<T, E>,
    is_evictable: PredicateFn<E>,
}

impl<T, E: Entry<T>> EvictingQueue<T, E> {
    /// Creates an empty queue with the given entry constructor and eviction predicate.
    pub fn new(
        make_entry: impl Fn(T) -> E + Send + Sync + 'static,
        is_evictable: impl Fn(&E) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            entries: VecDeque::new(),
            make_entry: Box::new(make_entry),
            is_evictable: Box::new(is_evictable),
        }
    }

    /// Appends `value` as the newest entry, then evicts.
    pub fn push(&mut self, value: T, on_evict: &mut impl OnEvict<T>) {
        self.entries.push_back((self.make_entry)(value));
        self.evict(on_evict);
    }

    /// Removes evictable entries from the oldest end, reporting each one.
    pub fn evict(&mut self, on_evict: &mut impl OnEvict<T>) {
        while self.entries.front().is_some_and(|oldest| (self.is_evictable)(oldest)) {
            if let Some(entry) = self.entries.pop_front() {
                on_evict.on_evict(entry.into_value());
            }
        }
    }

    /// Iterates over entries from oldest to newest.
    pub fn entries(&self) -> impl Iterator<Item = &E> {
        self.entries.iter()
    }

    /// Number of entries currently held, including any not yet evicted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entry without reporting evictions.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<T, E: fmt::Debug> fmt::Debug for EvictingQueue<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvictingQueue").field("entries", &self.entries).finish_non_exhaustive()
    }
}

// ── TimeBasedSlidingWindow ──────────────────────────────────────────────

/// A value paired with the clock reading at which it was added.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeEntry<T> {
    /// The stored value.
    pub value: T,
    /// Clock reading at insertion.
    pub inserted_at: Duration,
}

impl<T> Entry<T> for TimeEntry<T> {
    fn value(&self) -> &T {
        &self.value
    }

    fn into_value(self) -> T {
        self.value
    }
}

/// Holds the values added within the trailing `window_size`.
///
/// Eviction runs after every [`add`](Self::add). Values can also age out
/// while nothing is added, so readers must call
/// [`force_eviction`](Self::force_eviction) before trusting
/// [`values`](Self::values).
///
/// # Example
///
/// ```
/// use std::{sync::Arc, time::Duration};
/// use inferadb_common_stats::{ManualClock, TimeBasedSlidingWindow};
///
/// let clock = Arc::new(ManualClock::new());
/// let mut evicted = Vec::new();
/// let mut window = TimeBasedSlidingWindow::new(Duration::from_secs(5), clock.clone(), |v| evicted.push(v));
///
/// window.add(1);
/// clock.elapse(Duration::from_secs(6));
/// window.add(2);
///
/// assert_eq!(window.values().copied().collect::<Vec<_>>(), vec![2]);
/// drop(window);
/// assert_eq!(evicted, vec![1]);
/// ```
pub struct TimeBasedSlidingWindow<T, H> {
    queue: EvictingQueue<T, TimeEntry<T>>,
    on_evict: H,
    window_size: Duration,
}

impl<T: 'static, H: OnEvict<T>> TimeBasedSlidingWindow<T, H> {
    /// Creates an empty window reading time from `clock`.
    pub fn new(window_size: Duration, clock: Arc<dyn Clock>, on_evict: H) -> Self {
        let insert_clock = Arc::clone(&clock);
        let queue = EvictingQueue::new(
            move |value| TimeEntry { value, inserted_at: insert_clock.now() },
            move |entry: &TimeEntry<T>| {
                clock.now().saturating_sub(entry.inserted_at) > window_size
            },
        );
        Self { queue, on_evict, window_size }
    }

    /// The configured window length.
    #[must_use]
    pub fn window_size(&self) -> Duration {
        self.window_size
    }

    /// Adds `value` at the current time, then evicts stale values.
    pub fn add(&mut self, value: T) {
        self.queue.push(value, &mut self.on_evict);
    }

    /// Evicts every value older than the window.
    pub fn force_eviction(&mut self) {
        self.queue.evict(&mut self.on_evict);
    }

    /// Iterates over held values in insertion order (oldest first).
    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.queue.entries().map(Entry::value)
    }

    /// Iterates over held entries with their insertion times.
    pub fn entries(&self) -> impl Iterator<Item = &TimeEntry<T>> {
        self.queue.entries()
    }

    /// Number of values held, including any not yet evicted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether the window holds no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Drops every value without invoking the eviction handler.
    pub fn clear(&mut self) {
        self.queue.clear();
    }

    /// Borrows the eviction handler.
    pub fn handler(&self) -> &H {
        &self.on_evict
    }

    /// Mutably borrows the eviction handler.
    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.on_evict
    }
}

impl<T: fmt::Debug, H> fmt::Debug for TimeBasedSlidingWindow<T, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeBasedSlidingWindow")
            .field("window_size", &self.window_size)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

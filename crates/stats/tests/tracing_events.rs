//! Integration test verifying that registry lookups, late rate updates and
//! `log_stats` emit the expected tracing events.

#![allow(clippy::expect_used)]

use std::{
    fmt,
    sync::{Arc, Mutex},
    time::Duration,
};

use inferadb_common_stats::{
    ItemKey, ManualClock, QueueObserver, QueueStatisticsObserver, RateTracker, StatsConfig,
    testutil::manual_registry,
};
use tracing::{
    Event, Level, Subscriber,
    field::{Field, Visit},
};
use tracing_subscriber::{layer::SubscriberExt, registry::LookupSpan};

// ---------------------------------------------------------------------------
// Collecting layer: records every event with its fields
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Recorded {
    level: Level,
    message: String,
    fields: Vec<(String, String)>,
}

impl Recorded {
    fn field(&self, name: &str) -> Option<&str> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str())
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields.push((field.name().to_owned(), format!("{value:?}")));
        }
    }
}

#[derive(Clone, Default)]
struct EventCollector {
    events: Arc<Mutex<Vec<Recorded>>>,
}

impl<S> tracing_subscriber::Layer<S> for EventCollector
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        self.events.lock().expect("lock poisoned").push(Recorded {
            level: *event.metadata().level(),
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}

/// Runs `body` with a collecting subscriber and returns the recorded events.
fn capture(body: impl FnOnce()) -> Vec<Recorded> {
    let collector = EventCollector::default();
    let events = Arc::clone(&collector.events);

    let subscriber = tracing_subscriber::registry().with(collector);
    tracing::subscriber::with_default(subscriber, body);

    let recorded = events.lock().expect("lock poisoned");
    recorded.clone()
}

fn with_message<'a>(events: &'a [Recorded], message: &str) -> Vec<&'a Recorded> {
    events.iter().filter(|e| e.message == message).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn registry_creation_emits_debug_event() {
    let (_clock, registry) = manual_registry(StatsConfig::default());

    let events = capture(|| {
        registry.stats_for("video-out", 512).expect("stats_for should succeed");
    });

    let created = with_message(&events, "Created shared queue statistics");
    assert_eq!(created.len(), 1, "events: {events:?}");
    assert_eq!(created[0].level, Level::DEBUG);
    assert_eq!(created[0].field("queue_id"), Some("\"video-out\""));
    assert_eq!(created[0].field("capacity"), Some("512"));
}

#[test]
fn repeated_lookup_emits_nothing() {
    let (_clock, registry) = manual_registry(StatsConfig::default());
    registry.stats_for("video-out", 512).expect("stats_for should succeed");

    let events = capture(|| {
        registry.stats_for("video-out", 512).expect("stats_for should succeed");
    });

    assert!(with_message(&events, "Created shared queue statistics").is_empty());
}

#[test]
fn late_rate_update_emits_trace_event() {
    let clock = Arc::new(ManualClock::new());
    let tracker = RateTracker::with_window(Duration::from_secs(1), Duration::from_millis(1), clock)
        .expect("valid window");
    tracker.update_at(1, 5000);

    let events = capture(|| tracker.update_at(1, 10));

    let ignored = with_message(&events, "Ignoring update older than the rate window");
    assert_eq!(ignored.len(), 1, "events: {events:?}");
    assert_eq!(ignored[0].level, Level::TRACE);
    assert_eq!(ignored[0].field("now_ms"), Some("10"));
    assert_eq!(tracker.accumulated_count_at(5000), 1);
}

#[test]
fn log_stats_emits_info_snapshot() {
    let (clock, registry) = manual_registry(StatsConfig::default());
    let observer = QueueStatisticsObserver::new(&registry, "audio", 64).expect("observer");
    for id in 0..10 {
        observer.added(ItemKey::new(id));
        clock.elapse(Duration::from_millis(10));
        observer.removed(ItemKey::new(id));
    }

    let events = capture(|| observer.global_stats().log_stats("audio"));

    let snapshots = with_message(&events, "Queue statistics snapshot");
    assert_eq!(snapshots.len(), 1, "events: {events:?}");
    let info = snapshots[0];
    assert_eq!(info.level, Level::INFO);
    assert_eq!(info.field("queue_id"), Some("\"audio\""));
    assert_eq!(info.field("added"), Some("10"));
    assert_eq!(info.field("removed"), Some("10"));
    assert_eq!(info.field("dropped"), Some("0"));
    assert_eq!(info.field("add_rate"), Some("2"));
    assert!(with_message(&events, "High queue drop ratio detected").is_empty());
}

#[test]
fn high_drop_ratio_emits_warning() {
    let (_clock, registry) = manual_registry(StatsConfig::default());
    let observer = QueueStatisticsObserver::new(&registry, "data", 8).expect("observer");
    for id in 0..10 {
        observer.added(ItemKey::new(id));
    }
    observer.dropped(ItemKey::new(0));

    let events = capture(|| registry.log_stats());

    let warnings = with_message(&events, "High queue drop ratio detected");
    assert_eq!(warnings.len(), 1, "events: {events:?}");
    assert_eq!(warnings[0].level, Level::WARN);
    assert_eq!(warnings[0].field("drop_ratio"), Some("0.1"));
}

#[test]
fn idle_queue_logs_nothing() {
    let (_clock, registry) = manual_registry(StatsConfig::default());
    registry.stats_for("idle", 8).expect("stats_for should succeed");

    let events = capture(|| registry.log_stats());

    assert!(with_message(&events, "Queue statistics snapshot").is_empty(), "events: {events:?}");
}

#[test]
fn registry_log_stats_covers_every_active_queue() {
    let (_clock, registry) = manual_registry(StatsConfig::default());
    for queue_id in ["a", "b", "c"] {
        let observer = QueueStatisticsObserver::new(&registry, queue_id, 8).expect("observer");
        observer.added(ItemKey::new(1));
    }

    let events = capture(|| registry.log_stats());

    let ids: Vec<_> = with_message(&events, "Queue statistics snapshot")
        .iter()
        .filter_map(|e| e.field("queue_id").map(str::to_owned))
        .collect();
    assert_eq!(ids, ["\"a\"", "\"b\"", "\"c\""]);
}

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::Duration;

use super::{retention_cutoff, Event, EventStore};
use crate::error::ThrottlerResult;
use crate::outcome::Outcome;

#[derive(Debug, Clone)]
struct StoredEvent {
    timestamp_ms: i64,
    outcome: Outcome,
    action: Option<String>,
}

/// In-process event store backed by a sharded concurrent map.
///
/// Each key owns its own event list; writers on different keys never contend
/// and a sum only holds the shard of the key being read.
///
/// With a retention set, each append drops the key's events older than the
/// retention measured back from the appended event.
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    events: DashMap<String, Vec<StoredEvent>>,
    retention: Option<Duration>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self {
            events: DashMap::new(),
            retention: None,
        }
    }

    pub fn with_retention(retention: Duration) -> Self {
        Self {
            events: DashMap::new(),
            retention: Some(retention),
        }
    }

    /// Drop every event older than `cutoff_ms` across all keys, removing keys
    /// left empty. Returns the number of events dropped.
    pub fn purge_before(&self, cutoff_ms: i64) -> usize {
        let mut purged = 0;
        self.events.retain(|_, events| {
            let before = events.len();
            events.retain(|stored| stored.timestamp_ms >= cutoff_ms);
            purged += before - events.len();
            !events.is_empty()
        });
        purged
    }

    /// Number of events recorded for `key`
    pub fn event_count(&self, key: &str) -> usize {
        self.events.get(key).map(|events| events.len()).unwrap_or(0)
    }

    /// Total number of events across all keys
    pub fn total_events(&self) -> usize {
        self.events.iter().map(|entry| entry.value().len()).sum()
    }

    /// Snapshot of the events recorded for `key`, in insertion order
    pub fn events_for(&self, key: &str) -> Vec<Event> {
        self.events
            .get(key)
            .map(|events| {
                events
                    .iter()
                    .map(|stored| {
                        Event::new(key, stored.timestamp_ms, stored.outcome)
                            .with_action(stored.action.clone())
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn append(&self, event: &Event) -> ThrottlerResult<()> {
        let mut events = self.events.entry(event.key.clone()).or_default();
        if let Some(retention) = self.retention {
            let cutoff = retention_cutoff(event.timestamp_ms, retention);
            events.retain(|stored| stored.timestamp_ms >= cutoff);
        }
        events.push(StoredEvent {
            timestamp_ms: event.timestamp_ms,
            outcome: event.outcome,
            action: event.action.clone(),
        });
        Ok(())
    }

    async fn sum_weighted_points(&self, key: &str, since_ms: i64) -> ThrottlerResult<u64> {
        let points = self
            .events
            .get(key)
            .map(|events| {
                events
                    .iter()
                    .filter(|stored| stored.timestamp_ms >= since_ms)
                    .map(|stored| stored.outcome.weight())
                    .sum()
            })
            .unwrap_or(0);
        Ok(points)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

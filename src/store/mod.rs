//! Append-only event log of request outcomes.
//!
//! Stores hold raw outcomes, never weights, so history can be re-scored if the
//! weight table changes. Timestamps are supplied by the caller; no store reads
//! the clock. Implementations are responsible for their own internal
//! consistency and must accept concurrent appends and sums without any lock
//! held by the caller.

mod memory;
mod redis_store;

pub use memory::MemoryEventStore;
pub use redis_store::{RedisEventStore, RedisStoreConfig};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::time::Duration;

use crate::error::ThrottlerResult;
use crate::outcome::Outcome;

/// A single recorded request outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub key: String,
    pub timestamp_ms: i64,
    pub outcome: Outcome,
    /// Last path segment of the request, informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

impl Event {
    pub fn new(key: impl Into<String>, timestamp_ms: i64, outcome: Outcome) -> Self {
        Self {
            key: key.into(),
            timestamp_ms,
            outcome,
            action: None,
        }
    }

    pub fn with_action(mut self, action: Option<String>) -> Self {
        self.action = action;
        self
    }
}

/// Oldest timestamp still retained when an event at `timestamp_ms` is
/// appended. Events strictly older than this may be discarded.
pub(crate) fn retention_cutoff(timestamp_ms: i64, retention: Duration) -> i64 {
    let retention_ms = i64::try_from(retention.as_millis()).unwrap_or(i64::MAX);
    timestamp_ms.saturating_sub(retention_ms)
}

#[async_trait]
pub trait EventStore: Send + Sync + Debug {
    /// Persist one event. Failures are surfaced, never retried here.
    async fn append(&self, event: &Event) -> ThrottlerResult<()>;

    /// Sum of outcome weights for events with exactly `key` and
    /// `timestamp_ms >= since_ms`. Zero when nothing matches.
    async fn sum_weighted_points(&self, key: &str, since_ms: i64) -> ThrottlerResult<u64>;

    /// Backend liveness check
    async fn ping(&self) -> ThrottlerResult<()> {
        Ok(())
    }

    fn backend(&self) -> &'static str;
}

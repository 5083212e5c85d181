use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::outcome::Outcome;

/// Point-in-time copy of the gate counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateMetricsSnapshot {
    pub evaluated: u64,
    pub admitted: u64,
    pub denied: u64,
    pub unthrottleable: u64,
    pub store_failures: u64,
    pub failed_open: u64,
    pub outcomes: OutcomeCounts,
    pub started_at: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeCounts {
    pub success: u64,
    pub client_error: u64,
    pub server_error: u64,
    pub unhandled_failure: u64,
}

#[derive(Debug)]
pub struct GateMetrics {
    evaluated: AtomicU64,
    admitted: AtomicU64,
    denied: AtomicU64,
    unthrottleable: AtomicU64,
    store_failures: AtomicU64,
    failed_open: AtomicU64,
    outcomes: [AtomicU64; 4],
    started_at: u64,
}

impl Default for GateMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl GateMetrics {
    pub fn new() -> Self {
        Self {
            evaluated: AtomicU64::new(0),
            admitted: AtomicU64::new(0),
            denied: AtomicU64::new(0),
            unthrottleable: AtomicU64::new(0),
            store_failures: AtomicU64::new(0),
            failed_open: AtomicU64::new(0),
            outcomes: Default::default(),
            started_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        }
    }

    pub fn record_decision(&self, allowed: bool) {
        self.evaluated.fetch_add(1, Ordering::Relaxed);
        if allowed {
            self.admitted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.denied.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_unthrottleable(&self) {
        self.unthrottleable.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_failure(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed_open(&self) {
        self.failed_open.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outcome(&self, outcome: Outcome) {
        self.outcomes[outcome_index(outcome)].fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> GateMetricsSnapshot {
        let outcome = |o: Outcome| self.outcomes[outcome_index(o)].load(Ordering::Relaxed);

        GateMetricsSnapshot {
            evaluated: self.evaluated.load(Ordering::Relaxed),
            admitted: self.admitted.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            unthrottleable: self.unthrottleable.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            failed_open: self.failed_open.load(Ordering::Relaxed),
            outcomes: OutcomeCounts {
                success: outcome(Outcome::Success),
                client_error: outcome(Outcome::ClientError),
                server_error: outcome(Outcome::ServerError),
                unhandled_failure: outcome(Outcome::UnhandledFailure),
            },
            started_at: self.started_at,
        }
    }
}

fn outcome_index(outcome: Outcome) -> usize {
    match outcome {
        Outcome::Success => 0,
        Outcome::ClientError => 1,
        Outcome::ServerError => 2,
        Outcome::UnhandledFailure => 3,
    }
}

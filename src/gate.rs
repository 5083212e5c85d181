//! Admission gate: the pre-check / post-check lifecycle around one request.
//!
//! A request is resolved to a throttle key, checked against the tiers, and
//! either denied outright (no handler call, no event) or handed to the
//! downstream handler. Whatever the handler does afterwards, including
//! panicking or being cancelled, exactly one event is recorded for the key.

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::error::{ThrottlerError, ThrottlerResult};
use crate::evaluator::{TierEvaluator, TierUsage};
use crate::key::RequestContext;
use crate::metrics::GateMetrics;
use crate::outcome::{Classify, Outcome};
use crate::store::{Event, EventStore};
use crate::tier::TierSet;

/// Machine-readable reason attached to a denial.
pub const REASON_TOO_MANY_REQUESTS: &str = "throttle.tooManyRequests";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub allowed: bool,
    pub reason_code: Option<&'static str>,
}

impl Decision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason_code: None,
        }
    }

    pub fn deny() -> Self {
        Self {
            allowed: false,
            reason_code: Some(REASON_TOO_MANY_REQUESTS),
        }
    }
}

/// What the pre-check does when the event store cannot be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Admit the request.
    Open,
    /// Surface the storage failure; the request is not admitted.
    #[default]
    Closed,
}

/// Result of running a handler through the gate.
#[derive(Debug)]
pub enum Admission<T> {
    Denied(Decision),
    Completed(T),
}

impl<T> Admission<T> {
    pub fn is_denied(&self) -> bool {
        matches!(self, Admission::Denied(_))
    }

    pub fn into_completed(self) -> Option<T> {
        match self {
            Admission::Completed(output) => Some(output),
            Admission::Denied(_) => None,
        }
    }
}

#[derive(Debug)]
pub struct AdmissionGate {
    store: Arc<dyn EventStore>,
    evaluator: TierEvaluator,
    clock: Arc<dyn Clock>,
    tiers: TierSet,
    failure_policy: FailurePolicy,
    metrics: Arc<GateMetrics>,
}

impl AdmissionGate {
    pub fn new(store: Arc<dyn EventStore>, clock: Arc<dyn Clock>, tiers: TierSet) -> Self {
        Self {
            evaluator: TierEvaluator::new(store.clone()),
            store,
            clock,
            tiers,
            failure_policy: FailurePolicy::default(),
            metrics: Arc::new(GateMetrics::new()),
        }
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn tiers(&self) -> &TierSet {
        &self.tiers
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    pub fn metrics(&self) -> &GateMetrics {
        &self.metrics
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    /// Build a request context, capturing the request timestamp now.
    pub fn context(
        &self,
        identity: Option<&str>,
        address: Option<&str>,
        action: Option<&str>,
    ) -> RequestContext {
        RequestContext::new(identity, address, action, self.clock.now_ms())
    }

    /// Pre-check against the gate's default tiers.
    pub async fn evaluate(&self, ctx: &RequestContext) -> ThrottlerResult<Decision> {
        self.evaluate_with(ctx, &self.tiers).await
    }

    /// Pre-check against an explicit tier set.
    pub async fn evaluate_with(&self, ctx: &RequestContext, tiers: &TierSet) -> ThrottlerResult<Decision> {
        let Some(key) = ctx.key() else {
            self.metrics.record_unthrottleable();
            return Ok(Decision::allow());
        };
        let storage_key = key.storage_key();

        match self
            .evaluator
            .is_violated(&storage_key, tiers, ctx.requested_at_ms())
            .await
        {
            Ok(true) => {
                info!(key = %storage_key, action = ?ctx.action(), "Request throttled");
                self.metrics.record_decision(false);
                Ok(Decision::deny())
            }
            Ok(false) => {
                self.metrics.record_decision(true);
                Ok(Decision::allow())
            }
            Err(err) => {
                self.metrics.record_store_failure();
                match self.failure_policy {
                    FailurePolicy::Open => {
                        warn!(key = %storage_key, error = %err, "Throttle check failed, admitting request");
                        self.metrics.record_failed_open();
                        self.metrics.record_decision(true);
                        Ok(Decision::allow())
                    }
                    FailurePolicy::Closed => {
                        error!(key = %storage_key, error = %err, "Throttle check failed, rejecting request");
                        Err(err)
                    }
                }
            }
        }
    }

    /// Post-check: append exactly one event for the context's key at the
    /// captured request timestamp. Unthrottleable contexts record nothing.
    pub async fn record_outcome(&self, ctx: &RequestContext, outcome: Outcome) -> ThrottlerResult<()> {
        match self.recorder(ctx) {
            Some(recorder) => recorder.record(outcome).await,
            None => Ok(()),
        }
    }

    /// Current usage of every tier for the context's key.
    pub async fn usage(&self, ctx: &RequestContext, tiers: &TierSet) -> ThrottlerResult<Vec<TierUsage>> {
        match ctx.key() {
            Some(key) => {
                self.evaluator
                    .usage(&key.storage_key(), tiers, ctx.requested_at_ms())
                    .await
            }
            None => Ok(Vec::new()),
        }
    }

    /// Run `handler` under the full lifecycle.
    ///
    /// The handler is invoked at most once and only when admitted. A panic is
    /// recorded as [`Outcome::UnhandledFailure`] and then resumed. If the
    /// returned future is dropped while the handler is still running, the
    /// unhandled failure is recorded in the background.
    pub async fn run<F, Fut, T>(
        &self,
        ctx: &RequestContext,
        tiers: &TierSet,
        handler: F,
    ) -> ThrottlerResult<Admission<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
        T: Classify,
    {
        let decision = self.evaluate_with(ctx, tiers).await?;
        if !decision.allowed {
            return Ok(Admission::Denied(decision));
        }

        let mut guard = CancellationGuard {
            recorder: self.recorder(ctx),
        };
        let result = AssertUnwindSafe(handler()).catch_unwind().await;
        let recorder = guard.recorder.take();

        match result {
            Ok(output) => {
                if let Some(recorder) = recorder {
                    recorder.record_detached(output.outcome()).await?;
                }
                Ok(Admission::Completed(output))
            }
            Err(panic) => {
                if let Some(recorder) = recorder {
                    if let Err(err) = recorder.record_detached(Outcome::UnhandledFailure).await {
                        error!(error = %err, "Failed to record outcome of panicked handler");
                    }
                }
                std::panic::resume_unwind(panic)
            }
        }
    }

    fn recorder(&self, ctx: &RequestContext) -> Option<Recorder> {
        ctx.key().map(|key| Recorder {
            store: self.store.clone(),
            metrics: self.metrics.clone(),
            key: key.storage_key(),
            timestamp_ms: ctx.requested_at_ms(),
            action: ctx.action().map(str::to_string),
        })
    }
}

/// Owned handle able to write one event for a request.
struct Recorder {
    store: Arc<dyn EventStore>,
    metrics: Arc<GateMetrics>,
    key: String,
    timestamp_ms: i64,
    action: Option<String>,
}

impl Recorder {
    async fn record(self, outcome: Outcome) -> ThrottlerResult<()> {
        let event = Event::new(self.key, self.timestamp_ms, outcome).with_action(self.action);

        match self.store.append(&event).await {
            Ok(()) => {
                debug!(key = %event.key, outcome = %outcome, "Outcome recorded");
                self.metrics.record_outcome(outcome);
                Ok(())
            }
            Err(err) => {
                error!(key = %event.key, outcome = %outcome, error = %err, "Failed to record outcome");
                self.metrics.record_store_failure();
                Err(err)
            }
        }
    }

    /// Write on a spawned task so that dropping the caller cannot abandon a
    /// write that has already started.
    async fn record_detached(self, outcome: Outcome) -> ThrottlerResult<()> {
        tokio::spawn(self.record(outcome))
            .await
            .map_err(|e| ThrottlerError::Internal(format!("Outcome recording task failed: {}", e)))?
    }
}

/// Records an unhandled failure if dropped while the handler is in flight.
struct CancellationGuard {
    recorder: Option<Recorder>,
}

impl Drop for CancellationGuard {
    fn drop(&mut self) {
        let Some(recorder) = self.recorder.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(key = %recorder.key, "Handler cancelled, recording unhandled failure");
                handle.spawn(async move {
                    let _ = recorder.record(Outcome::UnhandledFailure).await;
                });
            }
            Err(_) => {
                error!(key = %recorder.key, "Handler cancelled outside a runtime, outcome lost");
            }
        }
    }
}

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::config::Settings;
use crate::error::{ThrottlerError, ThrottlerResult};
use crate::gate::AdmissionGate;
use crate::health::HealthChecker;
use crate::key::{AddressResolver, IdentityResolver, RequestContext};
use crate::outcome::Outcome;
use crate::response::{
    EvaluateRequest, EvaluateResponse, OutcomeRequest, UsageQuery, UsageResponse,
};
use crate::routes::RouteTable;
use crate::store::EventStore;
use crate::tier::TierSet;

/// Shared application state
pub type SharedState = Arc<AppState>;

/// Admission gate plus the request-level wiring around it
pub struct AppState {
    pub gate: AdmissionGate,
    pub routes: RouteTable,
    pub identities: IdentityResolver,
    pub addresses: AddressResolver,
    pub handler_timeout: Option<Duration>,
    pub health: HealthChecker,
}

impl AppState {
    pub fn from_settings(
        settings: &Settings,
        store: Arc<dyn EventStore>,
        clock: Arc<dyn Clock>,
    ) -> ThrottlerResult<Self> {
        settings.check()?;

        let gate = AdmissionGate::new(store.clone(), clock, settings.tiers.clone())
            .with_failure_policy(settings.failure_policy);

        Ok(Self {
            gate,
            routes: settings.route_table()?,
            identities: IdentityResolver::new(settings.identity_header.clone()),
            addresses: AddressResolver::new(settings.trust_forwarded_headers),
            handler_timeout: settings.handler_timeout,
            health: HealthChecker::new(store),
        })
    }

    fn tiers_for(&self, route: Option<&str>) -> &TierSet {
        match route {
            Some(route) => self.routes.select(route),
            None => self.routes.default_tiers(),
        }
    }
}

/// Pre-check a request on behalf of a collaborator
pub async fn evaluate(
    State(state): State<SharedState>,
    Json(payload): Json<EvaluateRequest>,
) -> Result<impl IntoResponse, ThrottlerError> {
    let ctx = state.gate.context(
        payload.identity.as_deref(),
        payload.address.as_deref(),
        payload.action.as_deref(),
    );
    let tiers = state.tiers_for(payload.route.as_deref());

    let decision = state.gate.evaluate_with(&ctx, tiers).await?;

    Ok(Json(EvaluateResponse {
        decision,
        requested_at: ctx.requested_at_ms(),
    }))
}

/// Record the outcome of an admitted request
pub async fn record_outcome(
    State(state): State<SharedState>,
    Json(payload): Json<OutcomeRequest>,
) -> Result<impl IntoResponse, ThrottlerError> {
    let outcome = match (payload.outcome, payload.status) {
        (Some(outcome), None) => outcome,
        (None, Some(status)) => {
            if !(100..=599).contains(&status) {
                return Err(ThrottlerError::Validation(format!(
                    "Status {} is not a valid HTTP status",
                    status
                )));
            }
            Outcome::from_status(status)
        }
        (Some(_), Some(_)) => {
            return Err(ThrottlerError::Validation(
                "Specify either 'outcome' or 'status', not both".to_string(),
            ))
        }
        (None, None) => {
            return Err(ThrottlerError::Validation(
                "Missing 'outcome' or 'status'".to_string(),
            ))
        }
    };

    let identity = payload.identity.as_deref();
    let address = payload.address.as_deref();
    let action = payload.action.as_deref();
    let ctx = match payload.requested_at {
        Some(requested_at) => RequestContext::new(identity, address, action, requested_at),
        None => state.gate.context(identity, address, action),
    };

    state.gate.record_outcome(&ctx, outcome).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Points accumulated against every tier for a key
pub async fn usage(
    State(state): State<SharedState>,
    Query(query): Query<UsageQuery>,
) -> Result<impl IntoResponse, ThrottlerError> {
    let ctx = state
        .gate
        .context(query.identity.as_deref(), query.address.as_deref(), None);
    let tiers = state.tiers_for(query.route.as_deref());

    let usage = state.gate.usage(&ctx, tiers).await?;

    Ok(Json(UsageResponse {
        key: ctx.key().cloned(),
        tiers: usage,
    }))
}

/// Health check endpoint
pub async fn health_check(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.health.check_health().await)
}

/// Readiness check endpoint
pub async fn readiness_check(State(state): State<SharedState>) -> impl IntoResponse {
    let backend = state.gate.store().backend();

    if state.health.is_ready().await {
        (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "store": backend
            })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "store": backend,
                "failurePolicy": state.gate.failure_policy()
            })),
        )
    }
}

/// Gate counters
pub async fn metrics(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.gate.metrics().snapshot())
}

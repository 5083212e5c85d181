use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::time::Instant;
use tracing::info;

use crate::error::ErrorResponse;
use crate::gate::{Admission, Decision, REASON_TOO_MANY_REQUESTS};
use crate::handlers::SharedState;
use crate::key::action_from_path;

/// Wraps downstream handlers with the admission gate.
///
/// Denied requests get a `429` and never reach the handler. Admitted requests
/// record exactly one outcome after the handler finishes. A storage failure
/// under the closed failure policy, or while recording, answers `503`.
pub async fn throttle_middleware(
    State(state): State<SharedState>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let identity = state.identities.resolve(&request);
    let address = state.addresses.resolve(&request);
    let action = action_from_path(&path);

    let ctx = state
        .gate
        .context(identity.as_deref(), address.as_deref(), Some(&action));
    let tiers = state.routes.select(&path);

    match state.gate.run(&ctx, tiers, move || next.run(request)).await {
        Ok(Admission::Completed(response)) => response,
        Ok(Admission::Denied(decision)) => too_many_requests(decision),
        Err(err) => err.into_response(),
    }
}

/// `429` body carrying the denial reason code.
pub fn too_many_requests(decision: Decision) -> Response {
    let code = decision.reason_code.unwrap_or(REASON_TOO_MANY_REQUESTS);
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(ErrorResponse::new("Too many requests", code)),
    )
        .into_response()
}

/// Logging middleware for request/response tracking
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let started = Instant::now();

    info!(
        target: "throttle_gate::middleware",
        method = %method,
        uri = %uri,
        "Incoming request"
    );

    let response = next.run(request).await;

    info!(
        target: "throttle_gate::middleware",
        method = %method,
        uri = %uri,
        status = %response.status(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Request completed"
    );

    response
}

use crate::handlers::{
    evaluate, health_check, metrics, readiness_check, record_outcome, usage, SharedState,
};
use crate::middleware::{logging_middleware, throttle_middleware};
use axum::routing::{get, post};
use axum::{middleware, Router};
use std::net::SocketAddr;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Router exposing the admission gate to collaborators over HTTP.
pub fn create_app(state: SharedState) -> Router {
    Router::new()
        .route("/v1/evaluate", post(evaluate))
        .route("/v1/outcomes", post(record_outcome))
        .route("/v1/usage", get(usage))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(logging_middleware)),
        )
}

/// Put every route of `router` behind the admission gate.
///
/// The handler timeout, when configured, sits outside the gate so a timed
/// out handler is cancelled and recorded as an unhandled failure.
pub fn throttled(router: Router, state: SharedState) -> Router {
    let timeout = state.handler_timeout;
    let router = router.layer(middleware::from_fn_with_state(state, throttle_middleware));

    match timeout {
        Some(timeout) => router.layer(TimeoutLayer::new(timeout)),
        None => router,
    }
}

pub struct Server {
    app: Router,
    addr: SocketAddr,
}

impl Server {
    pub fn new(addr: SocketAddr, state: SharedState) -> Self {
        Self {
            app: create_app(state),
            addr,
        }
    }

    pub async fn run(self) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;

        tracing::info!("Throttle gate listening on {}", self.addr);
        tracing::info!("Health check available at /health");
        tracing::info!("Readiness check available at /ready");

        // Run server with graceful shutdown
        axum::serve(
            listener,
            self.app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}

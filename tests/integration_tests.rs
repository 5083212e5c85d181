use async_trait::async_trait;
use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Request, StatusCode},
    routing::get,
    Router,
};
use http_body_util::BodyExt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use throttle_gate::{
    clock::ManualClock,
    create_app,
    handlers::{AppState, SharedState},
    store::{Event, EventStore, MemoryEventStore},
    throttled, Outcome, Settings, ThrottlerError, ThrottlerResult,
};
use tokio_test::{assert_err, assert_ok};
use tower::ServiceExt;

const START: i64 = 1_700_000_000_000;

struct Harness {
    state: SharedState,
    store: Arc<MemoryEventStore>,
    clock: Arc<ManualClock>,
}

fn harness(settings_json: &str) -> Harness {
    let settings = Settings::from_json(settings_json).unwrap();
    let store = Arc::new(MemoryEventStore::new());
    let clock = Arc::new(ManualClock::new(START));
    let state = AppState::from_settings(&settings, store.clone(), clock.clone()).unwrap();
    Harness {
        state: Arc::new(state),
        store,
        clock,
    }
}

fn api_routes() -> Router {
    Router::new()
        .route("/api/items", get(|| async { "items" }))
        .route("/api/missing", get(|| async { StatusCode::NOT_FOUND }))
        .route(
            "/api/broken",
            get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        )
        .route(
            "/api/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                "slow"
            }),
        )
}

fn from_user(path: &str, user: &str) -> Request<Body> {
    Request::builder()
        .uri(path)
        .header("x-user-id", user)
        .body(Body::empty())
        .unwrap()
}

fn from_peer(path: &str, peer: &str) -> Request<Body> {
    let addr: SocketAddr = peer.parse().unwrap();
    let mut request = Request::builder().uri(path).body(Body::empty()).unwrap();
    request.extensions_mut().insert(ConnectInfo(addr));
    request
}

fn json_request(method: &str, path: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

const USER_HEADER_SETTINGS: &str = r#"{
    "tiers": [{"windowSeconds": 60, "pointBudget": 9}],
    "identityHeader": "x-user-id"
}"#;

#[tokio::test]
async fn test_client_errors_exhaust_budget() {
    let h = harness(USER_HEADER_SETTINGS);
    let app = throttled(api_routes(), h.state.clone());

    for _ in 0..3 {
        let response = app.clone().oneshot(from_user("/api/missing", "alice")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    let response = app.clone().oneshot(from_user("/api/items", "alice")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = body_json(response).await;
    assert_eq!(body["message"], "Too many requests");
    assert_eq!(body["code"], "throttle.tooManyRequests");

    // denial recorded nothing
    assert_eq!(h.store.event_count("identity:alice"), 3);

    // another caller is unaffected
    let response = app.clone().oneshot(from_user("/api/items", "bob")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_window_expiry_readmits() {
    let h = harness(USER_HEADER_SETTINGS);
    let app = throttled(api_routes(), h.state.clone());

    for _ in 0..3 {
        app.clone().oneshot(from_user("/api/missing", "alice")).await.unwrap();
    }
    let response = app.clone().oneshot(from_user("/api/items", "alice")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    h.clock.advance_secs(61);
    let response = app.clone().oneshot(from_user("/api/items", "alice")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_identity_takes_precedence_over_address() {
    let h = harness(USER_HEADER_SETTINGS);
    let app = throttled(api_routes(), h.state.clone());

    let mut request = from_user("/api/items", "alice");
    request
        .extensions_mut()
        .insert(ConnectInfo("10.0.0.7:4000".parse::<SocketAddr>().unwrap()));
    app.clone().oneshot(request).await.unwrap();

    app.clone()
        .oneshot(from_peer("/api/items", "10.0.0.8:4000"))
        .await
        .unwrap();

    assert_eq!(h.store.event_count("identity:alice"), 1);
    assert_eq!(h.store.event_count("address:10.0.0.7"), 0);
    assert_eq!(h.store.event_count("address:10.0.0.8"), 1);
}

#[tokio::test]
async fn test_unkeyed_request_is_admitted_and_unrecorded() {
    let h = harness(USER_HEADER_SETTINGS);
    let app = throttled(api_routes(), h.state.clone());

    let request = Request::builder().uri("/api/items").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(h.store.total_events(), 0);
    assert_eq!(h.state.gate.metrics().snapshot().unthrottleable, 1);
}

#[tokio::test]
async fn test_server_error_scored_with_action() {
    let h = harness(USER_HEADER_SETTINGS);
    let app = throttled(api_routes(), h.state.clone());

    let response = app.oneshot(from_user("/api/broken", "alice")).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let events = h.store.events_for("identity:alice");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].outcome, Outcome::ServerError);
    assert_eq!(events[0].timestamp_ms, START);
    assert_eq!(events[0].action.as_deref(), Some("broken"));
}

#[tokio::test]
async fn test_timed_out_handler_recorded_as_unhandled_failure() {
    let h = harness(
        r#"{
            "tiers": [{"windowSeconds": 60, "pointBudget": 9}],
            "identityHeader": "x-user-id",
            "handlerTimeout": "20ms"
        }"#,
    );
    let app = throttled(api_routes(), h.state.clone());

    let response = app.oneshot(from_user("/api/slow", "alice")).await.unwrap();
    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);

    // the cancelled request is recorded in the background
    for _ in 0..50 {
        if h.store.event_count("identity:alice") > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let events = h.store.events_for("identity:alice");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].outcome, Outcome::UnhandledFailure);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_on_fresh_key() {
    let h = harness(
        r#"{
            "tiers": [{"windowSeconds": 60, "pointBudget": 1000}],
            "identityHeader": "x-user-id"
        }"#,
    );
    let app = throttled(api_routes(), h.state.clone());

    let requests = (0..50).map(|_| {
        let app = app.clone();
        tokio::spawn(async move { app.oneshot(from_user("/api/items", "carol")).await })
    });
    let responses = futures::future::join_all(requests).await;

    for response in responses {
        assert_eq!(response.unwrap().unwrap().status(), StatusCode::OK);
    }
    assert_eq!(h.store.event_count("identity:carol"), 50);
    assert_eq!(
        h.store
            .sum_weighted_points("identity:carol", START - 60_000)
            .await
            .unwrap(),
        50
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_simultaneous_requests_jointly_overshoot_budget() {
    let h = harness(
        r#"{
            "tiers": [{"windowSeconds": 60, "pointBudget": 2}],
            "identityHeader": "x-user-id"
        }"#,
    );

    // each handler only returns once both are in flight, so both were admitted
    let in_flight = Arc::new(tokio::sync::Barrier::new(2));
    let routes = Router::new().route(
        "/api/missing",
        get(move || {
            let in_flight = in_flight.clone();
            async move {
                in_flight.wait().await;
                StatusCode::NOT_FOUND
            }
        }),
    );
    let app = throttled(routes, h.state.clone());

    let requests = (0..2).map(|_| {
        let app = app.clone();
        tokio::spawn(async move { app.oneshot(from_user("/api/missing", "ivy")).await })
    });
    let responses = tokio::time::timeout(
        Duration::from_secs(5),
        futures::future::join_all(requests),
    )
    .await
    .expect("simultaneous requests did not complete");

    for response in responses {
        assert_eq!(response.unwrap().unwrap().status(), StatusCode::NOT_FOUND);
    }
    assert_eq!(
        h.store
            .sum_weighted_points("identity:ivy", START - 60_000)
            .await
            .unwrap(),
        6
    );

    let response = app.oneshot(from_user("/api/missing", "ivy")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_route_tiers_apply_per_path() {
    let h = harness(
        r#"{
            "tiers": [{"windowSeconds": 60, "pointBudget": 100}],
            "routes": [{"pattern": "^/api/items$", "tiers": [{"windowSeconds": 60, "pointBudget": 2}]}],
            "identityHeader": "x-user-id"
        }"#,
    );
    let app = throttled(api_routes(), h.state.clone());

    for _ in 0..2 {
        let response = app.clone().oneshot(from_user("/api/items", "dave")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app.clone().oneshot(from_user("/api/items", "dave")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    // same key, looser default tier
    let response = app.clone().oneshot(from_user("/api/missing", "dave")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[derive(Debug, Default)]
struct UnavailableStore {
    appends: AtomicUsize,
}

#[async_trait]
impl EventStore for UnavailableStore {
    async fn append(&self, _event: &Event) -> ThrottlerResult<()> {
        self.appends.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn sum_weighted_points(&self, _key: &str, _since_ms: i64) -> ThrottlerResult<u64> {
        Err(ThrottlerError::Storage("connection refused".to_string()))
    }

    async fn ping(&self) -> ThrottlerResult<()> {
        Err(ThrottlerError::Storage("connection refused".to_string()))
    }

    fn backend(&self) -> &'static str {
        "unavailable"
    }
}

fn unavailable_state(policy: &str) -> (SharedState, Arc<UnavailableStore>) {
    let settings = Settings::from_json(&format!(
        r#"{{"identityHeader": "x-user-id", "failurePolicy": "{}"}}"#,
        policy
    ))
    .unwrap();
    let store = Arc::new(UnavailableStore::default());
    let state =
        AppState::from_settings(&settings, store.clone(), Arc::new(ManualClock::new(START)))
            .unwrap();
    (Arc::new(state), store)
}

#[tokio::test]
async fn test_fail_closed_answers_service_unavailable() {
    let (state, store) = unavailable_state("closed");
    let app = throttled(api_routes(), state);

    let response = app.oneshot(from_user("/api/items", "erin")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response).await;
    assert_eq!(body["code"], "throttle.storageUnavailable");
    assert_eq!(store.appends.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_fail_open_admits_and_records() {
    let (state, store) = unavailable_state("open");
    let app = throttled(api_routes(), state.clone());

    let response = app.oneshot(from_user("/api/items", "erin")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(store.appends.load(Ordering::SeqCst), 1);
    assert_eq!(state.gate.metrics().snapshot().failed_open, 1);
}

#[tokio::test]
async fn test_readiness_reflects_store() {
    let (state, _store) = unavailable_state("open");
    let response = create_app(state)
        .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let h = harness("{}");
    let response = create_app(h.state)
        .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_health_endpoint() {
    let h = harness("{}");
    let response = create_app(h.state)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["dependencies"]["store"]["backend"], "memory");
}

#[tokio::test]
async fn test_evaluate_and_outcome_api() {
    let h = harness(r#"{"tiers": [{"windowSeconds": 60, "pointBudget": 5}]}"#);
    let app = create_app(h.state.clone());

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/evaluate",
            serde_json::json!({"identity": "frank", "action": "checkout"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["allowed"], true);
    assert_eq!(body["requestedAt"], START);

    // unhandled failure is worth five points, filling the budget
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/outcomes",
            serde_json::json!({
                "identity": "frank",
                "action": "checkout",
                "requestedAt": START,
                "outcome": "unhandled_failure"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/evaluate",
            serde_json::json!({"identity": "frank"}),
        ))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["allowed"], false);
    assert_eq!(body["reasonCode"], "throttle.tooManyRequests");

    let events = h.store.events_for("identity:frank");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action.as_deref(), Some("checkout"));
}

#[tokio::test]
async fn test_outcome_from_status_and_usage() {
    let h = harness(r#"{"tiers": [{"windowSeconds": 60, "pointBudget": 50}]}"#);
    let app = create_app(h.state.clone());

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/outcomes",
            serde_json::json!({"address": "192.0.2.1", "status": 503}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/v1/usage?address=192.0.2.1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["key"]["kind"], "address");
    assert_eq!(body["tiers"][0]["points"], 2);
    assert_eq!(body["tiers"][0]["violated"], false);
}

#[tokio::test]
async fn test_outcome_requires_exactly_one_classification() {
    let h = harness("{}");
    let app = create_app(h.state.clone());

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/outcomes",
            serde_json::json!({"identity": "gina"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/outcomes",
            serde_json::json!({"identity": "gina", "outcome": "success", "status": 200}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    assert_eq!(h.store.total_events(), 0);
}

#[tokio::test]
async fn test_metrics_endpoint_counts_decisions() {
    let h = harness(USER_HEADER_SETTINGS);
    let protected = throttled(api_routes(), h.state.clone());
    protected.oneshot(from_user("/api/items", "hank")).await.unwrap();

    let response = create_app(h.state.clone())
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["evaluated"], 1);
    assert_eq!(body["admitted"], 1);
    assert_eq!(body["outcomes"]["success"], 1);
}

#[tokio::test]
async fn test_invalid_route_pattern_rejected_at_startup() {
    let settings = assert_ok!(Settings::from_json(
        r#"{"routes": [{"pattern": "(", "tiers": [{"windowSeconds": 60, "pointBudget": 5}]}]}"#
    ));
    let built = AppState::from_settings(
        &settings,
        Arc::new(MemoryEventStore::new()),
        Arc::new(ManualClock::new(START)),
    )
    .map(|_| ());
    assert!(matches!(assert_err!(built), ThrottlerError::Configuration(_)));

    assert_err!(Settings::from_json(r#"{"tiers": []}"#));
    assert_err!(Settings::from_json(
        r#"{"tiers": [{"windowSeconds": 172800, "pointBudget": 5}], "retention": "1h"}"#
    ));
}

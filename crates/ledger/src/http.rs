//! HTTP ingestion and query surface.
//!
//! Routes (all under `/v1`, bearer-authenticated except health):
//! - `POST /v1/events`: single event
//! - `POST /v1/events/batch`: up to `max_batch` events, per-event results
//! - `GET  /v1/events`: filtered, paginated list
//! - `GET  /v1/events/{id}`: single event; wrong org reads as 404
//! - `GET  /v1/assets`: per-asset summaries
//! - `GET  /v1/assets/{asset_id}/events`: per-asset history
//! - `GET  /v1/health`: liveness, unauthenticated
//!
//! Every authenticated response carries `X-RateLimit-Limit`,
//! `X-RateLimit-Remaining` and `X-RateLimit-Reset`; exhaustion answers
//! 429 with `Retry-After`.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::auth::OrgResolver;
use crate::event::{Criticality, GovernanceEvent};
use crate::merkle::CheckpointSealer;
use crate::policy::IngestPolicy;
use crate::ratelimit::{RateLimitDecision, RateLimiter};
use crate::store::{EventFilter, EventStore, StoreError};

/// Service-level settings.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Largest accepted batch; bigger submissions are rejected wholesale.
    pub max_batch: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self { max_batch: 1_000 }
    }
}

/// Shared service state.
pub struct AppState {
    pub store: Arc<dyn EventStore>,
    pub resolver: Arc<dyn OrgResolver>,
    pub limiter: RateLimiter,
    pub sealer: Mutex<CheckpointSealer>,
    pub ingest_policy: IngestPolicy,
    pub config: LedgerConfig,
}

/// Build the service router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/events", post(ingest_one).get(list_events))
        .route("/v1/events/batch", post(ingest_batch))
        .route("/v1/events/{id}", get(get_event))
        .route("/v1/assets", get(list_assets))
        .route("/v1/assets/{asset_id}/events", get(asset_events))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ItemResult {
    Ok { status: &'static str, id: String },
    Err { status: &'static str, error: &'static str, message: String },
}

impl ItemResult {
    fn ok(id: String) -> Self {
        Self::Ok { status: "ok", id }
    }

    fn err(code: &'static str, message: impl Into<String>) -> Self {
        Self::Err {
            status: "error",
            error: code,
            message: message.into(),
        }
    }

    fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok", "service": "aigos-ledger"}))
}

/// Resolve the bearer credential to an org id, or produce the 401.
async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<String, Response> {
    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty());

    match bearer {
        Some(token) => match state.resolver.resolve(token).await {
            Some(org) => Ok(org),
            None => {
                tracing::warn!("Rejected request with unknown bearer credential");
                Err((
                    StatusCode::UNAUTHORIZED,
                    Json(json!({"error": "unauthorized"})),
                )
                    .into_response())
            }
        },
        None => Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "unauthorized"})),
        )
            .into_response()),
    }
}

fn rate_headers(decision: &RateLimitDecision) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let put = |headers: &mut HeaderMap, name: &'static str, value: String| {
        if let Ok(v) = HeaderValue::from_str(&value) {
            headers.insert(name, v);
        }
    };
    put(&mut headers, "x-ratelimit-limit", decision.limit.to_string());
    put(&mut headers, "x-ratelimit-remaining", decision.remaining.to_string());
    put(&mut headers, "x-ratelimit-reset", decision.reset_at.timestamp().to_string());
    headers
}

/// Admit a request against the `(channel, org)` window or produce the 429.
fn admit(state: &AppState, channel: &str, org: &str, critical: bool) -> Result<HeaderMap, Response> {
    let decision = state.limiter.check(channel, org, critical);
    let headers = rate_headers(&decision);
    if decision.allowed {
        return Ok(headers);
    }
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        headers,
        Json(json!({
            "error": "rate_limit_exceeded",
            "retryAfter": decision.retry_after_secs,
        })),
    )
        .into_response();
    if let Ok(v) = HeaderValue::from_str(&decision.retry_after_secs.to_string()) {
        response.headers_mut().insert("retry-after", v);
    }
    Err(response)
}

/// Validate and persist one event for `org`. Shared by both endpoints.
async fn process_event(state: &AppState, org: &str, raw: Value) -> ItemResult {
    let event: GovernanceEvent = match serde_json::from_value(raw) {
        Ok(event) => event,
        Err(e) => return ItemResult::err("EVT_BAD_REQUEST", e.to_string()),
    };
    if event.org_id != org {
        return ItemResult::err("EVT_WRONG_ORG", "event orgId does not match credential");
    }
    if !event.verify_hash() {
        return ItemResult::err("EVT_BAD_HASH", "hash does not match canonical recomputation");
    }

    let id = event.id.clone();
    let hash = event.hash.clone();
    let findings = state.ingest_policy.evaluate(&event);
    for finding in &findings {
        tracing::warn!(
            rule_id = %finding.rule_id,
            event_id = %finding.event_id,
            kind = ?finding.kind,
            "Ingest policy finding"
        );
    }

    match state.store.store(event).await {
        Ok(()) => {
            if let Some(checkpoint) = state.sealer.lock().observe(org, &hash, Utc::now()) {
                tracing::info!(
                    org_id = %checkpoint.org_id,
                    leaf_count = checkpoint.leaf_count,
                    root = %checkpoint.root,
                    "Merkle window sealed"
                );
            }
            ItemResult::ok(id)
        }
        Err(StoreError::Internal(msg)) => ItemResult::err("EVT_INTERNAL", msg),
        Err(StoreError::NotFound) => ItemResult::err("EVT_INTERNAL", "store rejected append"),
    }
}

fn raw_criticality(raw: &Value) -> Option<Criticality> {
    serde_json::from_value(raw.get("criticality")?.clone()).ok()
}

async fn ingest_one(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(raw): Json<Value>,
) -> Response {
    let org = match authenticate(&state, &headers).await {
        Ok(org) => org,
        Err(resp) => return resp,
    };
    let critical = raw_criticality(&raw) == Some(Criticality::Critical);
    let rate = match admit(&state, "sync", &org, critical) {
        Ok(h) => h,
        Err(resp) => return resp,
    };

    let result = process_event(&state, &org, raw).await;
    let (accepted, rejected) = if result.is_ok() { (1, 0) } else { (0, 1) };
    (
        StatusCode::OK,
        rate,
        Json(json!({"accepted": accepted, "rejected": rejected, "result": result})),
    )
        .into_response()
}

async fn ingest_batch(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(raw): Json<Value>,
) -> Response {
    let org = match authenticate(&state, &headers).await {
        Ok(org) => org,
        Err(resp) => return resp,
    };

    let Some(items) = raw.as_array().cloned() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "EVT_BAD_REQUEST", "message": "batch body must be an array"})),
        )
            .into_response();
    };
    if items.len() > state.config.max_batch {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "EVT_BATCH_TOO_LARGE",
                "message": format!("batch of {} exceeds limit {}", items.len(), state.config.max_batch),
            })),
        )
            .into_response();
    }

    // The exemption applies when the whole submission is critical traffic.
    let critical = !items.is_empty()
        && items
            .iter()
            .all(|raw| raw_criticality(raw) == Some(Criticality::Critical));
    let rate = match admit(&state, "batch", &org, critical) {
        Ok(h) => h,
        Err(resp) => return resp,
    };

    let mut results = Vec::with_capacity(items.len());
    for item in items {
        results.push(process_event(&state, &org, item).await);
    }
    let accepted = results.iter().filter(|r| r.is_ok()).count();
    let rejected = results.len() - accepted;

    (
        StatusCode::OK,
        rate,
        Json(json!({"accepted": accepted, "rejected": rejected, "results": results})),
    )
        .into_response()
}

async fn list_events(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(filter): Query<EventFilter>,
) -> Response {
    let org = match authenticate(&state, &headers).await {
        Ok(org) => org,
        Err(resp) => return resp,
    };
    let rate = match admit(&state, "query", &org, false) {
        Ok(h) => h,
        Err(resp) => return resp,
    };

    match state.store.list_events(&org, &filter).await {
        Ok(events) => {
            let count = events.len();
            (
                StatusCode::OK,
                rate,
                Json(json!({"events": events, "count": count})),
            )
                .into_response()
        }
        Err(e) => internal_error(rate, e),
    }
}

async fn get_event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let org = match authenticate(&state, &headers).await {
        Ok(org) => org,
        Err(resp) => return resp,
    };
    let rate = match admit(&state, "query", &org, false) {
        Ok(h) => h,
        Err(resp) => return resp,
    };

    match state.store.find_by_id(&org, &id).await {
        Ok(event) => (StatusCode::OK, rate, Json(event)).into_response(),
        // Wrong-org and missing are indistinguishable on purpose.
        Err(StoreError::NotFound) => (
            StatusCode::NOT_FOUND,
            rate,
            Json(json!({"error": "not_found"})),
        )
            .into_response(),
        Err(e) => internal_error(rate, e),
    }
}

async fn list_assets(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let org = match authenticate(&state, &headers).await {
        Ok(org) => org,
        Err(resp) => return resp,
    };
    let rate = match admit(&state, "query", &org, false) {
        Ok(h) => h,
        Err(resp) => return resp,
    };

    match state.store.list_assets(&org).await {
        Ok(assets) => (StatusCode::OK, rate, Json(json!({"assets": assets}))).into_response(),
        Err(e) => internal_error(rate, e),
    }
}

async fn asset_events(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(asset_id): Path<String>,
    Query(filter): Query<EventFilter>,
) -> Response {
    let org = match authenticate(&state, &headers).await {
        Ok(org) => org,
        Err(resp) => return resp,
    };
    let rate = match admit(&state, "query", &org, false) {
        Ok(h) => h,
        Err(resp) => return resp,
    };

    match state.store.asset_events(&org, &asset_id, &filter).await {
        Ok(events) => {
            let count = events.len();
            (
                StatusCode::OK,
                rate,
                Json(json!({"events": events, "count": count})),
            )
                .into_response()
        }
        Err(e) => internal_error(rate, e),
    }
}

fn internal_error(rate: HeaderMap, err: StoreError) -> Response {
    tracing::error!(error = %err, "Ledger storage failure");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        rate,
        Json(json!({"error": "EVT_INTERNAL"})),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenMap;
    use crate::event::EventBuilder;
    use crate::merkle::SealerConfig;
    use crate::ratelimit::RateLimitConfig;
    use crate::store::MemoryEventStore;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::Duration;
    use http_body_util::BodyExt;
    use tower::util::ServiceExt;

    fn test_state(limit: u32) -> Arc<AppState> {
        Arc::new(AppState {
            store: Arc::new(MemoryEventStore::new()),
            resolver: Arc::new(StaticTokenMap::new().with_token("acme-token", "acme")),
            limiter: RateLimiter::new(RateLimitConfig {
                limit,
                window: Duration::seconds(60),
                critical_exempt: true,
            }),
            sealer: Mutex::new(CheckpointSealer::new(SealerConfig::default())),
            ingest_policy: IngestPolicy::default(),
            config: LedgerConfig { max_batch: 3 },
        })
    }

    fn event_json(org: &str) -> Value {
        let event = EventBuilder::new("policy.decision", "policy", org, format!("{org}/bot"))
            .data(json!({"allowed": true}))
            .build();
        serde_json::to_value(event).unwrap()
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, headers, body)
    }

    fn post_event(body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/v1/events")
            .header("authorization", "Bearer acme-token")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(body).unwrap()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_is_open() {
        let app = router(test_state(10));
        let request = Request::builder()
            .uri("/v1/health")
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = send(app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_missing_bearer_is_unauthorized() {
        let app = router(test_state(10));
        let request = Request::builder()
            .method("POST")
            .uri("/v1/events")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&event_json("acme")).unwrap()))
            .unwrap();
        let (status, _, _) = send(app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_single_event_accepted_with_rate_headers() {
        let app = router(test_state(10));
        let (status, headers, body) = send(app, post_event(&event_json("acme"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["accepted"], 1);
        assert_eq!(body["rejected"], 0);
        assert_eq!(headers.get("x-ratelimit-limit").unwrap(), "10");
        assert_eq!(headers.get("x-ratelimit-remaining").unwrap(), "9");
        assert!(headers.contains_key("x-ratelimit-reset"));
    }

    #[tokio::test]
    async fn test_bad_hash_rejected() {
        let app = router(test_state(10));
        let mut tampered = event_json("acme");
        tampered["data"] = json!({"allowed": false});
        let (status, _, body) = send(app, post_event(&tampered)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["rejected"], 1);
        assert_eq!(body["result"]["error"], "EVT_BAD_HASH");
    }

    #[tokio::test]
    async fn test_wrong_org_event_rejected() {
        let app = router(test_state(10));
        let (_, _, body) = send(app, post_event(&event_json("globex"))).await;
        assert_eq!(body["result"]["error"], "EVT_WRONG_ORG");
    }

    #[tokio::test]
    async fn test_batch_partial_failure() {
        let state = test_state(10);
        let app = router(state.clone());
        let mut bad = event_json("acme");
        bad["data"] = json!({"tampered": true});
        let batch = json!([event_json("acme"), event_json("acme"), bad]);

        let request = Request::builder()
            .method("POST")
            .uri("/v1/events/batch")
            .header("authorization", "Bearer acme-token")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&batch).unwrap()))
            .unwrap();
        let (status, _, body) = send(app, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["accepted"], 2);
        assert_eq!(body["rejected"], 1);
        let results = body["results"].as_array().unwrap();
        assert_eq!(results[0]["status"], "ok");
        assert_eq!(results[1]["status"], "ok");
        assert_eq!(results[2]["error"], "EVT_BAD_HASH");

        // Accepted events are queryable in submission order.
        let listed = state
            .store
            .list_events("acme", &EventFilter::default())
            .await
            .unwrap();
        assert_eq!(listed.len(), 2);
    }

    #[tokio::test]
    async fn test_oversize_batch_rejected_wholesale() {
        let app = router(test_state(10));
        let batch = json!([
            event_json("acme"),
            event_json("acme"),
            event_json("acme"),
            event_json("acme")
        ]);
        let request = Request::builder()
            .method("POST")
            .uri("/v1/events/batch")
            .header("authorization", "Bearer acme-token")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&batch).unwrap()))
            .unwrap();
        let (status, _, body) = send(app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "EVT_BATCH_TOO_LARGE");
    }

    #[tokio::test]
    async fn test_rate_limit_429_with_retry_after() {
        let app = router(test_state(1));
        let (status, _, _) = send(app.clone(), post_event(&event_json("acme"))).await;
        assert_eq!(status, StatusCode::OK);

        let (status, headers, body) = send(app, post_event(&event_json("acme"))).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"], "rate_limit_exceeded");
        assert!(body["retryAfter"].as_i64().unwrap() >= 1);
        assert!(headers.contains_key("retry-after"));
    }

    #[tokio::test]
    async fn test_critical_event_bypasses_rate_limit() {
        let app = router(test_state(1));
        let (status, _, _) = send(app.clone(), post_event(&event_json("acme"))).await;
        assert_eq!(status, StatusCode::OK);

        let critical = serde_json::to_value(
            EventBuilder::new("killswitch.terminated", "killswitch", "acme", "acme/bot")
                .criticality(Criticality::Critical)
                .build(),
        )
        .unwrap();
        let (status, _, body) = send(app, post_event(&critical)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["accepted"], 1);
    }

    #[tokio::test]
    async fn test_get_event_wrong_org_is_404() {
        let state = test_state(10);
        let app = router(state.clone());
        let event = event_json("acme");
        let id = event["id"].as_str().unwrap().to_string();
        send(app.clone(), post_event(&event)).await;

        // Same id through another org's credential resolves to nothing.
        let other_state = Arc::new(AppState {
            store: state.store.clone(),
            resolver: Arc::new(StaticTokenMap::new().with_token("globex-token", "globex")),
            limiter: RateLimiter::new(RateLimitConfig::default()),
            sealer: Mutex::new(CheckpointSealer::new(SealerConfig::default())),
            ingest_policy: IngestPolicy::default(),
            config: LedgerConfig::default(),
        });
        let request = Request::builder()
            .uri(format!("/v1/events/{id}"))
            .header("authorization", "Bearer globex-token")
            .body(Body::empty())
            .unwrap();
        let (status, _, _) = send(router(other_state), request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_asset_listing_and_history() {
        let app = router(test_state(20));
        send(app.clone(), post_event(&event_json("acme"))).await;
        send(app.clone(), post_event(&event_json("acme"))).await;

        let request = Request::builder()
            .uri("/v1/assets")
            .header("authorization", "Bearer acme-token")
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = send(app.clone(), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["assets"][0]["assetId"], "acme/bot");
        assert_eq!(body["assets"][0]["eventCount"], 2);

        let request = Request::builder()
            .uri("/v1/assets/acme%2Fbot/events")
            .header("authorization", "Bearer acme-token")
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = send(app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 2);
    }
}

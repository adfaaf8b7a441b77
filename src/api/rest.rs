// =============================================================================
// REST API Endpoints
// =============================================================================
//
// All endpoints live under `/api/v1/`. Health is public; everything else
// requires the `AuthBearer` extractor.
//
//   GET  /api/v1/health
//   POST /api/v1/events      one inbound envelope `{type, ts?, payload}`
//   GET  /api/v1/state       published bandit state + counters
//   GET  /api/v1/decisions   recent decision ring
//   GET  /api/v1/metrics     aggregate metrics computed from the last snapshot
//   GET  /api/v1/ws          push feed (see `ws`)
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, warn};

use crate::api::auth::AuthBearer;
use crate::app_state::AppState;
use crate::events::{EventEnvelope, OutboundEvent};
use crate::metrics::MetricsSnapshot;
use crate::orchestrator::{DropReason, HandleOutcome};

// =============================================================================
// Router construction
// =============================================================================

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Public ──────────────────────────────────────────────────
        .route("/api/v1/health", get(health))
        // ── Authenticated ───────────────────────────────────────────
        .route("/api/v1/events", post(ingest_event))
        .route("/api/v1/state", get(full_state))
        .route("/api/v1/decisions", get(decisions))
        .route("/api/v1/metrics", get(metrics))
        .route("/api/v1/ws", get(crate::api::ws::ws_handler))
        // ── Middleware & State ───────────────────────────────────────
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health (public)
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    state_version: u64,
    server_time: i64,
    uptime_secs: u64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        state_version: state.current_state_version(),
        server_time: Utc::now().timestamp_millis(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

// =============================================================================
// Event ingestion (authenticated)
// =============================================================================

#[derive(Serialize)]
struct IngestResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<DropReason>,
    events: Vec<OutboundEvent>,
}

async fn ingest_event(_auth: AuthBearer, State(state): State<Arc<AppState>>, body: String) -> impl IntoResponse {
    let envelope = match EventEnvelope::decode_str(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            let event_type = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(str::to_string));
            warn!(error = %e, payload = %body, "inbound event rejected");
            state.push_rejection(e.to_string(), event_type);
            return (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": e.to_string() }))).into_response();
        }
    };

    match state.submit(envelope).await {
        Ok(HandleOutcome::Applied(events)) => Json(IngestResponse {
            status: "applied",
            reason: None,
            events,
        })
        .into_response(),
        Ok(HandleOutcome::Dropped(reason)) => Json(IngestResponse {
            status: "dropped",
            reason: Some(reason),
            events: Vec::new(),
        })
        .into_response(),
        Err(e) => {
            error!(error = %e, "orchestrator unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "error": "orchestrator unavailable" })),
            )
                .into_response()
        }
    }
}

// =============================================================================
// Read endpoints (authenticated)
// =============================================================================

async fn full_state(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.build_snapshot())
}

async fn decisions(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let decisions = state.recent_decisions.read().clone();
    Json(decisions)
}

async fn metrics(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = {
        let bandit = state.bandit_state.read();
        let counters = *state.counters.read();
        MetricsSnapshot::compute(&counters, bandit.arms.iter(), Utc::now())
    };
    Json(snapshot)
}

// =============================================================================
// Tests
// =============================================================================

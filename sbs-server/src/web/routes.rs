//! REST API route handlers.
//!
//! Aircraft endpoints read the in-memory tracker. The per-aircraft message
//! history reads the SQLite log on a blocking thread.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use sbs_core::types::{icao_from_hex, icao_to_string, Icao};

use crate::db::Database;
use crate::web::AppState;

// ---------------------------------------------------------------------------
// Query param types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct WindowParams {
    /// Seconds.
    window: Option<u64>,
}

#[derive(Deserialize)]
pub struct MessageParams {
    limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct PersistBody {
    enabled: bool,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn error(status: StatusCode, msg: &str) -> Response {
    (status, Json(json!({ "error": msg }))).into_response()
}

fn parse_icao(raw: &str) -> Result<Icao, Response> {
    icao_from_hex(raw).ok_or_else(|| error(StatusCode::BAD_REQUEST, "invalid ICAO address"))
}

// ---------------------------------------------------------------------------
// Aircraft endpoints
// ---------------------------------------------------------------------------

/// GET /aircraft: entries updated within the staleness window.
pub async fn aircraft_live(
    State(state): State<Arc<AppState>>,
    Query(params): Query<WindowParams>,
) -> impl IntoResponse {
    let window = params
        .window
        .map(Duration::from_secs)
        .unwrap_or(state.staleness);
    let live = state.pipeline.tracker().snapshot(Utc::now(), window);
    Json(serde_json::to_value(&live).unwrap_or(json!([])))
}

/// GET /aircraft/all: every tracked entry, stale or not.
pub async fn aircraft_all(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let all = state.pipeline.tracker().all();
    Json(serde_json::to_value(&all).unwrap_or(json!([])))
}

/// GET /aircraft/:icao
pub async fn aircraft_detail(
    State(state): State<Arc<AppState>>,
    Path(icao): Path<String>,
) -> Response {
    let icao = match parse_icao(&icao) {
        Ok(i) => i,
        Err(resp) => return resp,
    };

    match state.pipeline.tracker().get(&icao) {
        Some(ac) => Json(serde_json::to_value(&ac).unwrap_or(json!({}))).into_response(),
        None => error(StatusCode::NOT_FOUND, "Aircraft not found"),
    }
}

/// GET /aircraft/:icao/messages: recent logged messages, newest first.
pub async fn aircraft_messages(
    State(state): State<Arc<AppState>>,
    Path(icao): Path<String>,
    Query(params): Query<MessageParams>,
) -> Response {
    let icao = match parse_icao(&icao) {
        Ok(i) => icao_to_string(&i),
        Err(resp) => return resp,
    };
    let Some(db_path) = state.db_path.clone() else {
        return error(StatusCode::NOT_FOUND, "message log disabled");
    };
    let limit = params.limit.unwrap_or(100).clamp(1, 1000);

    let rows = tokio::task::spawn_blocking(move || {
        Database::open(&db_path).and_then(|db| db.messages_for(&icao, limit))
    })
    .await;

    match rows {
        Ok(Ok(rows)) => Json(serde_json::to_value(&rows).unwrap_or(json!([]))).into_response(),
        Ok(Err(e)) => {
            warn!("message log query failed: {e}");
            error(StatusCode::INTERNAL_SERVER_ERROR, "message log unavailable")
        }
        Err(e) => {
            warn!("message log task failed: {e}");
            error(StatusCode::INTERNAL_SERVER_ERROR, "message log unavailable")
        }
    }
}

// ---------------------------------------------------------------------------
// Stats + control
// ---------------------------------------------------------------------------

/// GET /api/stats: ingest counters and table size.
pub async fn api_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let counts = state.pipeline.counts();
    let tracker = state.pipeline.tracker();
    Json(json!({
        "valid": counts.valid,
        "invalid": counts.invalid,
        "tracked": tracker.len(),
        "live": tracker.snapshot(Utc::now(), state.staleness).len(),
        "persist": state.pipeline.persist_enabled(),
    }))
}

/// GET /control/persist
pub async fn persist_get(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "enabled": state.pipeline.persist_enabled() }))
}

/// PUT /control/persist: `{"enabled": bool}`
pub async fn persist_put(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PersistBody>,
) -> impl IntoResponse {
    state.pipeline.set_persist(body.enabled);
    Json(json!({ "enabled": state.pipeline.persist_enabled() }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

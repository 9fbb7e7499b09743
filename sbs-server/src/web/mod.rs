//! Web server: axum REST API over the live aircraft table.
//!
//! Shared state is the ingest pipeline (tracker, counters, persistence flag)
//! plus the message log path; handlers that read the log open their own
//! connection.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use sbs_core::pipeline::Pipeline;

pub mod routes;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    /// `None` when the message log is disabled.
    pub db_path: Option<String>,
    /// Default window for `/aircraft`.
    pub staleness: Duration,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/aircraft", get(routes::aircraft_live))
        .route("/aircraft/all", get(routes::aircraft_all))
        .route("/aircraft/:icao", get(routes::aircraft_detail))
        .route("/aircraft/:icao/messages", get(routes::aircraft_messages))
        .route("/api/stats", get(routes::api_stats))
        .route(
            "/control/persist",
            get(routes::persist_get).put(routes::persist_put),
        )
        .with_state(state)
        .layer(cors)
}

/// Bind and serve until `shutdown` resolves or the listener fails.
///
/// The router, and with it the state's pipeline handle, is dropped before
/// this returns.
pub async fn serve<F>(state: Arc<AppState>, host: &str, port: u16, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(state);
    let addr = format!("{host}:{port}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("SBS server listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

/// Resolves on Ctrl-C.
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("cannot listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

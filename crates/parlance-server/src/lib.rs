//! HTTP/WebSocket boundary for the Parlance voice platform.
//!
//! Routes:
//! - `/health` — liveness, always 200 once serving.
//! - `/ready` — 200 only after provider initialization; 503 before, and
//!   forever if initialization failed. Load balancers route calls on this.
//! - `/ws` — the call endpoint.

pub mod config;
pub mod ws;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use parlance_session::CallSupervisor;
use serde_json::{json, Value};
use std::sync::{Arc, OnceLock};
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
///
/// The supervisor slot is written exactly once, when provider
/// initialization succeeds. Until then the server is alive but not ready.
#[derive(Clone, Default)]
pub struct AppState {
    supervisor: Arc<OnceLock<Arc<CallSupervisor>>>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the supervisor once providers are initialized. A second call
    /// is ignored.
    pub fn install_supervisor(&self, supervisor: Arc<CallSupervisor>) {
        if self.supervisor.set(supervisor).is_err() {
            tracing::warn!("supervisor already installed");
        }
    }

    pub fn supervisor(&self) -> Option<Arc<CallSupervisor>> {
        self.supervisor.get().cloned()
    }
}

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Readiness handler: 503 until the provider registry initialized.
async fn ready(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match state.supervisor() {
        Some(_) => (StatusCode::OK, Json(json!({ "status": "ready" }))),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "initializing" })),
        ),
    }
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/ws", get(ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

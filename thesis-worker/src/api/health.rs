//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// "ok", or "degraded" while the scheduler is shut down
    pub status: String,
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    /// Short commit hash captured by build.rs
    pub git_hash: String,
    pub uptime_seconds: u64,
    /// Pipeline runs in progress
    pub active_jobs: usize,
    /// Jobs accepted and waiting for a slot
    pub queued_jobs: usize,
    /// Last error message if any (for diagnostics)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let last_error = state.last_error.read().await.clone();

    Json(HealthResponse {
        status: if state.scheduler.is_accepting() { "ok" } else { "degraded" }.to_string(),
        module: "thesis-worker".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("GIT_HASH").to_string(),
        uptime_seconds,
        active_jobs: state.scheduler.active_jobs(),
        queued_jobs: state.scheduler.queued_jobs(),
        last_error,
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

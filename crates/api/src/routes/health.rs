//! Health check endpoint handlers.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::app::AppState;
use crate::jobs::SchedulerStats;

/// Health check response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub scheduler: SchedulerStats,
    pub reports: usize,
}

/// Simple status response for liveness/readiness probes.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
}

/// Full health check endpoint.
///
/// Returns the service version together with the report engine counters.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let scheduler = state.reporting.scheduler().stats().await;
    let reports = state.reporting.store().len().await;

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        scheduler,
        reports,
    })
}

/// Liveness probe endpoint.
///
/// Returns 200 OK if the process is running.
pub async fn live() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "alive".to_string(),
    })
}

/// Readiness probe endpoint.
///
/// Returns 200 OK if the reports directory can be written to.
pub async fn ready(State(state): State<AppState>) -> Result<Json<StatusResponse>, StatusCode> {
    let reports_dir = state.reporting.scheduler().generator().reports_dir().to_path_buf();
    let writable = tokio::fs::create_dir_all(&reports_dir).await.is_ok()
        && tokio::fs::metadata(&reports_dir)
            .await
            .map(|m| m.is_dir() && !m.permissions().readonly())
            .unwrap_or(false);

    if writable {
        Ok(Json(StatusResponse {
            status: "ready".to_string(),
        }))
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}

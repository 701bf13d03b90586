//! Report CRUD and manual export routes.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use domain::models::Report;
use serde::Serialize;

use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::CurrentUser;

/// Response for listing the reports of a dashboard.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListReportsResponse {
    pub reports: Vec<Report>,
    pub count: usize,
}

/// GET /api/v1/dashboards/:dash_id/reports
pub async fn list_reports(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(dashboard_id): Path<i32>,
) -> Json<ListReportsResponse> {
    let reports = state.reporting.list(&user, dashboard_id).await;
    let count = reports.len();
    Json(ListReportsResponse { reports, count })
}

/// POST /api/v1/dashboards/:dash_id/reports
pub async fn create_report(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(dashboard_id): Path<i32>,
    Json(report): Json<Report>,
) -> Result<(StatusCode, Json<Report>), ApiError> {
    let created = state.reporting.create(&user, dashboard_id, report).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api/v1/dashboards/:dash_id/reports/:report_id
pub async fn get_report(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((dashboard_id, report_id)): Path<(i32, i32)>,
) -> Result<Json<Report>, ApiError> {
    let report = state.reporting.get(&user, dashboard_id, report_id).await?;
    Ok(Json(report))
}

/// PUT /api/v1/dashboards/:dash_id/reports/:report_id
pub async fn update_report(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((dashboard_id, report_id)): Path<(i32, i32)>,
    Json(report): Json<Report>,
) -> Result<Json<Report>, ApiError> {
    let updated = state
        .reporting
        .update(&user, dashboard_id, report_id, report)
        .await?;
    Ok(Json(updated))
}

/// DELETE /api/v1/dashboards/:dash_id/reports/:report_id
pub async fn delete_report(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((dashboard_id, report_id)): Path<(i32, i32)>,
) -> Result<StatusCode, ApiError> {
    state
        .reporting
        .delete(&user, dashboard_id, report_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/dashboards/:dash_id/reports/:report_id/export
///
/// Generates the report now and returns it with the outcome of the run.
pub async fn export_report(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((dashboard_id, report_id)): Path<(i32, i32)>,
) -> Result<Json<Report>, ApiError> {
    let report = state
        .reporting
        .export(&user, dashboard_id, report_id)
        .await?;
    Ok(Json(report))
}

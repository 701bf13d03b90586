//! Bulk deletion of stored device telemetry.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use domain::models::PinType;
use persistence::{DeviceSelector, PinSelector};
use serde::{Deserialize, Serialize};

use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::CurrentUser;

/// Query for `DELETE /api/v1/dashboards/:dash_id/device-data`.
#[derive(Debug, Deserialize)]
pub struct DeleteDeviceDataQuery {
    /// `*` for every device, or a device id.
    pub device: String,
    /// Comma-separated pin references such as `d8,v9`. Absent means all pins.
    pub pins: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteDeviceDataResponse {
    pub deleted_count: usize,
}

/// Parses the device/pin selector pair of a delete request.
///
/// Pins can only be narrowed down for a single device.
pub fn parse_selectors(query: &DeleteDeviceDataQuery) -> Result<(DeviceSelector, PinSelector), ApiError> {
    let device = match query.device.trim() {
        "*" => DeviceSelector::All,
        id => DeviceSelector::Device(
            id.parse()
                .map_err(|_| ApiError::Validation(format!("Invalid device id: {}", id)))?,
        ),
    };

    let pins = match query.pins.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
        None => PinSelector::All,
        Some(_) if device == DeviceSelector::All => {
            return Err(ApiError::Validation(
                "Pins can only be selected for a single device".to_string(),
            ))
        }
        Some(pins) => PinSelector::Pins(
            pins.split(',')
                .map(|pin| {
                    PinType::parse_pin(pin.trim())
                        .ok_or_else(|| ApiError::Validation(format!("Invalid pin: {}", pin)))
                })
                .collect::<Result<_, _>>()?,
        ),
    };

    Ok((device, pins))
}

/// DELETE /api/v1/dashboards/:dash_id/device-data?device=*|{id}&pins=d8,v9
pub async fn delete_device_data(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(dashboard_id): Path<i32>,
    Query(query): Query<DeleteDeviceDataQuery>,
) -> Result<Json<DeleteDeviceDataResponse>, ApiError> {
    let (devices, pins) = parse_selectors(&query)?;
    let deleted_count = state
        .reporting
        .delete_device_data(&user, dashboard_id, devices, pins)
        .await?;
    Ok(Json(DeleteDeviceDataResponse { deleted_count }))
}

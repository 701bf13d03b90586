//! Common test utilities for integration tests.
//!
//! Every fixture lives in its own temporary directory, so tests can run in
//! parallel without sharing telemetry files or archives.

// Not every helper is used by every test binary.
#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, Method, Request},
    Router,
};
use domain::models::{GraphGranularity, PinType, UserKey};
use domain::services::MockReportMailer;
use persistence::{ReportingStorage, StreamCoordinate};
use report_engine_api::{
    app::create_app,
    config::Config,
    extractors::{APP_NAME_HEADER, USER_EMAIL_HEADER},
    jobs::ReportScheduler,
    services::{ReportGenerationService, ReportingService},
};
use tempfile::TempDir;

pub const TEST_EMAIL: &str = "test@gmail.com";
pub const TEST_APP: &str = "Blynk";

/// A report engine wired to a recording mailer and a temporary data root.
pub struct TestEngine {
    pub dir: TempDir,
    pub mailer: MockReportMailer,
    pub reporting: ReportingService,
    pub app: Router,
}

impl TestEngine {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let data_dir = dir.path().join("data");
        let reports_dir = dir.path().join("reports");

        let config = test_config(&data_dir, &reports_dir);
        let mailer = MockReportMailer::new();
        let generator = ReportGenerationService::from_config(&config.reporting, Arc::new(mailer.clone()));
        let scheduler = ReportScheduler::new(generator, 2, Duration::from_secs(60));
        let reporting = ReportingService::new(scheduler);
        let app = create_app(config, reporting.clone(), None);

        Self {
            dir,
            mailer,
            reporting,
            app,
        }
    }

    pub fn storage(&self) -> ReportingStorage {
        self.reporting.scheduler().generator().storage().clone()
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.dir.path().join("reports")
    }

    /// Archive files currently in the reports directory.
    pub fn archives(&self) -> Vec<PathBuf> {
        match std::fs::read_dir(self.reports_dir()) {
            Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Stores one sample for the test user.
    pub fn append(&self, dashboard_id: i32, device_id: i32, pin_type: PinType, pin: u8, ts: i64, value: f64) {
        let coordinate = coordinate(dashboard_id, device_id, pin_type, pin);
        self.storage()
            .append(&test_user(), &coordinate, ts, value)
            .expect("Failed to append sample");
    }
}

impl Default for TestEngine {
    fn default() -> Self {
        Self::new()
    }
}

pub fn test_user() -> UserKey {
    UserKey::new(TEST_EMAIL, TEST_APP)
}

pub fn coordinate(dashboard_id: i32, device_id: i32, pin_type: PinType, pin: u8) -> StreamCoordinate {
    StreamCoordinate {
        dashboard_id,
        device_id,
        pin_type,
        pin,
        granularity: GraphGranularity::Minute,
    }
}

pub fn test_config(data_dir: &std::path::Path, reports_dir: &std::path::Path) -> Config {
    Config::load_for_test(&[
        ("reporting.data_dir", data_dir.to_str().expect("utf-8 temp path")),
        ("reporting.reports_dir", reports_dir.to_str().expect("utf-8 temp path")),
        ("logging.format", "pretty"),
    ])
    .expect("Failed to load test config")
}

/// Report JSON with one tile-template source reading `v1` of device 0.
pub fn report_json(id: i32, name: &str, report_type: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "name": name,
        "recipients": TEST_EMAIL,
        "granularityType": "MINUTE",
        "isActive": true,
        "reportSources": [{
            "type": "TILE_TEMPLATE",
            "templateId": 1,
            "deviceIds": [0],
            "reportDataStreams": [{
                "pin": 1,
                "pinType": "VIRTUAL",
                "label": "Temperature",
                "isSelected": true
            }]
        }],
        "reportType": report_type
    })
}

/// Build a request carrying the test user's identity headers.
pub fn user_request(method: Method, uri: &str, body: Option<serde_json::Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(USER_EMAIL_HEADER, TEST_EMAIL)
        .header(APP_NAME_HEADER, TEST_APP);

    match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// Helper to parse JSON response body.
pub async fn parse_response_body(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null)
}

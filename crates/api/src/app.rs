use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::Config;
use crate::middleware::{metrics_handler, metrics_middleware, trace_id};
use crate::routes::{device_data, health, reports};
use crate::services::ReportingService;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub reporting: ReportingService,
    /// Absent when no Prometheus recorder was installed (tests).
    pub metrics: Option<PrometheusHandle>,
}

pub fn create_app(
    config: Config,
    reporting: ReportingService,
    metrics: Option<PrometheusHandle>,
) -> Router {
    let config = Arc::new(config);

    let state = AppState {
        config: config.clone(),
        reporting,
        metrics,
    };

    // Build CORS layer based on configuration
    let cors = if config.security.cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = config
            .security
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    };

    // Report routes; the user comes from the gateway headers
    let report_routes = Router::new()
        .route(
            "/api/v1/dashboards/:dash_id/reports",
            get(reports::list_reports).post(reports::create_report),
        )
        .route(
            "/api/v1/dashboards/:dash_id/reports/:report_id",
            get(reports::get_report)
                .put(reports::update_report)
                .delete(reports::delete_report),
        )
        .route(
            "/api/v1/dashboards/:dash_id/reports/:report_id/export",
            post(reports::export_report),
        )
        .route(
            "/api/v1/dashboards/:dash_id/device-data",
            delete(device_data::delete_device_data),
        );

    // Public routes (no identity required)
    let public_routes = Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/health/ready", get(health::ready))
        .route("/api/health/live", get(health::live))
        .route("/metrics", get(metrics_handler));

    Router::new()
        .merge(public_routes)
        .merge(report_routes)
        // Global middleware (order matters: bottom layers run first)
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.request_timeout_secs,
        )))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_id))
        .layer(cors)
        .with_state(state)
}

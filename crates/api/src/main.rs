use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use report_engine_api::{
    app,
    config::Config,
    jobs::{JobScheduler, ReportCleanupJob, ReportScheduler},
    middleware::{init_logging, init_metrics},
    services::{EmailService, ReportGenerationService, ReportingService},
};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = Config::load().context("Failed to load configuration")?;

    init_logging(&config.logging).context("Failed to initialize logging")?;

    info!("Starting Report Engine v{}", env!("CARGO_PKG_VERSION"));

    let metrics = init_metrics().context("Failed to install Prometheus recorder")?;

    tokio::fs::create_dir_all(&config.reporting.reports_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create reports directory {}",
                config.reporting.reports_dir.display()
            )
        })?;

    let mailer = EmailService::new(config.email.clone());
    info!(
        enabled = mailer.is_enabled(),
        provider = %config.email.provider,
        "Email service configured"
    );

    let generator = ReportGenerationService::from_config(&config.reporting, Arc::new(mailer));
    let scheduler = ReportScheduler::from_config(&config.reporting, generator.clone());
    let reporting = ReportingService::new(scheduler.clone());

    let mut jobs = JobScheduler::new();
    jobs.register(ReportCleanupJob::new(
        generator,
        config.reporting.archive_retention_days,
    ));
    jobs.start();

    let app = app::create_app(config.clone(), reporting, Some(metrics));

    let addr = config.socket_addr()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped accepting connections, cleaning up");

    scheduler.shutdown().await;
    jobs.shutdown();
    jobs.wait_for_shutdown(Duration::from_secs(10)).await;

    info!("Graceful shutdown complete");
    Ok(())
}

/// Waits for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT, starting graceful shutdown"),
        () = terminate => info!("Received SIGTERM, starting graceful shutdown"),
    }
}

//! Scheduled telemetry report engine.
//!
//! Library half of the `report-engine` binary: configuration, the report
//! generation pipeline, the scheduling engine and the HTTP surface.

pub mod app;
pub mod config;
pub mod error;
pub mod extractors;
pub mod jobs;
pub mod middleware;
pub mod routes;
pub mod services;

//! Persistence layer for the report engine.
//!
//! This crate contains:
//! - The per-pin telemetry history store (read, append, delete)
//! - Storage operation metrics

pub mod metrics;
pub mod reporting_storage;

pub use reporting_storage::{
    decode_samples, DeviceSelector, PinSelector, ReportingStorage, StorageError,
    StreamCoordinate, RECORD_SIZE,
};

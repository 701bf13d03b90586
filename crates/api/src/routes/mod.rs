//! HTTP route handlers.

pub mod device_data;
pub mod health;
pub mod reports;

//! Domain layer for the report engine.
//!
//! This crate contains:
//! - Report domain models (reports, sources, periods, pins)
//! - Next-fire arithmetic for scheduled reports
//! - The report mailer contract used by the generation pipeline

pub mod models;
pub mod services;

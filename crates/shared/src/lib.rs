//! Shared utilities and common types for the report engine.
//!
//! This crate provides common functionality used across all other crates:
//! - Epoch-millisecond clock helpers
//! - Common validation logic

pub mod clock;
pub mod validation;

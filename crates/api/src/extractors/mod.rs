//! Custom Axum extractors.

pub mod current_user;

pub use current_user::{CurrentUser, APP_NAME_HEADER, USER_EMAIL_HEADER};

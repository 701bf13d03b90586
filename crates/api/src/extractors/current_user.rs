//! User identity extractor.
//!
//! Authentication happens in front of this service; the gateway forwards the
//! authenticated user as headers.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use domain::models::UserKey;

use crate::error::ApiError;

/// Header carrying the user's email.
pub const USER_EMAIL_HEADER: &str = "X-User-Email";

/// Header carrying the application the user belongs to.
pub const APP_NAME_HEADER: &str = "X-App-Name";

/// The user a request acts on behalf of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser(pub UserKey);

fn header_value<'a>(parts: &'a Parts, name: &str) -> Result<&'a str, ApiError> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::Unauthorized(format!("Missing {} header", name)))
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let email = header_value(parts, USER_EMAIL_HEADER)?;
        let app_name = header_value(parts, APP_NAME_HEADER)?;

        if email.contains(['/', '\\']) || app_name.contains(['/', '\\']) {
            return Err(ApiError::Unauthorized("Invalid user identity".to_string()));
        }

        Ok(CurrentUser(UserKey::new(email, app_name)))
    }
}

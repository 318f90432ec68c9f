//! Caller identification via the `X-Debug-User` header.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use domain::{Email, User};
use tracing::warn;

use crate::error::ApiError;
use crate::AppState;

pub const DEBUG_USER_HEADER: &str = "x-debug-user";

/// The user a request runs on behalf of; `None` for anonymous callers.
///
/// Known emails load their account, unknown ones are provisioned. A blocked
/// account is rejected before any handler runs.
pub struct Actor(pub Option<User>);

impl Actor {
    pub fn user(&self) -> Option<&User> {
        self.0.as_ref()
    }

    /// The signed-in user, or `401` for anonymous callers.
    pub fn require(&self) -> Result<&User, ApiError> {
        self.0.as_ref().ok_or(ApiError::Unauthorized)
    }

    pub fn is_admin(&self) -> bool {
        self.0.as_ref().is_some_and(User::is_admin)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Actor {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(raw) = parts.headers.get(DEBUG_USER_HEADER) else {
            return Ok(Actor(None));
        };
        let email = raw
            .to_str()
            .ok()
            .and_then(|s| Email::new(s.to_lowercase()).ok())
            .ok_or(ApiError::Unauthorized)?;
        match state.users.resolve_actor(&email, &state.admin_emails) {
            Ok(user) => Ok(Actor(Some(user))),
            Err(e) => {
                warn!(email = %email.as_str(), err = %e, "actor rejected");
                Err(e.into())
            }
        }
    }
}

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use domain::CoreError;
use tracing::error;

/// Error returned by handlers; renders as `{"error": {"code", "message"}}`.
#[derive(Debug)]
pub enum ApiError {
    Core(CoreError),
    BadRequest(String),
    Unauthorized,
}

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        ApiError::Core(e)
    }
}

impl ApiError {
    fn status_and_body(&self) -> (StatusCode, serde_json::Value) {
        use http_common::{json_err, json_error_with_message};
        match self {
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                json_error_with_message("invalid_request", msg),
            ),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, json_err("unauthorized")),
            ApiError::Core(e) => match e {
                CoreError::NotFound => (StatusCode::NOT_FOUND, json_err("not_found")),
                CoreError::Unpublished => (StatusCode::NOT_FOUND, json_err("unpublished")),
                CoreError::Blocked => (StatusCode::FORBIDDEN, json_err("blocked")),
                CoreError::QuotaExceeded => {
                    (StatusCode::TOO_MANY_REQUESTS, json_err("quota_exceeded"))
                }
                CoreError::UniqueConstraintViolation(_) => (
                    StatusCode::CONFLICT,
                    json_error_with_message("conflict", &e.to_string()),
                ),
                CoreError::InvalidUrl(_)
                | CoreError::InvalidShortCode(_)
                | CoreError::InvalidEmail
                | CoreError::InvalidTag(_)
                | CoreError::InvalidBlockExpiry => (
                    StatusCode::BAD_REQUEST,
                    json_error_with_message("invalid_request", &e.to_string()),
                ),
                CoreError::Forbidden => (StatusCode::FORBIDDEN, json_err("forbidden")),
                CoreError::AccountBlocked => (StatusCode::FORBIDDEN, json_err("account_blocked")),
                CoreError::LastAdmin => (StatusCode::CONFLICT, json_err("last_admin")),
                CoreError::Repository(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, json_err("internal"))
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = self.status_and_body();
        if status.is_server_error() {
            error!(err = ?self, "request failed");
        }
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(e: CoreError) -> StatusCode {
        ApiError::from(e).status_and_body().0
    }

    #[test]
    fn core_errors_map_to_statuses() {
        assert_eq!(status(CoreError::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(status(CoreError::Unpublished), StatusCode::NOT_FOUND);
        assert_eq!(status(CoreError::Blocked), StatusCode::FORBIDDEN);
        assert_eq!(status(CoreError::QuotaExceeded), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            status(CoreError::UniqueConstraintViolation("short code")),
            StatusCode::CONFLICT
        );
        assert_eq!(status(CoreError::InvalidBlockExpiry), StatusCode::BAD_REQUEST);
        assert_eq!(status(CoreError::LastAdmin), StatusCode::CONFLICT);
        assert_eq!(status(CoreError::Repository("x".into())), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn body_carries_code() {
        let (_, body) = ApiError::from(CoreError::Unpublished).status_and_body();
        assert_eq!(body["error"]["code"], "unpublished");
        let (_, body) = ApiError::from(CoreError::InvalidUrl("empty".into())).status_and_body();
        assert_eq!(body["error"]["message"], "invalid url: empty");
    }
}

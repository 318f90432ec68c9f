use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use domain::CoreError;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::AppState;

/// `GET /r/:code` — follow a short code with a temporary redirect.
pub async fn follow(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Response, ApiError> {
    let outcome = state.urls.handle_redirect(&code)?;
    match outcome.into_result() {
        Ok(destination) => {
            let location = HeaderValue::try_from(destination.as_str()).map_err(|e| {
                CoreError::Repository(format!("destination of {code} is not a header value: {e}"))
            })?;
            info!(%code, redirect_to = %destination, "resolve ok");
            Ok((StatusCode::TEMPORARY_REDIRECT, [(header::LOCATION, location)]).into_response())
        }
        Err(e) => {
            warn!(%code, reason = %e, "resolve refused");
            Err(e.into())
        }
    }
}

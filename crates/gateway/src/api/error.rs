//! Translates `xp_domain::Error` into the HTTP status codes and JSON bodies
//! described in the error handling design: validation/auth/csrf get their
//! own codes, everything else is a 500 with `{error, type}`. Handlers return
//! `Result<_, ApiError>` and never build a `Response` for an error case by
//! hand.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use xp_domain::Error;

pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, type_name) = match &self.0 {
            Error::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
            Error::Auth(_) => (StatusCode::UNAUTHORIZED, "auth"),
            Error::Csrf(_) => (StatusCode::FORBIDDEN, "csrf"),
            Error::UnknownSession(_) => (StatusCode::NOT_FOUND, "unknown_session"),
            Error::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "io"),
            Error::Json(_) => (StatusCode::INTERNAL_SERVER_ERROR, "json"),
            Error::Http(_) => (StatusCode::INTERNAL_SERVER_ERROR, "http"),
            Error::Timeout(_) => (StatusCode::INTERNAL_SERVER_ERROR, "timeout"),
            Error::SessionBusy(_) => (StatusCode::INTERNAL_SERVER_ERROR, "session_busy"),
            Error::Reconnect(_) => (StatusCode::INTERNAL_SERVER_ERROR, "reconnect"),
            Error::BundleLoad(_) => (StatusCode::INTERNAL_SERVER_ERROR, "bundle_load"),
            Error::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config"),
            Error::Other(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::warn!(error = %self.0, type_name, "request failed");
            (status, Json(json!({"error": self.0.to_string(), "type": type_name}))).into_response()
        } else {
            (status, Json(json!({"error": self.0.to_string()}))).into_response()
        }
    }
}

pub fn validation(message: impl Into<String>) -> ApiError {
    ApiError(Error::Validation(message.into()))
}

/// Enforces the `^[A-Za-z0-9_\-]+$` shape required of every `{id}` path
/// parameter.
pub fn require_safe_id(id: &str) -> Result<(), ApiError> {
    if xp_domain::ids::is_safe_id(id) {
        Ok(())
    } else {
        Err(validation(format!("invalid id: {id}")))
    }
}

//! API authentication middleware.
//!
//! Reads the env var named by `config.server.api_token_env` (default
//! `EXPERIENCE_API_TOKEN`) **once at startup** and caches the SHA-256 digest
//! on `AppState`. When unset, the server runs in open (dev) mode. When set,
//! protected routes require `Authorization: Bearer <token>` or
//! `X-API-Key: <token>`, compared in constant time.
//!
//! Grounded verbatim on the teacher's `gateway/src/api/auth.rs`
//! (SHA-256 + `subtle::ConstantTimeEq`), generalized to also accept
//! `X-API-Key` per the external-interfaces authentication rules.

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::state::AppState;

fn extract_token(req: &Request<Body>) -> &str {
    if let Some(bearer) = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return bearer;
    }
    req.headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

/// Axum middleware that enforces bearer/`X-API-Key` authentication on
/// protected routes. Attach via `axum::middleware::from_fn_with_state`.
pub async fn require_api_token(State(state): State<AppState>, req: Request<Body>, next: Next) -> Response {
    let expected_hash = match &state.api_token_hash {
        Some(h) => h,
        None => return next.run(req).await,
    };

    let provided = extract_token(&req);
    let provided_hash = Sha256::digest(provided.as_bytes());

    if provided.is_empty() || !bool::from(provided_hash.ct_eq(expected_hash.as_slice())) {
        return (
            axum::http::StatusCode::UNAUTHORIZED,
            axum::Json(serde_json::json!({ "error": "invalid or missing API token" })),
        )
            .into_response();
    }

    next.run(req).await
}

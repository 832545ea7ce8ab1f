pub mod auth;
pub mod core;
pub mod error;
pub mod voice;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full API router: a `/api` core surface and an `/apps/voice`
/// mounted app, each split into public and auth-gated sub-routers per the
/// teacher's `route_layer` pattern.
pub fn router(state: AppState) -> Router<AppState> {
    let core_public = Router::new()
        .route("/health", get(core::health))
        .route("/apps", get(core::apps))
        .route("/status", get(core::status))
        .route("/sessions", get(core::list_sessions));

    let core_protected = Router::new()
        .route("/integrations", get(core::integrations))
        .route("/test-provider", post(core::test_provider))
        .route("/bridge/session", post(core::bridge_session))
        .route("/bridge/execute", post(core::bridge_execute))
        .route("/memory/remember", post(core::remember))
        .route("/memory/recall", get(core::recall))
        .route("/memory/work-status", get(core::work_status))
        .route("/memory/work-log", post(core::work_log))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_api_token));

    let api = Router::new().nest("/api", core_public.merge(core_protected));

    let voice_public = Router::new()
        .route("/", get(voice::index))
        .route("/static/vendor.js", get(voice::vendor_js))
        .route("/api/status", get(voice::voice_status))
        .route("/sdp", post(voice::sdp_exchange))
        .route("/events", get(voice::events));

    let voice_protected = Router::new()
        .route("/session", get(voice::get_session_token))
        .route("/sessions", get(voice::list_sessions).post(voice::create_session))
        .route("/sessions/stats", get(voice::sessions_stats))
        .route("/sessions/:id/resume", post(voice::resume_session))
        .route("/sessions/:id/transcript", post(voice::append_transcript))
        .route("/sessions/:id/end", post(voice::end_session))
        .route("/tools/execute", post(voice::tools_execute))
        .route("/cancel", post(voice::cancel))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_api_token));

    let voice_app = Router::new().nest("/apps/voice", voice_public.merge(voice_protected));

    api.merge(voice_app).layer(tower_http::trace::TraceLayer::new_for_http())
}

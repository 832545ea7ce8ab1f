//! `/apps/voice/*` routes: the WebRTC voice assistant app.
//!
//! Grounded on `original_source/.../voice/server.py` (or the closest
//! analogue in the retrieval pack) for the route shapes, and on the
//! teacher's SSE/dashboard handlers for the streaming idiom
//! (`async-stream` + `axum::response::sse`).

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use futures_core::Stream;
use serde::Deserialize;
use serde_json::{json, Value};

use xp_domain::config::resolve_api_token;
use xp_domain::Error;
use xp_sessions::CancelLevel;
use xp_voice::VoiceConnection;

use crate::api::error::{require_safe_id, validation, ApiError};
use crate::state::AppState;

const STATIC_INDEX: &str = r#"<!doctype html>
<html>
<head><title>Voice</title><script src="/apps/voice/static/vendor.js"></script></head>
<body><div id="app">voice assistant</div></body>
</html>
"#;

const STATIC_VENDOR_JS: &str = "// bundled voice UI vendor code is built out of tree\n";

const VALID_END_REASONS: &[&str] =
    &["session_limit", "network_error", "user_ended", "idle_timeout", "error"];

pub async fn index() -> Html<&'static str> {
    Html(STATIC_INDEX)
}

pub async fn vendor_js() -> Response {
    ([(header::CONTENT_TYPE, "application/javascript")], STATIC_VENDOR_JS).into_response()
}

pub async fn voice_status(State(state): State<AppState>) -> Json<Value> {
    let api_key_set = resolve_api_token("OPENAI_API_KEY").is_some();
    Json(json!({
        "status": if api_key_set { "ready" } else { "unconfigured" },
        "api_key_set": api_key_set,
        "model": state.voice_config.model,
        "voice": state.voice_config.voice,
        "assistant_name": state.config.voice.assistant_name,
        "turn_server": null,
    }))
}

/// Mints an ephemeral client secret for the browser to open a Realtime
/// session with directly.
pub async fn get_session_token(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let value = xp_voice::realtime::create_client_secret(&state.http_client, &state.voice_config).await?;
    Ok(Json(json!({ "value": value })))
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| validation("missing bearer ephemeral token"))
}

/// SDP offer/answer exchange. Authenticated by the ephemeral token minted
/// by `get_session_token`, never the server's own API token.
pub async fn sdp_exchange(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Response, ApiError> {
    let ephemeral_token = bearer_token(&headers)?;
    let answer =
        xp_voice::realtime::exchange_sdp(&state.http_client, &body, ephemeral_token, &state.voice_config.model)
            .await?;
    Ok(([(header::CONTENT_TYPE, "application/sdp")], answer).into_response())
}

/// Allow only a missing `Origin` header, or one naming `localhost`/
/// `127.0.0.1`; anything else is a cross-site request and is refused.
fn check_csrf_origin(headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(origin) = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok()) else {
        return Ok(());
    };
    if origin.contains("localhost") || origin.contains("127.0.0.1") {
        Ok(())
    } else {
        Err(ApiError(Error::Csrf(format!("origin '{origin}' is not allowed"))))
    }
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub session_id: String,
}

/// Server-Sent Events stream draining one voice session's bounded event
/// queue. Emits a heartbeat comment every 5 seconds when the queue is
/// idle so intermediaries don't close the connection.
pub async fn events(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<EventsQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>>, ApiError> {
    check_csrf_origin(&headers)?;
    require_safe_id(&q.session_id)?;

    let connection = state
        .get_voice_connection(&q.session_id)
        .ok_or_else(|| ApiError(Error::UnknownSession(q.session_id.clone())))?;

    let queue = connection.queue();
    let mut receiver = queue
        .take_receiver()
        .ok_or_else(|| validation("an event stream is already attached to this session"))?;

    let stream = async_stream::stream! {
        loop {
            match tokio::time::timeout(Duration::from_secs(5), receiver.recv()).await {
                Ok(Some(value)) => yield Ok(Event::default().data(value.to_string())),
                Ok(None) => break,
                Err(_elapsed) => yield Ok(Event::default().comment("heartbeat")),
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[derive(Debug, Deserialize, Default)]
pub struct CreateVoiceSessionRequest {
    pub workspace_root: Option<String>,
}

pub async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateVoiceSessionRequest>,
) -> Result<Json<Value>, ApiError> {
    let workspace_root = match req.workspace_root {
        Some(root) => root,
        None => std::env::current_dir().map(|p| p.display().to_string()).unwrap_or_else(|_| "/".into()),
    };

    let connection = Arc::new(VoiceConnection::new(
        state.session_backend.clone(),
        state.transcript_store.clone(),
        state.runtime_home.clone(),
    ));
    let session_id = connection.create(&workspace_root).await?;
    state.insert_voice_connection(session_id.clone(), connection);

    Ok(Json(json!({ "session_id": session_id })))
}

/// Resumes a tombstoned/disconnected backend session: rewires a fresh
/// event queue through `VoiceConnection::resume`, then returns a fresh
/// ephemeral client secret plus the prior turns to replay into it.
pub async fn resume_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    require_safe_id(&id)?;

    let working_dir = match state.session_backend.get_session_info(&id) {
        Some(info) => info.working_dir,
        None => state
            .discovery
            .get_session(&id)?
            .ok_or_else(|| ApiError(Error::UnknownSession(id.clone())))?
            .project_path,
    };

    let connection = state.get_voice_connection(&id).unwrap_or_else(|| {
        Arc::new(VoiceConnection::new(
            state.session_backend.clone(),
            state.transcript_store.clone(),
            state.runtime_home.clone(),
        ))
    });
    connection.resume(&id, &working_dir).await?;
    state.insert_voice_connection(id.clone(), connection);

    let context_to_inject = state.transcript_store.get_resumption_context(&id)?;
    let client_secret = xp_voice::realtime::create_client_secret(&state.http_client, &state.voice_config).await?;

    Ok(Json(json!({
        "client_secret": client_secret,
        "context_to_inject": context_to_inject,
    })))
}

/// Wire shape for one appended entry. `id`/`conversation_id` are assigned
/// server-side, not taken from the client, so a caller can't spoof another
/// conversation's entries.
#[derive(Debug, Deserialize)]
pub struct TranscriptEntryWire {
    pub kind: xp_voice::EntryKind,
    pub content: Value,
    #[serde(default)]
    pub item_id: Option<String>,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub call_id: Option<String>,
    #[serde(default)]
    pub audio_duration_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct AppendTranscriptRequest {
    pub entries: Vec<TranscriptEntryWire>,
}

pub async fn append_transcript(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: axum::body::Bytes,
) -> Result<Json<Value>, ApiError> {
    require_safe_id(&id)?;

    let raw: Value = serde_json::from_slice(&body).map_err(|e| validation(format!("invalid JSON body: {e}")))?;
    if !raw.is_object() {
        return Err(validation("transcript body must be a JSON object with an `entries` array"));
    }
    let req: AppendTranscriptRequest =
        serde_json::from_value(raw).map_err(|e| validation(format!("invalid transcript body: {e}")))?;

    let working_dir = state
        .session_backend
        .get_session_info(&id)
        .map(|i| i.working_dir)
        .unwrap_or_default();

    let now = chrono::Utc::now();
    for wire in &req.entries {
        let entry = xp_voice::TranscriptEntry {
            item_id: wire.item_id.clone(),
            tool_name: wire.tool_name.clone(),
            call_id: wire.call_id.clone(),
            audio_duration_ms: wire.audio_duration_ms,
            ..xp_voice::TranscriptEntry::new(&id, wire.kind, wire.content.clone(), now)
        };
        state.transcript_store.add_entry(&id, &working_dir, &entry)?;
    }

    Ok(Json(json!({ "ok": true, "appended": req.entries.len() })))
}

#[derive(Debug, Deserialize, Default)]
pub struct EndSessionRequest {
    pub reason: Option<String>,
}

pub async fn end_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<EndSessionRequest>,
) -> Result<Json<Value>, ApiError> {
    require_safe_id(&id)?;

    let reason = match req.reason {
        Some(r) if VALID_END_REASONS.contains(&r.as_str()) => r,
        _ => "error".to_string(),
    };

    if let Some(connection) = state.remove_voice_connection(&id) {
        connection.end(&reason).await?;
    } else {
        state.session_backend.end_session(&id).await?;
        state.transcript_store.set_status(&id, xp_voice::ConversationStatus::Ended, Some(reason.clone()))?;
    }

    Ok(Json(json!({ "ok": true, "reason": reason })))
}

pub async fn list_sessions(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let conversations = state.transcript_store.list_conversations()?;
    Ok(Json(json!(conversations)))
}

pub async fn sessions_stats(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let conversations = state.transcript_store.list_conversations()?;
    let active = conversations.iter().filter(|c| c.status == xp_voice::ConversationStatus::Active).count();
    Ok(Json(json!({
        "total": conversations.len(),
        "active": active,
        "live_connections": state.voice_connections.lock().len(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct ToolExecuteRequest {
    pub session_id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Dispatches the four tool calls the voice assistant's model can invoke
/// against the underlying coding session.
pub async fn tools_execute(
    State(state): State<AppState>,
    Json(req): Json<ToolExecuteRequest>,
) -> Result<Json<Value>, ApiError> {
    require_safe_id(&req.session_id)?;

    match req.name.as_str() {
        "delegate" => {
            if state.is_paused(&req.session_id) {
                return Ok(Json(json!({"ok": false, "error": "replies are paused for this session"})));
            }
            let prompt = req
                .arguments
                .get("prompt")
                .and_then(|v| v.as_str())
                .ok_or_else(|| validation("delegate requires a `prompt` argument"))?;
            let response = state.session_backend.send_message(&req.session_id, prompt).await?;
            Ok(Json(json!({"ok": true, "response": response})))
        }
        "cancel_current_task" => {
            let immediate = req.arguments.get("immediate").and_then(|v| v.as_bool()).unwrap_or(false);
            let level = if immediate { CancelLevel::Immediate } else { CancelLevel::Graceful };
            let cancelled = state.session_backend.cancel_session(&req.session_id, level).await;
            Ok(Json(json!({"ok": cancelled})))
        }
        "pause_replies" => {
            state.paused_sessions.lock().insert(req.session_id.clone());
            Ok(Json(json!({"ok": true})))
        }
        "resume_replies" => {
            state.paused_sessions.lock().remove(&req.session_id);
            Ok(Json(json!({"ok": true})))
        }
        other => Err(validation(format!("unknown tool '{other}'"))),
    }
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub session_id: String,
    #[serde(default)]
    pub immediate: bool,
}

pub async fn cancel(State(state): State<AppState>, Json(req): Json<CancelRequest>) -> Result<Json<Value>, ApiError> {
    require_safe_id(&req.session_id)?;
    let level = if req.immediate { CancelLevel::Immediate } else { CancelLevel::Graceful };
    let cancelled = state.session_backend.cancel_session(&req.session_id, level).await;
    Ok(Json(json!({ "ok": cancelled })))
}

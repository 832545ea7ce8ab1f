//! `/api/*` core routes: health, app registry, startup-validation status,
//! integration probes, the bridge session shortcut, and the memory stub.
//!
//! Grounded on the teacher's `gateway/src/api/{admin,providers,chat,
//! memory}.rs` handler idioms (ad hoc `serde_json::json!()` bodies built
//! from a `Result` at the call site, auth applied via `route_layer`).

use std::collections::VecDeque;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use xp_domain::config::{resolve_api_token, ConfigSeverity};

use crate::api::error::{validation, ApiError};
use crate::state::AppState;

const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");
const WORK_LOG_CAPACITY: usize = 200;

pub async fn health() -> Json<Value> {
    Json(json!({"status": "ok", "version": SERVER_VERSION}))
}

pub async fn apps() -> Json<Value> {
    Json(json!({
        "voice": {
            "description": "WebRTC voice assistant",
            "version": SERVER_VERSION,
            "mount_path": "/apps/voice",
            "enabled": true,
        }
    }))
}

pub async fn status(State(state): State<AppState>) -> Json<Value> {
    let issues = state.config.validate();
    let checks: Vec<Value> = issues
        .iter()
        .map(|issue| {
            json!({
                "name": issue.field,
                "passed": issue.severity != ConfigSeverity::Error,
                "message": issue.message,
                "severity": issue.severity.to_string(),
            })
        })
        .collect();
    let passed = !issues.iter().any(|i| i.severity == ConfigSeverity::Error);
    Json(json!({"passed": passed, "checks": checks}))
}

pub async fn integrations(State(state): State<AppState>) -> Json<Value> {
    let api_token_configured = resolve_api_token(&state.config.server.api_token_env).is_some();
    let openai_configured = resolve_api_token("OPENAI_API_KEY").is_some();

    Json(json!({
        "api_token": {
            "configured": api_token_configured,
            "setup_url": null,
        },
        "openai": {
            "configured": openai_configured,
            "setup_url": "https://platform.openai.com/api-keys",
        },
    }))
}

#[derive(Debug, Deserialize)]
pub struct TestProviderRequest {
    pub provider: String,
}

/// Provider probes never bubble up as server errors: a failed network call
/// is reported as `{ok:false, error}` with HTTP 200, per the error design's
/// "only server-side bugs yield 5xx" rule.
pub async fn test_provider(
    State(state): State<AppState>,
    Json(req): Json<TestProviderRequest>,
) -> Json<Value> {
    let (env_var, probe_url) = match req.provider.as_str() {
        "openai" => ("OPENAI_API_KEY", "https://api.openai.com/v1/models"),
        other => {
            return Json(json!({
                "provider": other,
                "ok": false,
                "error": format!("unknown provider '{other}'"),
            }))
        }
    };

    let Some(key) = resolve_api_token(env_var) else {
        return Json(json!({
            "provider": req.provider,
            "ok": false,
            "error": format!("{env_var} is not set"),
        }));
    };

    match state
        .http_client
        .get(probe_url)
        .bearer_auth(key)
        .timeout(Duration::from_secs(10))
        .send()
        .await
    {
        Ok(resp) => Json(json!({
            "provider": req.provider,
            "ok": resp.status().is_success(),
            "status_code": resp.status().as_u16(),
        })),
        Err(e) => Json(json!({
            "provider": req.provider,
            "ok": false,
            "error": e.to_string(),
        })),
    }
}

pub async fn list_sessions(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.session_backend.list_active_sessions()))
}

#[derive(Debug, Deserialize)]
pub struct BridgeSessionRequest {
    pub working_dir: String,
    #[serde(default)]
    pub bundle: Option<String>,
    #[serde(default)]
    pub description: String,
}

pub async fn bridge_session(
    State(state): State<AppState>,
    Json(req): Json<BridgeSessionRequest>,
) -> Result<Json<Value>, ApiError> {
    let info = state
        .session_backend
        .create_session(
            xp_sessions::CreateSessionRequest {
                working_dir: req.working_dir,
                bundle: req.bundle,
                description: req.description,
                created_by_app: "chat".into(),
            },
            None,
        )
        .await?;
    Ok(Json(json!(info)))
}

#[derive(Debug, Deserialize)]
pub struct BridgeExecuteRequest {
    pub session_id: String,
    pub prompt: String,
}

pub async fn bridge_execute(
    State(state): State<AppState>,
    Json(req): Json<BridgeExecuteRequest>,
) -> Result<Json<Value>, ApiError> {
    let response = state.session_backend.send_message(&req.session_id, &req.prompt).await?;
    Ok(Json(json!({"session_id": req.session_id, "response": response})))
}

// ── Memory stub ──────────────────────────────────────────────────────
//
// The memory provider itself is an out-of-scope collaborator; this keeps
// the route contract real (persisted for the life of the process, actually
// searchable) without inventing a storage subsystem the specification
// never describes.

#[derive(Debug, Clone)]
pub struct MemoryFact {
    pub content: String,
    pub remembered_at: u64,
}

#[derive(Debug, Clone)]
pub struct WorkLogEntry {
    pub note: String,
    pub logged_at: u64,
}

#[derive(Default)]
pub struct MemoryStore {
    facts: Vec<MemoryFact>,
    work_log: VecDeque<WorkLogEntry>,
}

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

#[derive(Debug, Deserialize)]
pub struct RememberRequest {
    pub content: String,
}

pub async fn remember(
    State(state): State<AppState>,
    Json(req): Json<RememberRequest>,
) -> Result<Json<Value>, ApiError> {
    if req.content.trim().is_empty() {
        return Err(validation("content must not be empty"));
    }
    state.memory.lock().facts.push(MemoryFact { content: req.content, remembered_at: now_unix() });
    Ok(Json(json!({"ok": true})))
}

#[derive(Debug, Deserialize)]
pub struct RecallQuery {
    pub q: String,
}

pub async fn recall(State(state): State<AppState>, Query(q): Query<RecallQuery>) -> Json<Value> {
    let needle = q.q.to_lowercase();
    let results: Vec<Value> = state
        .memory
        .lock()
        .facts
        .iter()
        .filter(|f| f.content.to_lowercase().contains(&needle))
        .map(|f| json!({"content": f.content, "remembered_at": f.remembered_at}))
        .collect();
    Json(json!({"results": results}))
}

pub async fn work_status(State(state): State<AppState>) -> Json<Value> {
    let store = state.memory.lock();
    let last = store.work_log.back().map(|e| json!({"note": e.note, "logged_at": e.logged_at}));
    Json(json!({
        "status": if store.work_log.is_empty() { "idle" } else { "active" },
        "last_entry": last,
    }))
}

#[derive(Debug, Deserialize)]
pub struct WorkLogRequest {
    pub note: String,
}

pub async fn work_log(
    State(state): State<AppState>,
    Json(req): Json<WorkLogRequest>,
) -> Result<Json<Value>, ApiError> {
    if req.note.trim().is_empty() {
        return Err(validation("note must not be empty"));
    }
    let mut store = state.memory.lock();
    if store.work_log.len() >= WORK_LOG_CAPACITY {
        store.work_log.pop_front();
    }
    store.work_log.push_back(WorkLogEntry { note: req.note, logged_at: now_unix() });
    Ok(Json(json!({"ok": true})))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_recall_is_case_insensitive_substring() {
        let mut store = MemoryStore::default();
        store.facts.push(MemoryFact { content: "User prefers dark mode".into(), remembered_at: 1 });
        let hits: Vec<_> = store.facts.iter().filter(|f| f.content.to_lowercase().contains("dark")).collect();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn work_log_caps_at_capacity() {
        let mut store = MemoryStore::default();
        for i in 0..(WORK_LOG_CAPACITY + 10) {
            if store.work_log.len() >= WORK_LOG_CAPACITY {
                store.work_log.pop_front();
            }
            store.work_log.push_back(WorkLogEntry { note: format!("n{i}"), logged_at: 0 });
        }
        assert_eq!(store.work_log.len(), WORK_LOG_CAPACITY);
        assert_eq!(store.work_log.back().unwrap().note, format!("n{}", WORK_LOG_CAPACITY + 9));
    }
}

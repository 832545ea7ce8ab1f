//! Shared application state passed to every API handler.
//!
//! Grounded on the teacher's `gateway/src/state.rs` grouped-`Arc`,
//! `#[derive(Clone)]` `AppState` pattern, trimmed to the services this
//! system actually owns: the session backend, the voice transcript store
//! and connection registry, session discovery, and the startup-computed
//! auth hash.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use xp_domain::config::Config;
use xp_sessions::SessionBackend;
use xp_voice::{Discovery, TranscriptStore, VoiceConfig, VoiceConnection};

use crate::api::core::MemoryStore;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub session_backend: Arc<dyn SessionBackend>,
    pub transcript_store: Arc<TranscriptStore>,
    pub discovery: Arc<Discovery>,
    pub voice_config: Arc<VoiceConfig>,
    pub http_client: reqwest::Client,

    /// Live voice connections keyed by `session_id`, created by
    /// `POST /apps/voice/sessions` and torn down when the SSE consumer
    /// disconnects or the session ends.
    pub voice_connections: Arc<Mutex<HashMap<String, Arc<VoiceConnection>>>>,

    pub runtime_home: PathBuf,

    /// SHA-256 hash of the API bearer token, read once at startup.
    /// `None` = dev mode (no auth enforced).
    pub api_token_hash: Option<Vec<u8>>,

    /// Thin in-process store backing `/api/memory/*`; the memory provider
    /// itself is an out-of-scope collaborator.
    pub memory: Arc<Mutex<MemoryStore>>,

    /// Sessions for which `pause_replies` has been requested via
    /// `/apps/voice/tools/execute`; `delegate` calls are refused while a
    /// session id is a member.
    pub paused_sessions: Arc<Mutex<HashSet<String>>>,
}

impl AppState {
    /// Register a newly-created voice connection so later `/sessions/{id}/*`
    /// and `/events` calls can find it.
    pub fn insert_voice_connection(&self, session_id: String, connection: Arc<VoiceConnection>) {
        self.voice_connections.lock().insert(session_id, connection);
    }

    pub fn get_voice_connection(&self, session_id: &str) -> Option<Arc<VoiceConnection>> {
        self.voice_connections.lock().get(session_id).cloned()
    }

    pub fn remove_voice_connection(&self, session_id: &str) -> Option<Arc<VoiceConnection>> {
        self.voice_connections.lock().remove(session_id)
    }

    pub fn is_paused(&self, session_id: &str) -> bool {
        self.paused_sessions.lock().contains(session_id)
    }
}

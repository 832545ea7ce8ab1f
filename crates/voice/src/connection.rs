//! Voice Connection: owns one bounded event queue wired to one Runtime
//! session for the lifetime of one voice session, with hook-cleanup
//! discipline enforced on every exit path.
//!
//! Grounded on the teacher's node WebSocket registry (register-on-connect,
//! unconditional cleanup-on-exit) and `original_source/.../voice/
//! connection.py` for the create/teardown/end/cancel lifecycle this
//! generalizes.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{info, warn};

use xp_domain::hooks::{EventSink, HookGuardSet};
use xp_domain::{Error, Result};
use xp_sessions::{CancelLevel, CreateSessionRequest, SessionBackend};

use crate::streaming_hook::BoundedEventQueue;
use crate::transcript::{ConversationStatus, TranscriptStore};

/// One live voice session: the backend handle it rides on, the event
/// queue consumers drain, and the transcript store it writes through.
pub struct VoiceConnection {
    backend: Arc<dyn SessionBackend>,
    transcript: Arc<TranscriptStore>,
    runtime_home: PathBuf,
    session_id: Mutex<Option<String>>,
    working_dir: Mutex<Option<String>>,
    queue: Mutex<Arc<BoundedEventQueue>>,
    hooks: Mutex<HookGuardSet>,
}

impl VoiceConnection {
    pub fn new(backend: Arc<dyn SessionBackend>, transcript: Arc<TranscriptStore>, runtime_home: PathBuf) -> Self {
        Self {
            backend,
            transcript,
            runtime_home,
            session_id: Mutex::new(None),
            working_dir: Mutex::new(None),
            queue: Mutex::new(Arc::new(BoundedEventQueue::new())),
            hooks: Mutex::new(HookGuardSet::new()),
        }
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }

    pub fn queue(&self) -> Arc<BoundedEventQueue> {
        self.queue.lock().clone()
    }

    /// Create the backing Runtime session and the voice-side transcript
    /// layout. The backend's own hook wiring (event sink + approvals)
    /// happens inside `create_session`.
    pub async fn create(&self, workspace_root: &str) -> Result<String> {
        let queue = self.queue.lock().clone();
        let req = CreateSessionRequest {
            working_dir: workspace_root.to_owned(),
            bundle: None,
            description: "voice".into(),
            created_by_app: "voice".into(),
        };

        let sink: Arc<dyn EventSink> = queue.clone();
        let info = self.backend.create_session(req, Some(sink)).await?;
        queue.set_session_id(&info.session_id);
        *self.session_id.lock() = Some(info.session_id.clone());
        *self.working_dir.lock() = Some(workspace_root.to_owned());

        self.transcript
            .create_session(&info.session_id, workspace_root, Utc::now())?;

        info!(session_id = %info.session_id, "voice connection created");
        Ok(info.session_id)
    }

    /// Re-attach to an existing backend session after the SSE consumer
    /// reconnects: rewires a fresh event queue through
    /// `backend.resume_session`, which un-tombstones the session and
    /// repairs any orphaned runtime state.
    pub async fn resume(&self, session_id: &str, working_dir: &str) -> Result<()> {
        let queue = self.queue.lock().clone();
        queue.set_session_id(session_id);
        let sink: Arc<dyn EventSink> = queue;
        self.backend.resume_session(session_id, working_dir, Some(sink)).await?;
        *self.session_id.lock() = Some(session_id.to_owned());
        *self.working_dir.lock() = Some(working_dir.to_owned());
        if let Err(e) = self.transcript.set_status(session_id, ConversationStatus::Active, None) {
            warn!(session_id, error = %e, "failed to mark conversation active on resume");
        }
        info!(session_id, "voice connection resumed");
        Ok(())
    }

    /// Consumer-disconnect path: mark `disconnected`, release every hook
    /// unregister callable unconditionally, then swap in a fresh queue so
    /// a future reconnect starts with a clean bus.
    pub fn teardown(&self) {
        let Some(session_id) = self.session_id() else { return };
        if let Err(e) = self.transcript.set_status(&session_id, ConversationStatus::Disconnected, None) {
            warn!(session_id = %session_id, error = %e, "failed to mark conversation disconnected");
        }
        self.hooks.lock().release_all();
        *self.queue.lock() = Arc::new(BoundedEventQueue::new());
        info!(session_id = %session_id, "voice connection torn down");
    }

    /// Consumer-initiated end: ends the backend session, marks the
    /// conversation `ended` with `reason`, and always releases hooks.
    pub async fn end(&self, reason: &str) -> Result<()> {
        let Some(session_id) = self.session_id() else {
            return Ok(());
        };
        let result = self.backend.end_session(&session_id).await;
        self.transcript
            .set_status(&session_id, ConversationStatus::Ended, Some(reason.to_owned()))?;
        self.hooks.lock().release_all();
        info!(session_id = %session_id, reason, "voice connection ended");
        result
    }

    /// No-op if no session exists yet.
    pub async fn cancel(&self, immediate: bool) {
        let Some(session_id) = self.session_id() else { return };
        let level = if immediate { CancelLevel::Immediate } else { CancelLevel::Graceful };
        self.backend.cancel_session(&session_id, level).await;
    }

    /// Resolve `project_id` either from the Runtime's own reported value
    /// or, if absent, by scanning the runtime projects tree for a
    /// directory whose `sessions/<session_id>` exists.
    pub fn resolve_project_id(&self, session_id: &str, reported: Option<&str>) -> Result<String> {
        if let Some(id) = reported {
            return Ok(id.to_owned());
        }
        let projects_dir = self.runtime_home.join("projects");
        if !projects_dir.exists() {
            return Err(Error::UnknownSession(session_id.to_owned()));
        }
        for entry in std::fs::read_dir(&projects_dir)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let candidate = entry.path().join("sessions").join(session_id);
            if candidate.exists() {
                return Ok(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Err(Error::UnknownSession(session_id.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xp_sessions::MockBackend;

    fn connection(dir: &std::path::Path) -> VoiceConnection {
        let backend = Arc::new(MockBackend::new());
        let transcript = Arc::new(TranscriptStore::new(dir.join("voice"), dir.join("runtime")));
        VoiceConnection::new(backend, transcript, dir.join("runtime"))
    }

    #[tokio::test]
    async fn create_sets_session_id_and_writes_transcript_layout() {
        let dir = tempfile::tempdir().unwrap();
        let conn = connection(dir.path());
        let session_id = conn.create("/tmp/proj").await.unwrap();
        assert_eq!(conn.session_id(), Some(session_id.clone()));
        assert!(dir.path().join("voice").join(&session_id).join("conversation.json").exists());
    }

    #[tokio::test]
    async fn cancel_before_create_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let conn = connection(dir.path());
        conn.cancel(false).await;
    }

    #[tokio::test]
    async fn teardown_swaps_in_a_fresh_queue() {
        let dir = tempfile::tempdir().unwrap();
        let conn = connection(dir.path());
        conn.create("/tmp/proj").await.unwrap();
        let before = conn.queue();
        conn.teardown();
        let after = conn.queue();
        assert!(!Arc::ptr_eq(&before, &after));
    }

    #[tokio::test]
    async fn end_marks_conversation_ended_with_reason() {
        let dir = tempfile::tempdir().unwrap();
        let conn = connection(dir.path());
        let session_id = conn.create("/tmp/proj").await.unwrap();
        conn.end("user_hangup").await.unwrap();

        let raw = std::fs::read_to_string(
            dir.path().join("voice").join(&session_id).join("conversation.json"),
        )
        .unwrap();
        assert!(raw.contains("\"ended\""));
        assert!(raw.contains("user_hangup"));
    }

    #[tokio::test]
    async fn resume_rewires_session_id_and_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let conn = connection(dir.path());
        let session_id = conn.create("/tmp/proj").await.unwrap();
        conn.teardown();
        conn.resume(&session_id, "/tmp/proj").await.unwrap();
        assert_eq!(conn.session_id(), Some(session_id));
    }

    #[test]
    fn resolve_project_id_prefers_reported_value() {
        let dir = tempfile::tempdir().unwrap();
        let conn = connection(dir.path());
        assert_eq!(conn.resolve_project_id("s1", Some("proj-a")).unwrap(), "proj-a");
    }

    #[test]
    fn resolve_project_id_falls_back_to_filesystem_scan() {
        let dir = tempfile::tempdir().unwrap();
        let conn = connection(dir.path());
        std::fs::create_dir_all(dir.path().join("runtime/projects/-tmp-proj/sessions/s1")).unwrap();
        assert_eq!(conn.resolve_project_id("s1", None).unwrap(), "-tmp-proj");
    }
}

//! The real session backend: the set of live sessions, per-session FIFO
//! queues, reconnect-from-disk, tombstoning, and graceful shutdown.
//!
//! Grounded on the teacher's `gateway/src/runtime` session orchestration
//! (a `DashMap`-equivalent session table plus a `CancelMap`/`ApprovalStore`
//! pair driving a coordinator), restructured around the `Handle`/worker
//! model this crate defines and the reconnect protocol this system adds on
//! top (the teacher has no crash-reconnect path of its own). The session
//! table here already keys each `Handle` (and its `CancelToken`) by
//! `session_id`, so the teacher's separate `CancelMap` registry isn't
//! carried — it would just duplicate this map.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{info, warn};

use xp_domain::hooks::{EventSink, HookGuard, HookGuardSet};
use xp_domain::trace::TraceEvent;
use xp_domain::{Error, Result};

use crate::approval::ApprovalStore;
use crate::cancel::CancelToken;
use crate::handle::Handle;
use crate::reconnect::{has_leading_system_message, load_transcript, repair_orphaned_tool_calls};
use crate::runtime::Runtime;
use crate::types::{ApprovalChoice, CancelLevel, CreateSessionRequest, SessionInfo};

/// The contract both `RealBackend` and `MockBackend` satisfy.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    async fn create_session(
        &self,
        req: CreateSessionRequest,
        event_sink: Option<Arc<dyn EventSink>>,
    ) -> Result<SessionInfo>;

    async fn send_message(&self, session_id: &str, message: &str) -> Result<String>;

    async fn cancel_session(&self, session_id: &str, level: CancelLevel) -> bool;

    fn resolve_approval(&self, session_id: &str, request_id: &str, choice: ApprovalChoice) -> bool;

    async fn resume_session(
        &self,
        session_id: &str,
        working_dir: &str,
        event_sink: Option<Arc<dyn EventSink>>,
    ) -> Result<SessionInfo>;

    async fn end_session(&self, session_id: &str) -> Result<()>;

    fn get_session_info(&self, session_id: &str) -> Option<SessionInfo>;

    fn list_active_sessions(&self) -> Vec<SessionInfo>;

    async fn stop(&self);
}

const WORKER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

struct Entry {
    handle: Handle,
    info: SessionInfo,
}

pub struct RealBackend {
    runtime: Arc<dyn Runtime>,
    runtime_home: PathBuf,
    sessions: RwLock<std::collections::HashMap<String, Entry>>,
    tombstones: RwLock<HashSet<String>>,
    reconnect_locks: tokio::sync::Mutex<HashSet<String>>,
}

impl RealBackend {
    pub fn new(runtime: Arc<dyn Runtime>, runtime_home: PathBuf) -> Self {
        Self {
            runtime,
            runtime_home,
            sessions: RwLock::new(std::collections::HashMap::new()),
            tombstones: RwLock::new(HashSet::new()),
            reconnect_locks: tokio::sync::Mutex::new(HashSet::new()),
        }
    }

    fn insert_handle(
        &self,
        runtime_session: crate::runtime::RuntimeSession,
        info: SessionInfo,
        event_sink: Option<Arc<dyn EventSink>>,
    ) {
        let session_id = info.session_id.clone();
        let cancel_token = CancelToken::new();
        let approvals = Arc::new(ApprovalStore::new());

        let mut hooks = HookGuardSet::new();
        if let Some(sink) = event_sink {
            hooks.push(self.runtime.register_event_sink(&runtime_session, sink));
        }
        hooks.push(self.runtime.register_approvals(&runtime_session, approvals.clone()));

        let worker_runtime = self.runtime.clone();
        let worker_session = runtime_session.clone();
        let handle = Handle::spawn(
            session_id.clone(),
            runtime_session,
            cancel_token,
            approvals,
            hooks,
            move |message| {
                let runtime = worker_runtime.clone();
                let session = worker_session.clone();
                async move { runtime.send_message(&session, &message).await }
            },
        );

        self.sessions
            .write()
            .insert(session_id, Entry { handle, info });
    }

    /// Reconnect path: scan the on-disk transcript,
    /// repair orphaned tool calls, ask the Runtime to resume, and install a
    /// fresh Handle. Serialized per session id via `reconnect_locks` so a
    /// storm of concurrent callers for the same dead session only pays the
    /// reconnect cost once.
    async fn reconnect(&self, session_id: &str, working_dir: &str) -> Result<()> {
        if self.tombstones.read().contains(session_id) {
            return Err(Error::UnknownSession(session_id.to_owned()));
        }

        {
            let mut locks = self.reconnect_locks.lock().await;
            if locks.contains(session_id) {
                drop(locks);
                while self.reconnect_locks.lock().await.contains(session_id) {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                return if self.sessions.read().contains_key(session_id) {
                    Ok(())
                } else {
                    Err(Error::UnknownSession(session_id.to_owned()))
                };
            }
            locks.insert(session_id.to_owned());
        }

        let result = self.do_reconnect(session_id, working_dir).await;
        self.reconnect_locks.lock().await.remove(session_id);
        result
    }

    async fn do_reconnect(&self, session_id: &str, working_dir: &str) -> Result<()> {
        let project_id = xp_domain::ids::project_id_from_path(working_dir);
        let transcript_path = self
            .runtime_home
            .join("projects")
            .join(&project_id)
            .join("sessions")
            .join(session_id)
            .join("transcript.jsonl");

        let messages = load_transcript(&transcript_path)?;
        let (mut messages, repaired) = repair_orphaned_tool_calls(messages);
        if repaired > 0 {
            warn!(session_id, repaired, "repaired orphaned tool calls on reconnect");
        }

        if !has_leading_system_message(&messages) {
            if let Some(system_message) = self.runtime.fresh_system_message(working_dir) {
                messages.insert(0, system_message);
            }
        }

        let runtime_session = self
            .runtime
            .create_resumed_session(session_id, working_dir, messages)
            .await?;

        let info = SessionInfo::new(session_id, working_dir);
        self.insert_handle(runtime_session, info, None);
        info!(session_id, "reconnected session from disk transcript");
        TraceEvent::SessionReconnected { session_id: session_id.to_owned(), orphaned_tool_calls_repaired: repaired }
            .emit();
        Ok(())
    }
}

#[async_trait]
impl SessionBackend for RealBackend {
    async fn create_session(
        &self,
        req: CreateSessionRequest,
        event_sink: Option<Arc<dyn EventSink>>,
    ) -> Result<SessionInfo> {
        let runtime_session = self.runtime.create_session(&req).await?;
        let session_id = runtime_session.session_id.clone();
        let project_id = runtime_session.project_id.clone().unwrap_or_default();
        let mut info = SessionInfo::new(&session_id, &req.working_dir);
        info.created_by_app = req.created_by_app.clone();
        info.description = req.description.clone();

        self.tombstones.write().remove(&session_id);
        self.insert_handle(runtime_session, info.clone(), event_sink);
        TraceEvent::SessionCreated {
            session_id: session_id.clone(),
            project_id,
            created_by_app: req.created_by_app,
        }
        .emit();
        Ok(info)
    }

    async fn send_message(&self, session_id: &str, message: &str) -> Result<String> {
        let working_dir = self.sessions.read().get(session_id).map(|e| e.info.working_dir.clone());

        let working_dir = match working_dir {
            Some(wd) => wd,
            None => {
                if self.tombstones.read().contains(session_id) {
                    return Err(Error::UnknownSession(session_id.to_owned()));
                }
                return Err(Error::UnknownSession(format!(
                    "{session_id} has no known working directory to reconnect from"
                )));
            }
        };

        if !self.sessions.read().contains_key(session_id) {
            self.reconnect(session_id, &working_dir).await?;
        }

        let sender = {
            let sessions = self.sessions.read();
            sessions.get(session_id).map(|e| e.handle.message_sender())
        };

        match sender {
            Some(sender) => sender.send(message.to_owned()).await,
            None => Err(Error::UnknownSession(session_id.to_owned())),
        }
    }

    async fn cancel_session(&self, session_id: &str, level: CancelLevel) -> bool {
        let sessions = self.sessions.read();
        match sessions.get(session_id) {
            Some(entry) => {
                entry.handle.cancel_token.cancel(level);
                self.runtime.cancel(&entry.handle.runtime_session, level);
                TraceEvent::CancelRequested {
                    session_id: session_id.to_owned(),
                    level: format!("{level:?}").to_lowercase(),
                }
                .emit();
                true
            }
            None => false,
        }
    }

    fn resolve_approval(&self, session_id: &str, request_id: &str, choice: ApprovalChoice) -> bool {
        let sessions = self.sessions.read();
        match sessions.get(session_id) {
            Some(entry) => entry.handle.approvals.resolve(session_id, request_id, choice),
            None => false,
        }
    }

    async fn resume_session(
        &self,
        session_id: &str,
        working_dir: &str,
        event_sink: Option<Arc<dyn EventSink>>,
    ) -> Result<SessionInfo> {
        if event_sink.is_some() {
            self.tombstones.write().remove(session_id);
        }

        if self.sessions.read().contains_key(session_id) {
            if let Some(sink) = event_sink {
                let sessions = self.sessions.read();
                let entry = sessions.get(session_id).unwrap();
                let guard = self.runtime.register_event_sink(&entry.handle.runtime_session, sink);
                entry.handle.push_hook(guard);
            }
            return self
                .get_session_info(session_id)
                .ok_or_else(|| Error::UnknownSession(session_id.to_owned()));
        }

        if self.tombstones.read().contains(session_id) {
            return Err(Error::UnknownSession(session_id.to_owned()));
        }

        self.reconnect(session_id, working_dir).await?;
        self.get_session_info(session_id)
            .ok_or_else(|| Error::UnknownSession(session_id.to_owned()))
    }

    async fn end_session(&self, session_id: &str) -> Result<()> {
        self.tombstones.write().insert(session_id.to_owned());
        TraceEvent::SessionTombstoned { session_id: session_id.to_owned() }.emit();

        let entry = self.sessions.write().remove(session_id);
        let Some(entry) = entry else {
            return Ok(());
        };

        entry.handle.approvals.clear_session(session_id);
        let drained_pending = entry.handle.pending_count();
        let shutdown = entry.handle.shutdown();
        if tokio::time::timeout(WORKER_DRAIN_TIMEOUT, shutdown).await.is_err() {
            warn!(session_id, "worker did not drain within bound, proceeding anyway");
        }
        info!(session_id, "session ended");
        TraceEvent::SessionEnded { session_id: session_id.to_owned(), drained_pending }.emit();
        Ok(())
    }

    fn get_session_info(&self, session_id: &str) -> Option<SessionInfo> {
        self.sessions.read().get(session_id).map(|e| e.info.clone())
    }

    fn list_active_sessions(&self) -> Vec<SessionInfo> {
        self.sessions.read().values().map(|e| e.info.clone()).collect()
    }

    async fn stop(&self) {
        let ids: Vec<String> = self.sessions.read().keys().cloned().collect();
        let shutdowns: Vec<_> = {
            let mut sessions = self.sessions.write();
            ids.iter()
                .filter_map(|id| sessions.remove(id))
                .map(|entry| entry.handle.shutdown())
                .collect()
        };
        let all = futures_util::future::join_all(shutdowns);
        if tokio::time::timeout(STOP_TIMEOUT, all).await.is_err() {
            warn!("not all session workers drained within the stop bound");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RuntimeSession;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoRuntime {
        calls: AtomicUsize,
        system_message: Option<crate::reconnect::TranscriptMessage>,
        resumed_messages: Arc<Mutex<Vec<crate::reconnect::TranscriptMessage>>>,
    }

    impl EchoRuntime {
        fn new() -> Self {
            Self { calls: AtomicUsize::new(0), system_message: None, resumed_messages: Arc::new(Mutex::new(Vec::new())) }
        }
    }

    #[async_trait]
    impl Runtime for EchoRuntime {
        async fn create_session(&self, req: &CreateSessionRequest) -> Result<RuntimeSession> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(RuntimeSession {
                session_id: format!("sess-{}", req.working_dir.len()),
                project_id: None,
            })
        }

        async fn create_resumed_session(
            &self,
            session_id: &str,
            _working_dir: &str,
            messages: Vec<crate::reconnect::TranscriptMessage>,
        ) -> Result<RuntimeSession> {
            *self.resumed_messages.lock() = messages;
            Ok(RuntimeSession { session_id: session_id.to_owned(), project_id: None })
        }

        fn fresh_system_message(&self, _working_dir: &str) -> Option<crate::reconnect::TranscriptMessage> {
            self.system_message.clone()
        }

        async fn send_message(&self, _session: &RuntimeSession, message: &str) -> Result<String> {
            Ok(format!("echo:{message}"))
        }

        fn cancel(&self, _session: &RuntimeSession, _level: CancelLevel) {}

        fn register_event_sink(&self, _session: &RuntimeSession, _sink: Arc<dyn EventSink>) -> HookGuard {
            HookGuard::noop()
        }

        fn register_approvals(&self, _session: &RuntimeSession, _approvals: Arc<ApprovalStore>) -> HookGuard {
            HookGuard::noop()
        }
    }

    fn backend() -> RealBackend {
        RealBackend::new(Arc::new(EchoRuntime::new()), PathBuf::from("/tmp/xp-test-runtime-home"))
    }

    fn req(working_dir: &str) -> CreateSessionRequest {
        CreateSessionRequest {
            working_dir: working_dir.to_owned(),
            bundle: None,
            description: "test".into(),
            created_by_app: "test".into(),
        }
    }

    #[tokio::test]
    async fn create_send_end_round_trip() {
        let backend = backend();
        let info = backend.create_session(req("/tmp/x"), None).await.unwrap();
        assert!(backend.list_active_sessions().iter().any(|s| s.session_id == info.session_id));

        let reply = backend.send_message(&info.session_id, "hello").await.unwrap();
        assert_eq!(reply, "echo:hello");

        backend.end_session(&info.session_id).await.unwrap();
        assert!(backend.list_active_sessions().is_empty());
    }

    #[tokio::test]
    async fn tombstone_blocks_resurrection_until_resume_with_sink() {
        let backend = backend();
        let info = backend.create_session(req("/tmp/y"), None).await.unwrap();
        backend.end_session(&info.session_id).await.unwrap();

        let err = backend.send_message(&info.session_id, "hi").await.unwrap_err();
        assert!(matches!(err, Error::UnknownSession(_)));
    }

    #[tokio::test]
    async fn cancel_unknown_session_returns_false() {
        let backend = backend();
        assert!(!backend.cancel_session("ghost", CancelLevel::Graceful).await);
    }

    #[tokio::test]
    async fn resolve_approval_unknown_session_returns_false() {
        let backend = backend();
        assert!(!backend.resolve_approval("ghost", "req", ApprovalChoice { option: "x".into() }));
    }

    #[tokio::test]
    async fn stop_drains_all_sessions() {
        let backend = backend();
        backend.create_session(req("/tmp/a"), None).await.unwrap();
        backend.create_session(req("/tmp/bb"), None).await.unwrap();
        assert_eq!(backend.list_active_sessions().len(), 2);
        backend.stop().await;
        assert!(backend.list_active_sessions().is_empty());
    }

    #[tokio::test]
    async fn reconnect_reprepends_system_message_when_transcript_has_none() {
        let dir = tempfile::tempdir().unwrap();
        let working_dir = "/tmp/reconnect-proj";
        let project_id = xp_domain::ids::project_id_from_path(working_dir);
        let session_dir = dir.path().join("projects").join(&project_id).join("sessions").join("sess-1");
        std::fs::create_dir_all(&session_dir).unwrap();
        std::fs::write(
            session_dir.join("transcript.jsonl"),
            "{\"role\":\"user\",\"content\":[{\"type\":\"text\",\"text\":\"hi\"}]}\n",
        )
        .unwrap();

        let system_message = crate::reconnect::TranscriptMessage {
            role: "system".into(),
            content: vec![crate::reconnect::ContentBlock::Text { text: "you are a bot".into() }],
        };
        let runtime = EchoRuntime { system_message: Some(system_message), ..EchoRuntime::new() };
        let resumed_messages = runtime.resumed_messages.clone();
        let backend = RealBackend::new(Arc::new(runtime), dir.path().to_path_buf());

        backend.resume_session("sess-1", working_dir, None).await.unwrap();

        let resumed = resumed_messages.lock().clone();
        assert_eq!(resumed.len(), 2);
        assert_eq!(resumed[0].role, "system");
        assert_eq!(resumed[1].role, "user");
    }

    #[tokio::test]
    async fn reconnect_leaves_existing_system_message_alone() {
        let dir = tempfile::tempdir().unwrap();
        let working_dir = "/tmp/reconnect-proj-2";
        let project_id = xp_domain::ids::project_id_from_path(working_dir);
        let session_dir = dir.path().join("projects").join(&project_id).join("sessions").join("sess-2");
        std::fs::create_dir_all(&session_dir).unwrap();
        std::fs::write(
            session_dir.join("transcript.jsonl"),
            "{\"role\":\"system\",\"content\":[{\"type\":\"text\",\"text\":\"original\"}]}\n\
             {\"role\":\"user\",\"content\":[{\"type\":\"text\",\"text\":\"hi\"}]}\n",
        )
        .unwrap();

        let fallback_system = crate::reconnect::TranscriptMessage {
            role: "system".into(),
            content: vec![crate::reconnect::ContentBlock::Text { text: "should not appear".into() }],
        };
        let runtime = EchoRuntime { system_message: Some(fallback_system), ..EchoRuntime::new() };
        let resumed_messages = runtime.resumed_messages.clone();
        let backend = RealBackend::new(Arc::new(runtime), dir.path().to_path_buf());

        backend.resume_session("sess-2", working_dir, None).await.unwrap();

        let resumed = resumed_messages.lock().clone();
        assert_eq!(resumed.len(), 2);
        match &resumed[0].content[0] {
            crate::reconnect::ContentBlock::Text { text } => assert_eq!(text, "original"),
            _ => panic!("expected text block"),
        }
    }
}

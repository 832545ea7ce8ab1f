//! Mock session backend for tests and simulator modes.
//!
//! Grounded on the teacher's in-memory test doubles for the runtime
//! orchestration layer; the call log shape mirrors the teacher's
//! `RecordedCall`-style assertions used throughout its own test suite.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use xp_domain::hooks::EventSink;
use xp_domain::{Error, Result};

use crate::backend::SessionBackend;
use crate::types::{ApprovalChoice, CancelLevel, CreateSessionRequest, RecordedCall, SessionInfo};

pub type ResponseFn = dyn Fn(&str) -> String + Send + Sync;

#[derive(Default)]
struct State {
    sessions: std::collections::HashMap<String, SessionInfo>,
    calls: Vec<RecordedCall>,
    next_id: usize,
}

pub struct MockBackend {
    state: RwLock<State>,
    respond: Option<Arc<ResponseFn>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            respond: None,
        }
    }

    /// Override the default `[Mock response to: <msg>]` behavior.
    pub fn with_response_fn(respond: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        Self {
            state: RwLock::new(State::default()),
            respond: Some(Arc::new(respond)),
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.read().calls.clone()
    }

    fn record(&self, method: &str, session_id: Option<&str>, argument: Option<&str>) {
        self.state.write().calls.push(RecordedCall {
            method: method.to_owned(),
            session_id: session_id.map(str::to_owned),
            argument: argument.map(str::to_owned),
        });
    }
}

#[async_trait]
impl SessionBackend for MockBackend {
    async fn create_session(
        &self,
        req: CreateSessionRequest,
        _event_sink: Option<Arc<dyn EventSink>>,
    ) -> Result<SessionInfo> {
        let session_id = {
            let mut state = self.state.write();
            state.next_id += 1;
            format!("mock-session-{}", state.next_id)
        };
        let mut info = SessionInfo::new(&session_id, &req.working_dir);
        info.created_by_app = req.created_by_app.clone();
        info.description = req.description.clone();

        self.state.write().sessions.insert(session_id.clone(), info.clone());
        self.record("create_session", Some(&session_id), Some(&req.working_dir));
        Ok(info)
    }

    async fn send_message(&self, session_id: &str, message: &str) -> Result<String> {
        let exists = self.state.read().sessions.contains_key(session_id);
        if !exists {
            self.record("send_message", Some(session_id), Some(message));
            return Err(Error::UnknownSession(session_id.to_owned()));
        }
        let reply = match &self.respond {
            Some(f) => f(message),
            None => format!("[Mock response to: {message}]"),
        };
        self.record("send_message", Some(session_id), Some(message));
        Ok(reply)
    }

    async fn cancel_session(&self, session_id: &str, level: CancelLevel) -> bool {
        self.record("cancel_session", Some(session_id), Some(level.as_str()));
        self.state.read().sessions.contains_key(session_id)
    }

    fn resolve_approval(&self, session_id: &str, request_id: &str, _choice: ApprovalChoice) -> bool {
        self.record("resolve_approval", Some(session_id), Some(request_id));
        self.state.read().sessions.contains_key(session_id)
    }

    async fn resume_session(
        &self,
        session_id: &str,
        working_dir: &str,
        _event_sink: Option<Arc<dyn EventSink>>,
    ) -> Result<SessionInfo> {
        self.record("resume_session", Some(session_id), Some(working_dir));
        let mut state = self.state.write();
        let info = state
            .sessions
            .entry(session_id.to_owned())
            .or_insert_with(|| SessionInfo::new(session_id, working_dir))
            .clone();
        Ok(info)
    }

    async fn end_session(&self, session_id: &str) -> Result<()> {
        self.state.write().sessions.remove(session_id);
        self.record("end_session", Some(session_id), None);
        Ok(())
    }

    fn get_session_info(&self, session_id: &str) -> Option<SessionInfo> {
        self.state.read().sessions.get(session_id).cloned()
    }

    fn list_active_sessions(&self) -> Vec<SessionInfo> {
        self.state
            .read()
            .sessions
            .values()
            .filter(|s| s.is_active)
            .cloned()
            .collect()
    }

    async fn stop(&self) {
        self.record("stop", None, None);
        self.state.write().sessions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(working_dir: &str) -> CreateSessionRequest {
        CreateSessionRequest {
            working_dir: working_dir.to_owned(),
            bundle: None,
            description: "test".into(),
            created_by_app: "test".into(),
        }
    }

    #[tokio::test]
    async fn default_response_echoes_message() {
        let backend = MockBackend::new();
        let info = backend.create_session(req("/tmp/x"), None).await.unwrap();
        let reply = backend.send_message(&info.session_id, "hello").await.unwrap();
        assert_eq!(reply, "[Mock response to: hello]");
    }

    #[tokio::test]
    async fn call_log_records_method_order() {
        let backend = MockBackend::new();
        let info = backend.create_session(req("/tmp/x"), None).await.unwrap();
        backend.send_message(&info.session_id, "hello").await.unwrap();
        backend.end_session(&info.session_id).await.unwrap();

        let methods: Vec<_> = backend.calls().iter().map(|c| c.method.clone()).collect();
        assert_eq!(methods, vec!["create_session", "send_message", "end_session"]);
    }

    #[tokio::test]
    async fn custom_response_fn_overrides_default() {
        let backend = MockBackend::with_response_fn(|msg| format!("custom:{msg}"));
        let info = backend.create_session(req("/tmp/x"), None).await.unwrap();
        let reply = backend.send_message(&info.session_id, "hi").await.unwrap();
        assert_eq!(reply, "custom:hi");
    }

    #[tokio::test]
    async fn list_active_sessions_filters_on_is_active() {
        let backend = MockBackend::new();
        let info = backend.create_session(req("/tmp/x"), None).await.unwrap();
        assert_eq!(backend.list_active_sessions().len(), 1);
        backend.end_session(&info.session_id).await.unwrap();
        assert_eq!(backend.list_active_sessions().len(), 0);
    }

    #[tokio::test]
    async fn reconnect_cancel_and_approval_are_recorded_noops() {
        let backend = MockBackend::new();
        assert!(!backend.cancel_session("ghost", CancelLevel::Graceful).await);
        assert!(!backend.resolve_approval("ghost", "req-1", ApprovalChoice { option: "x".into() }));
        let calls = backend.calls();
        assert_eq!(calls.len(), 2);
    }
}

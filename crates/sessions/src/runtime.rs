//! The `Runtime` seam.
//!
//! The Runtime (LLM + tool executor, driven via its coordinator capability
//! bag) is explicitly out-of-scope collaborator per the specification
//! This trait is the boundary the Session Backend calls through; it
//! is deliberately thin because the specification does not describe the
//! Runtime's own behavior, only how the backend drives it.

use std::sync::Arc;

use async_trait::async_trait;
use xp_domain::hooks::{EventSink, HookGuard};
use xp_domain::Result;

use crate::approval::ApprovalStore;
use crate::reconnect::TranscriptMessage;
use crate::types::{CancelLevel, CreateSessionRequest};

/// A live Runtime-side session handle. Opaque beyond the fields the
/// backend needs for bookkeeping.
#[derive(Debug, Clone)]
pub struct RuntimeSession {
    pub session_id: String,
    /// `Some` when the Runtime can report its own project id; `None` means
    /// the caller (Voice Connection, in practice) must derive it by
    /// filesystem probing.
    pub project_id: Option<String>,
}

#[async_trait]
pub trait Runtime: Send + Sync {
    /// Create a fresh session. Propagates bundle load/prepare errors.
    async fn create_session(&self, req: &CreateSessionRequest) -> Result<RuntimeSession>;

    /// Reconnect path: create a session reusing the
    /// original id, `is_resumed=true`, with its context replaced by the
    /// loaded (and orphan-repaired) transcript.
    async fn create_resumed_session(
        &self,
        session_id: &str,
        working_dir: &str,
        messages: Vec<TranscriptMessage>,
    ) -> Result<RuntimeSession>;

    /// The system message a brand-new session for this working directory
    /// would start with. Used by the reconnect path to re-prepend an
    /// original system message when the on-disk transcript has none of its
    /// own (e.g. a crash before the first turn ever persisted one).
    fn fresh_system_message(&self, working_dir: &str) -> Option<TranscriptMessage>;

    /// Run one turn to completion; returns the final assistant text.
    async fn send_message(&self, session: &RuntimeSession, message: &str) -> Result<String>;

    /// Request cancellation of the in-flight turn, if any. Never raises.
    fn cancel(&self, session: &RuntimeSession, level: CancelLevel);

    /// Install the Streaming Hook's event sink on the coordinator. Returns
    /// a guard that unregisters it; the caller MUST release it on every
    /// exit path.
    fn register_event_sink(&self, session: &RuntimeSession, sink: Arc<dyn EventSink>) -> HookGuard;

    /// Install the `ApprovalSystem` capability. Same release discipline as
    /// `register_event_sink`.
    fn register_approvals(&self, session: &RuntimeSession, approvals: Arc<ApprovalStore>) -> HookGuard;
}

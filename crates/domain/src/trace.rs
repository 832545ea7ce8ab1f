use serde::Serialize;

/// Structured trace events emitted across the experience-server crates.
///
/// Each variant is a stable, tagged JSON schema independent of the free-text
/// log message next to it, so a log pipeline can key off `event` without
/// parsing prose.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    SessionCreated {
        session_id: String,
        project_id: String,
        created_by_app: String,
    },
    SessionReconnected {
        session_id: String,
        orphaned_tool_calls_repaired: usize,
    },
    SessionTombstoned {
        session_id: String,
    },
    SessionEnded {
        session_id: String,
        drained_pending: usize,
    },
    WorkerDrained {
        session_id: String,
        processed: usize,
    },
    EventDropped {
        session_id: String,
        queue_depth: usize,
    },
    HookCleanup {
        session_id: String,
        released: usize,
    },
    TitleEnriched {
        conversation_id: String,
        title: String,
    },
    ApprovalRequested {
        session_id: String,
        request_id: String,
    },
    ApprovalResolved {
        session_id: String,
        request_id: String,
        approved: bool,
    },
    CancelRequested {
        session_id: String,
        level: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "experience_event");
    }
}

//! Shared vocabulary for the Session Backend.

use serde::{Deserialize, Serialize};

use xp_domain::ids::project_id_from_path;

/// Tag describing which interface created a session.
pub type CreatedByApp = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CancelLevel {
    /// Send a cancel request to the coordinator; in-flight tool calls may
    /// complete.
    Graceful,
    /// Coordinator-specific stronger cancel.
    Immediate,
}

impl CancelLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            CancelLevel::Graceful => "graceful",
            CancelLevel::Immediate => "immediate",
        }
    }
}

/// A human (or API caller's) resolution of an approval gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalChoice {
    pub option: String,
}

/// Request to create a new session.
#[derive(Debug, Clone)]
pub struct CreateSessionRequest {
    pub working_dir: String,
    pub bundle: Option<String>,
    pub description: String,
    pub created_by_app: CreatedByApp,
}

/// Snapshot of session metadata returned by `create_session`,
/// `get_session_info`, and `list_active_sessions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub project_id: String,
    pub working_dir: String,
    pub is_active: bool,
    pub created_by_app: CreatedByApp,
    pub description: String,
}

impl SessionInfo {
    pub fn new(session_id: impl Into<String>, working_dir: impl Into<String>) -> Self {
        let working_dir = working_dir.into();
        let project_id = project_id_from_path(&working_dir);
        Self {
            session_id: session_id.into(),
            project_id,
            working_dir,
            is_active: true,
            created_by_app: String::new(),
            description: String::new(),
        }
    }
}

/// A single call recorded by `MockBackend`, for test assertions.
#[derive(Debug, Clone, Serialize)]
pub struct RecordedCall {
    pub method: String,
    pub session_id: Option<String>,
    pub argument: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_info_derives_project_id() {
        let info = SessionInfo::new("sess-1", "/home/user/proj");
        assert_eq!(info.project_id, "-home-user-proj");
        assert!(info.is_active);
    }

    #[test]
    fn cancel_level_as_str() {
        assert_eq!(CancelLevel::Graceful.as_str(), "graceful");
        assert_eq!(CancelLevel::Immediate.as_str(), "immediate");
    }
}

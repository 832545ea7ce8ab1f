//! Session discovery: scans the Runtime projects tree for sessions and
//! projects, independent of which interface created them.
//!
//! No direct teacher analogue; the directory-walking style follows the
//! teacher's `sessions/src/store.rs` conventions (mtime-ordered scans,
//! `metadata.json` as an optional enrichment source).

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use xp_domain::ids::path_from_project_id;
use xp_domain::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredSession {
    pub session_id: String,
    pub project_id: String,
    pub project_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub project_id: String,
    pub project_path: String,
    pub session_count: usize,
    pub most_recent_mtime: DateTime<Utc>,
}

pub struct Discovery {
    runtime_home: PathBuf,
}

impl Discovery {
    pub fn new(runtime_home: impl Into<PathBuf>) -> Self {
        Self { runtime_home: runtime_home.into() }
    }

    fn projects_dir(&self) -> PathBuf {
        self.runtime_home.join("projects")
    }

    /// Every `sessions/<id>` directory (or bare `<id>` directory when a
    /// project has no `sessions/` subdir) with a `transcript.jsonl`,
    /// skipping ids containing `_` (agent sub-sessions), ordered by the
    /// transcript's mtime descending.
    pub fn list_sessions(&self, limit: usize, project_filter: Option<&str>) -> Result<Vec<DiscoveredSession>> {
        let found = self.scan_sessions(project_filter)?;
        Ok(found.into_iter().take(limit).map(|(_, s)| s).collect())
    }

    /// Shared scan backing both `list_sessions` and `list_projects`,
    /// returning each session alongside its transcript mtime so project
    /// aggregation doesn't need a second directory walk.
    fn scan_sessions(&self, project_filter: Option<&str>) -> Result<Vec<(SystemTime, DiscoveredSession)>> {
        let mut found: Vec<(SystemTime, DiscoveredSession)> = Vec::new();

        let projects_dir = self.projects_dir();
        if !projects_dir.exists() {
            return Ok(Vec::new());
        }

        for project_entry in std::fs::read_dir(&projects_dir)? {
            let project_entry = project_entry?;
            if !project_entry.path().is_dir() {
                continue;
            }
            let project_id = project_entry.file_name().to_string_lossy().into_owned();
            if let Some(filter) = project_filter {
                if filter != project_id {
                    continue;
                }
            }
            let project_path = path_from_project_id(&project_id);

            let sessions_root = project_entry.path().join("sessions");
            let scan_root = if sessions_root.is_dir() { sessions_root } else { project_entry.path() };

            for session_entry in std::fs::read_dir(&scan_root)? {
                let session_entry = session_entry?;
                if !session_entry.path().is_dir() {
                    continue;
                }
                let session_id = session_entry.file_name().to_string_lossy().into_owned();
                if session_id.contains('_') {
                    continue;
                }
                let transcript = session_entry.path().join("transcript.jsonl");
                let Ok(meta) = std::fs::metadata(&transcript) else { continue };
                let Ok(mtime) = meta.modified() else { continue };

                let (name, description) = read_metadata_fields(&session_entry.path());
                found.push((
                    mtime,
                    DiscoveredSession {
                        session_id,
                        project_id: project_id.clone(),
                        project_path: project_path.clone(),
                        name,
                        description,
                    },
                ));
            }
        }

        found.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(found)
    }

    /// Aggregates session counts and most-recent transcript mtime per
    /// project.
    pub fn list_projects(&self) -> Result<Vec<ProjectSummary>> {
        let sessions = self.scan_sessions(None)?;
        let mut summaries: std::collections::HashMap<String, ProjectSummary> = std::collections::HashMap::new();
        for (mtime, session) in sessions {
            let mtime: DateTime<Utc> = mtime.into();
            summaries
                .entry(session.project_id.clone())
                .and_modify(|s| {
                    s.session_count += 1;
                    if mtime > s.most_recent_mtime {
                        s.most_recent_mtime = mtime;
                    }
                })
                .or_insert(ProjectSummary {
                    project_id: session.project_id.clone(),
                    project_path: session.project_path.clone(),
                    session_count: 1,
                    most_recent_mtime: mtime,
                });
        }
        Ok(summaries.into_values().collect())
    }

    pub fn get_session(&self, session_id: &str) -> Result<Option<DiscoveredSession>> {
        let sessions = self.list_sessions(usize::MAX, None)?;
        Ok(sessions.into_iter().find(|s| s.session_id == session_id))
    }
}

fn read_metadata_fields(session_dir: &Path) -> (Option<String>, Option<String>) {
    let metadata_path = session_dir.join("metadata.json");
    let Ok(raw) = std::fs::read_to_string(metadata_path) else {
        return (None, None);
    };
    let Ok(value): std::result::Result<Value, _> = serde_json::from_str(&raw) else {
        return (None, None);
    };
    let name = value.get("name").and_then(Value::as_str).map(str::to_owned);
    let description = value.get("description").and_then(Value::as_str).map(str::to_owned);
    (name, description)
}

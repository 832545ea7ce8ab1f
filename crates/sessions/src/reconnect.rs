//! Transcript loading and orphaned-tool-call repair for the reconnect path
//! on reconnect.
//!
//! Reads `<runtime-home>/projects/<project_id>/sessions/<session_id>/
//! transcript.jsonl`: one JSON message per line, `{"role": .., "content":
//! [..]}`, content blocks tagged `text` | `tool_use` | `tool_result` (the
//! Runtime's own wire format for a conversation; distinct from the richer
//! voice-side `TranscriptEntry` in `xp-voice`).

use std::path::Path;

use serde::{Deserialize, Serialize};
use xp_domain::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: serde_json::Value },
    ToolResult { tool_use_id: String, content: serde_json::Value },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptMessage {
    pub role: String,
    pub content: Vec<ContentBlock>,
}

/// Load a transcript file line-by-line, in file order. Missing file is not
/// an error — a reconnect before any turn ever ran is valid.
pub fn load_transcript(path: &Path) -> Result<Vec<TranscriptMessage>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(path)?;
    let mut out = Vec::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let msg: TranscriptMessage = serde_json::from_str(line)
            .map_err(|e| Error::Reconnect(format!("malformed transcript line: {e}")))?;
        out.push(msg);
    }
    Ok(out)
}

/// Append a synthetic `tool_result` content block for every `tool_use`
/// block with no matching `tool_result` anywhere later in the transcript,
/// so the Runtime's context is well-formed on resume.
///
/// Synthetic results are appended as a single trailing message with role
/// `tool`, one content block per orphan, in the order the orphans were
/// first seen. Returns the repaired transcript and the count repaired.
pub fn repair_orphaned_tool_calls(
    mut messages: Vec<TranscriptMessage>,
) -> (Vec<TranscriptMessage>, usize) {
    let mut used_ids = std::collections::HashSet::new();
    for msg in &messages {
        for block in &msg.content {
            if let ContentBlock::ToolResult { tool_use_id, .. } = block {
                used_ids.insert(tool_use_id.clone());
            }
        }
    }

    let mut orphans = Vec::new();
    for msg in &messages {
        for block in &msg.content {
            if let ContentBlock::ToolUse { id, .. } = block {
                if !used_ids.contains(id) {
                    orphans.push(id.clone());
                }
            }
        }
    }

    if orphans.is_empty() {
        return (messages, 0);
    }

    let count = orphans.len();
    let synthetic_blocks = orphans
        .into_iter()
        .map(|id| ContentBlock::ToolResult {
            tool_use_id: id,
            content: serde_json::json!("[interrupted: no result recorded before disconnect]"),
        })
        .collect();

    messages.push(TranscriptMessage {
        role: "tool".into(),
        content: synthetic_blocks,
    });

    (messages, count)
}

/// True if the first message is a `system` role message.
pub fn has_leading_system_message(messages: &[TranscriptMessage]) -> bool {
    messages.first().map(|m| m.role == "system").unwrap_or(false)
}

//! Voice-only approval policy: tool classification, spoken-prompt
//! templates, and the single-in-flight invariant.
//!
//! Grounded on `original_source/.../voice/approval.py`'s `SAFE_TOOLS`/
//! `DANGEROUS_TOOLS` classification and prompt templates, used when the
//! voice adapter itself decides whether to gate a tool call rather than
//! relying on the Runtime's own `ApprovalSystem` capability.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::oneshot;

const SAFE_TOOLS: &[&str] = &["read", "list", "search", "grep", "glob", "ls", "cat"];
const DANGEROUS_TOOLS: &[&str] = &["bash", "execute", "write", "delete", "git_push", "git_commit"];
const UNKNOWN_TOOL_KEYWORDS: &[&str] = &[
    "write", "delete", "push", "commit", "reset", "checkout", "patch", "move",
];

pub fn safe_tools() -> HashSet<&'static str> {
    SAFE_TOOLS.iter().copied().collect()
}

pub fn dangerous_tools() -> HashSet<&'static str> {
    DANGEROUS_TOOLS.iter().copied().collect()
}

/// Whether a tool call requires an approval prompt.
pub fn requires_approval(tool_name: &str) -> bool {
    if SAFE_TOOLS.contains(&tool_name) {
        return false;
    }
    if DANGEROUS_TOOLS.contains(&tool_name) {
        return true;
    }
    let lower = tool_name.to_lowercase();
    UNKNOWN_TOOL_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Render the spoken prompt for a tool call requiring approval. Classifies
/// by keyword containment on the lowercased tool name, matching real
/// dangerous-tool names like `write_file`/`delete_file` rather than only
/// the bare `write`/`delete` forms; `git_push`/`git_commit` are exact.
pub fn spoken_prompt(tool_name: &str, arguments: &serde_json::Value) -> String {
    let lower = tool_name.to_lowercase();
    match tool_name {
        "git_push" => "May I push to the remote repository?".to_owned(),
        "git_commit" => "May I create a git commit?".to_owned(),
        _ if lower.contains("bash") || lower.contains("execute") => {
            let command = arguments
                .get("command")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("");
            let snippet: String = command.chars().take(60).collect();
            format!("I need to run: {snippet}. Shall I proceed?")
        }
        _ if lower.contains("write") => {
            let path = arguments.get("path").and_then(serde_json::Value::as_str).unwrap_or("the file");
            format!("May I write to {path}?")
        }
        _ if lower.contains("delete") => {
            let path = arguments.get("path").and_then(serde_json::Value::as_str).unwrap_or("the file");
            format!("May I delete {path}?")
        }
        other => format!("May I use {other}?"),
    }
}

struct Pending {
    respond: oneshot::Sender<bool>,
}

/// Enforces the single-in-flight-approval invariant for one voice
/// connection. Sequential tool execution in the session worker means this
/// should never actually contend, so a violation is an assertion failure,
/// not a recoverable error.
#[derive(Default)]
pub struct VoiceApprovalGate {
    in_flight: AtomicBool,
    pending: parking_lot::Mutex<Option<Pending>>,
}

impl VoiceApprovalGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a prompt; panics if one is already in flight (the invariant
    /// this type exists to enforce).
    pub fn prompt(&self) -> oneshot::Receiver<bool> {
        let already = self.in_flight.swap(true, Ordering::AcqRel);
        assert!(!already, "voice approval gate: only one approval may be in flight at a time");
        let (tx, rx) = oneshot::channel();
        *self.pending.lock() = Some(Pending { respond: tx });
        rx
    }

    /// Resolve the in-flight prompt. Returns `true` if a waiter was woken.
    pub fn handle_response(&self, approved: bool) -> bool {
        let pending = self.pending.lock().take();
        self.in_flight.store(false, Ordering::Release);
        match pending {
            Some(p) => p.respond.send(approved).is_ok(),
            None => false,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn safe_tools_never_require_approval() {
        assert!(!requires_approval("read"));
        assert!(!requires_approval("grep"));
    }

    #[test]
    fn dangerous_tools_always_require_approval() {
        assert!(requires_approval("bash"));
        assert!(requires_approval("git_push"));
    }

    #[test]
    fn unknown_tool_requires_approval_on_keyword_match() {
        assert!(requires_approval("custom_write_tool"));
        assert!(requires_approval("do_commit_thing"));
    }

    #[test]
    fn unknown_tool_without_keyword_does_not_require_approval() {
        assert!(!requires_approval("fetch_weather"));
    }

    #[test]
    fn bash_prompt_truncates_to_60_chars() {
        let long_command = "a".repeat(100);
        let prompt = spoken_prompt("bash", &json!({"command": long_command}));
        assert!(prompt.starts_with("I need to run: "));
        assert!(prompt.contains("Shall I proceed?"));
    }

    #[test]
    fn write_and_delete_prompts_include_path() {
        assert_eq!(spoken_prompt("write", &json!({"path": "/tmp/x"})), "May I write to /tmp/x?");
        assert_eq!(spoken_prompt("delete", &json!({"path": "/tmp/x"})), "May I delete /tmp/x?");
    }

    #[test]
    fn real_dangerous_tool_names_match_by_keyword_not_exact_equality() {
        assert_eq!(spoken_prompt("write_file", &json!({"path": "/tmp/x"})), "May I write to /tmp/x?");
        assert_eq!(spoken_prompt("delete_file", &json!({"path": "/tmp/x"})), "May I delete /tmp/x?");
        assert!(spoken_prompt("run_bash_command", &json!({"command": "ls"})).starts_with("I need to run: "));
    }

    #[test]
    fn git_prompts_are_fixed_text() {
        assert_eq!(spoken_prompt("git_push", &json!({})), "May I push to the remote repository?");
        assert_eq!(spoken_prompt("git_commit", &json!({})), "May I create a git commit?");
    }

    #[test]
    fn fallback_prompt_names_the_tool() {
        assert_eq!(spoken_prompt("weird_tool", &json!({})), "May I use weird_tool?");
    }

    #[tokio::test]
    async fn approval_gate_round_trip() {
        let gate = VoiceApprovalGate::new();
        let rx = gate.prompt();
        assert!(gate.is_in_flight());
        assert!(gate.handle_response(true));
        assert!(rx.await.unwrap());
        assert!(!gate.is_in_flight());
    }

    #[test]
    #[should_panic(expected = "only one approval may be in flight")]
    fn second_concurrent_prompt_panics() {
        let gate = VoiceApprovalGate::new();
        let _rx = gate.prompt();
        let _rx2 = gate.prompt();
    }
}

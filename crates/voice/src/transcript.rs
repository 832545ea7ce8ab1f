//! Voice-side transcript store: `index.json`, `conversation.json`,
//! `transcript.jsonl`, plus the Runtime-transcript mirror written for
//! cross-interface visibility.
//!
//! Grounded on the teacher's `sessions/src/transcript.rs` for the
//! append/atomic-write mechanics (`.tmp` + rename, JSONL append), and on
//! `original_source/.../transcript/{models,repository}.py` for the exact
//! record schema, the title-enrichment rule, and the write-path invariant
//! that `add_entry` must not rewrite `index.json` outside that one case.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use xp_domain::ids::project_id_from_path;
use xp_domain::trace::TraceEvent;
use xp_domain::{Error, Result};

fn new_entry_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

const DEFAULT_TITLE_PREFIX: &str = "Voice session";
const TITLE_MAX_LEN: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Active,
    Disconnected,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    User,
    Assistant,
    ToolCall,
    ToolResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub id: String,
    pub conversation_id: String,
    pub kind: EntryKind,
    pub content: Value,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_duration_ms: Option<u64>,
}

impl TranscriptEntry {
    pub fn new(conversation_id: impl Into<String>, kind: EntryKind, content: Value, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: new_entry_id(),
            conversation_id: conversation_id.into(),
            kind,
            content,
            timestamp,
            item_id: None,
            tool_name: None,
            call_id: None,
            audio_duration_ms: None,
        }
    }
}

/// One entry in a conversation's disconnect/reconnect history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisconnectEvent {
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    pub reconnected: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConversation {
    pub id: String,
    pub title: String,
    pub status: ConversationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    pub tool_call_count: u32,
    pub reconnect_count: u32,
    pub disconnect_history: Vec<DisconnectEvent>,
}

impl VoiceConversation {
    pub fn new(id: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        let id = id.into();
        Self {
            title: format!("{DEFAULT_TITLE_PREFIX} {id}"),
            id,
            status: ConversationStatus::Active,
            created_at,
            updated_at: created_at,
            ended_at: None,
            end_reason: None,
            duration_seconds: None,
            tool_call_count: 0,
            reconnect_count: 0,
            disconnect_history: Vec::new(),
        }
    }

    fn has_default_title(&self) -> bool {
        self.title.starts_with(DEFAULT_TITLE_PREFIX)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRecord {
    pub id: String,
    pub title: String,
    pub status: ConversationStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<String>,
}

impl From<&VoiceConversation> for IndexRecord {
    fn from(c: &VoiceConversation) -> Self {
        Self {
            id: c.id.clone(),
            title: c.title.clone(),
            status: c.status,
            created_at: c.created_at,
            end_reason: c.end_reason.clone(),
        }
    }
}

/// Owns the voice-sessions root and the (separate) Runtime projects root
/// that the mirror is written under.
pub struct TranscriptStore {
    voice_root: PathBuf,
    runtime_home: PathBuf,
}

fn atomic_write(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

impl TranscriptStore {
    pub fn new(voice_root: impl Into<PathBuf>, runtime_home: impl Into<PathBuf>) -> Self {
        Self {
            voice_root: voice_root.into(),
            runtime_home: runtime_home.into(),
        }
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.voice_root.join(session_id)
    }

    fn index_path(&self) -> PathBuf {
        self.voice_root.join("index.json")
    }

    fn conversation_path(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("conversation.json")
    }

    fn transcript_path(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("transcript.jsonl")
    }

    fn read_index(&self) -> Result<Vec<IndexRecord>> {
        let path = self.index_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn write_index(&self, records: &[IndexRecord]) -> Result<()> {
        let body = serde_json::to_string_pretty(records)?;
        atomic_write(&self.index_path(), &body)
    }

    fn upsert_index(&self, conversation: &VoiceConversation) -> Result<()> {
        let mut records = self.read_index()?;
        let record = IndexRecord::from(conversation);
        match records.iter_mut().find(|r| r.id == conversation.id) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
        self.write_index(&records)
    }

    fn write_conversation(&self, conversation: &VoiceConversation) -> Result<()> {
        let body = serde_json::to_string_pretty(conversation)?;
        atomic_write(&self.conversation_path(&conversation.id), &body)
    }

    /// Create the on-disk layout for a brand-new voice session: the
    /// conversation document, an empty (touched) transcript file, the
    /// index entry, and the Runtime-side mirror (transcript + metadata).
    pub fn create_session(
        &self,
        session_id: &str,
        working_dir: &str,
        created_at: DateTime<Utc>,
    ) -> Result<VoiceConversation> {
        let conversation = VoiceConversation::new(session_id, created_at);
        std::fs::create_dir_all(self.session_dir(session_id))?;
        std::fs::write(self.transcript_path(session_id), b"")?;
        self.write_conversation(&conversation)?;
        self.upsert_index(&conversation)?;
        self.create_runtime_mirror(session_id, working_dir, &conversation)?;
        Ok(conversation)
    }

    fn create_runtime_mirror(
        &self,
        session_id: &str,
        working_dir: &str,
        conversation: &VoiceConversation,
    ) -> Result<()> {
        let project_id = project_id_from_path(working_dir);
        let session_dir = self
            .runtime_home
            .join("projects")
            .join(&project_id)
            .join("sessions")
            .join(session_id);
        std::fs::create_dir_all(&session_dir)?;
        std::fs::write(session_dir.join("transcript.jsonl"), b"")?;

        let metadata = json!({
            "session_id": session_id,
            "bundle": "voice",
            "name": conversation.title,
            "created": conversation.created_at,
            "model": "voice",
            "turn_count": 0,
        });
        atomic_write(&session_dir.join("metadata.json"), &serde_json::to_string_pretty(&metadata)?)
    }

    fn mirror_path(&self, session_id: &str, working_dir: &str) -> PathBuf {
        let project_id = project_id_from_path(working_dir);
        self.runtime_home
            .join("projects")
            .join(project_id)
            .join("sessions")
            .join(session_id)
            .join("transcript.jsonl")
    }

    /// Append one entry to the voice transcript and, for `user`/
    /// `assistant` entries only, mirror it to the Runtime transcript.
    /// Never rewrites `index.json` except via the one-shot title
    /// enrichment below.
    pub fn add_entry(&self, session_id: &str, working_dir: &str, entry: &TranscriptEntry) -> Result<()> {
        let line = serde_json::to_string(entry)?;
        append_line(&self.transcript_path(session_id), &line)?;

        if matches!(entry.kind, EntryKind::User | EntryKind::Assistant) {
            let role = if matches!(entry.kind, EntryKind::User) { "user" } else { "assistant" };
            let text = entry.content.as_str().unwrap_or_default();
            let mirrored = json!({
                "role": role,
                "content": [{"type": "text", "text": text}],
            });
            append_line(&self.mirror_path(session_id, working_dir), &mirrored.to_string())?;
        }

        self.record_activity(session_id, matches!(entry.kind, EntryKind::ToolCall))?;

        if matches!(entry.kind, EntryKind::User) {
            self.maybe_enrich_title(session_id, &entry.content)?;
        }
        Ok(())
    }

    /// Bumps `updated_at` (and `tool_call_count` for tool-call entries) on
    /// the conversation record. Separate from `maybe_enrich_title`'s own
    /// read/write since the two fire independently per entry.
    fn record_activity(&self, session_id: &str, is_tool_call: bool) -> Result<()> {
        let path = self.conversation_path(session_id);
        let raw = std::fs::read_to_string(&path)?;
        let mut conversation: VoiceConversation = serde_json::from_str(&raw)?;
        if is_tool_call {
            conversation.tool_call_count += 1;
        }
        conversation.updated_at = Utc::now();
        self.write_conversation(&conversation)?;
        self.upsert_index(&conversation)
    }

    fn maybe_enrich_title(&self, session_id: &str, content: &Value) -> Result<()> {
        let path = self.conversation_path(session_id);
        let raw = std::fs::read_to_string(&path)?;
        let mut conversation: VoiceConversation = serde_json::from_str(&raw)?;
        if !conversation.has_default_title() {
            return Ok(());
        }
        let Some(text) = content.as_str() else { return Ok(()) };
        conversation.title = derive_title(text);
        self.write_conversation(&conversation)?;
        self.upsert_index(&conversation)?;
        TraceEvent::TitleEnriched { conversation_id: session_id.to_owned(), title: conversation.title.clone() }
            .emit();
        Ok(())
    }

    /// Transitions conversation status, tracking the reconnect lifecycle
    /// along the way: a move into `Disconnected` appends a
    /// `DisconnectEvent`; a move from `Disconnected` back to `Active`
    /// marks that event reconnected and bumps `reconnect_count`; a move
    /// into `Ended` stamps `ended_at`/`duration_seconds`.
    pub fn set_status(&self, session_id: &str, status: ConversationStatus, end_reason: Option<String>) -> Result<()> {
        let path = self.conversation_path(session_id);
        let raw = std::fs::read_to_string(&path)?;
        let mut conversation: VoiceConversation = serde_json::from_str(&raw)?;
        let now = Utc::now();
        let previous_status = conversation.status;

        match status {
            ConversationStatus::Disconnected => {
                conversation.disconnect_history.push(DisconnectEvent {
                    timestamp: now,
                    reason: end_reason.clone().unwrap_or_else(|| "network_error".to_owned()),
                    reconnected: false,
                });
            }
            ConversationStatus::Active if previous_status == ConversationStatus::Disconnected => {
                if let Some(last) = conversation.disconnect_history.last_mut() {
                    last.reconnected = true;
                }
                conversation.reconnect_count += 1;
            }
            ConversationStatus::Ended => {
                conversation.ended_at = Some(now);
                conversation.duration_seconds =
                    Some((now - conversation.created_at).num_milliseconds() as f64 / 1000.0);
            }
            _ => {}
        }

        conversation.status = status;
        if end_reason.is_some() {
            conversation.end_reason = end_reason;
        }
        conversation.updated_at = now;
        self.write_conversation(&conversation)?;
        self.upsert_index(&conversation)
    }

    pub fn read_entries(&self, session_id: &str) -> Result<Vec<TranscriptEntry>> {
        let path = self.transcript_path(session_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(path)?;
        raw.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(Error::from))
            .collect()
    }

    /// Realtime-API item-schema projection of the voice transcript, used
    /// to prime a resumed voice session's context.
    pub fn get_resumption_context(&self, session_id: &str) -> Result<Vec<Value>> {
        let entries = self.read_entries(session_id)?;
        Ok(entries.iter().map(resumption_item).collect())
    }

    /// All known voice conversations, most-recently-created first, backing
    /// `GET /sessions` and `GET /sessions/stats`.
    pub fn list_conversations(&self) -> Result<Vec<IndexRecord>> {
        let mut records = self.read_index()?;
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    use std::io::Write;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")?;
    Ok(())
}

fn derive_title(text: &str) -> String {
    let words: Vec<&str> = text.split_whitespace().take(6).collect();
    let joined = words.join(" ");
    if joined.chars().count() > TITLE_MAX_LEN {
        let truncated: String = joined.chars().take(TITLE_MAX_LEN.saturating_sub(1)).collect();
        format!("{truncated}\u{2026}")
    } else {
        joined
    }
}

fn resumption_item(entry: &TranscriptEntry) -> Value {
    let text = entry.content.as_str().unwrap_or_default();
    match entry.kind {
        EntryKind::User => json!({
            "type": "message",
            "role": "user",
            "content": [{"type": "input_text", "text": text}],
        }),
        EntryKind::Assistant => json!({
            "type": "message",
            "role": "assistant",
            "content": [{"type": "output_text", "text": text}],
        }),
        EntryKind::ToolCall => json!({
            "type": "function_call",
            "name": entry.tool_name,
            "call_id": entry.call_id,
            "arguments": entry.content,
        }),
        EntryKind::ToolResult => json!({
            "type": "function_call_output",
            "call_id": entry.call_id,
            "output": entry.content,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, TranscriptStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = TranscriptStore::new(dir.path().join("voice"), dir.path().join("runtime"));
        (dir, store)
    }

    fn entry(kind: EntryKind, text: &str) -> TranscriptEntry {
        TranscriptEntry::new("sess-1", kind, json!(text), Utc::now())
    }

    #[test]
    fn create_session_writes_all_expected_files() {
        let (_dir, store) = store();
        store.create_session("sess-1", "/tmp/proj", Utc::now()).unwrap();

        assert!(store.index_path().exists());
        assert!(store.conversation_path("sess-1").exists());
        assert!(store.transcript_path("sess-1").exists());
        assert!(store.mirror_path("sess-1", "/tmp/proj").exists());

        let mirror_dir = store.mirror_path("sess-1", "/tmp/proj");
        let metadata_path = mirror_dir.parent().unwrap().join("metadata.json");
        assert!(metadata_path.exists());
    }

    #[test]
    fn user_and_assistant_entries_are_mirrored_tool_entries_are_not() {
        let (_dir, store) = store();
        store.create_session("sess-1", "/tmp/proj", Utc::now()).unwrap();

        store.add_entry("sess-1", "/tmp/proj", &entry(EntryKind::User, "hello there")).unwrap();
        store.add_entry("sess-1", "/tmp/proj", &entry(EntryKind::Assistant, "hi back")).unwrap();
        store
            .add_entry(
                "sess-1",
                "/tmp/proj",
                &TranscriptEntry {
                    tool_name: Some("bash".into()),
                    call_id: Some("c1".into()),
                    ..TranscriptEntry::new("sess-1", EntryKind::ToolCall, json!({"command": "ls"}), Utc::now())
                },
            )
            .unwrap();

        let mirrored = std::fs::read_to_string(store.mirror_path("sess-1", "/tmp/proj")).unwrap();
        assert_eq!(mirrored.lines().count(), 2);

        let full = store.read_entries("sess-1").unwrap();
        assert_eq!(full.len(), 3);
    }

    #[test]
    fn title_enrichment_happens_exactly_once() {
        let (_dir, store) = store();
        store.create_session("sess-1", "/tmp/proj", Utc::now()).unwrap();

        store
            .add_entry("sess-1", "/tmp/proj", &entry(EntryKind::User, "please build me a rocket ship now"))
            .unwrap();
        let raw = std::fs::read_to_string(store.conversation_path("sess-1")).unwrap();
        let conv: VoiceConversation = serde_json::from_str(&raw).unwrap();
        assert_eq!(conv.title, "please build me a rocket ship");

        store.add_entry("sess-1", "/tmp/proj", &entry(EntryKind::User, "second message")).unwrap();
        let raw2 = std::fs::read_to_string(store.conversation_path("sess-1")).unwrap();
        let conv2: VoiceConversation = serde_json::from_str(&raw2).unwrap();
        assert_eq!(conv2.title, conv.title);
    }

    #[test]
    fn long_first_message_title_is_truncated_with_ellipsis() {
        let (_dir, store) = store();
        store.create_session("sess-1", "/tmp/proj", Utc::now()).unwrap();
        store
            .add_entry(
                "sess-1",
                "/tmp/proj",
                &entry(EntryKind::User, "supercalifragilisticexpialidocious word2 word3 word4 word5 word6"),
            )
            .unwrap();
        let raw = std::fs::read_to_string(store.conversation_path("sess-1")).unwrap();
        let conv: VoiceConversation = serde_json::from_str(&raw).unwrap();
        assert!(conv.title.chars().count() <= TITLE_MAX_LEN);
        assert!(conv.title.ends_with('\u{2026}'));
    }

    #[test]
    fn resumption_context_projects_realtime_item_schema() {
        let (_dir, store) = store();
        store.create_session("sess-1", "/tmp/proj", Utc::now()).unwrap();
        store.add_entry("sess-1", "/tmp/proj", &entry(EntryKind::User, "hello")).unwrap();
        store.add_entry("sess-1", "/tmp/proj", &entry(EntryKind::Assistant, "hi")).unwrap();

        let items = store.get_resumption_context("sess-1").unwrap();
        assert_eq!(items[0]["type"], "message");
        assert_eq!(items[0]["role"], "user");
        assert_eq!(items[0]["content"][0]["type"], "input_text");
        assert_eq!(items[1]["role"], "assistant");
        assert_eq!(items[1]["content"][0]["type"], "output_text");
    }

    #[test]
    fn set_status_updates_conversation_and_index() {
        let (_dir, store) = store();
        store.create_session("sess-1", "/tmp/proj", Utc::now()).unwrap();
        store.set_status("sess-1", ConversationStatus::Ended, Some("user_hangup".into())).unwrap();

        let raw = std::fs::read_to_string(store.conversation_path("sess-1")).unwrap();
        let conv: VoiceConversation = serde_json::from_str(&raw).unwrap();
        assert_eq!(conv.status, ConversationStatus::Ended);
        assert_eq!(conv.end_reason.as_deref(), Some("user_hangup"));

        let index = store.read_index().unwrap();
        assert_eq!(index[0].status, ConversationStatus::Ended);
    }

    #[test]
    fn ending_a_conversation_stamps_ended_at_and_duration() {
        let (_dir, store) = store();
        let created_at = Utc::now() - chrono::Duration::seconds(30);
        store.create_session("sess-1", "/tmp/proj", created_at).unwrap();
        store.set_status("sess-1", ConversationStatus::Ended, Some("user_ended".into())).unwrap();

        let raw = std::fs::read_to_string(store.conversation_path("sess-1")).unwrap();
        let conv: VoiceConversation = serde_json::from_str(&raw).unwrap();
        assert!(conv.ended_at.is_some());
        assert!(conv.duration_seconds.unwrap() >= 30.0);
    }

    #[test]
    fn disconnect_then_reconnect_is_tracked_in_history_and_count() {
        let (_dir, store) = store();
        store.create_session("sess-1", "/tmp/proj", Utc::now()).unwrap();

        store.set_status("sess-1", ConversationStatus::Disconnected, Some("network_error".into())).unwrap();
        let raw = std::fs::read_to_string(store.conversation_path("sess-1")).unwrap();
        let conv: VoiceConversation = serde_json::from_str(&raw).unwrap();
        assert_eq!(conv.disconnect_history.len(), 1);
        assert!(!conv.disconnect_history[0].reconnected);
        assert_eq!(conv.reconnect_count, 0);

        store.set_status("sess-1", ConversationStatus::Active, None).unwrap();
        let raw2 = std::fs::read_to_string(store.conversation_path("sess-1")).unwrap();
        let conv2: VoiceConversation = serde_json::from_str(&raw2).unwrap();
        assert_eq!(conv2.disconnect_history.len(), 1);
        assert!(conv2.disconnect_history[0].reconnected);
        assert_eq!(conv2.reconnect_count, 1);
    }

    #[test]
    fn tool_call_entries_increment_tool_call_count() {
        let (_dir, store) = store();
        store.create_session("sess-1", "/tmp/proj", Utc::now()).unwrap();

        store
            .add_entry(
                "sess-1",
                "/tmp/proj",
                &TranscriptEntry {
                    tool_name: Some("bash".into()),
                    call_id: Some("c1".into()),
                    ..TranscriptEntry::new("sess-1", EntryKind::ToolCall, json!({"command": "ls"}), Utc::now())
                },
            )
            .unwrap();
        store
            .add_entry(
                "sess-1",
                "/tmp/proj",
                &TranscriptEntry {
                    call_id: Some("c1".into()),
                    ..TranscriptEntry::new("sess-1", EntryKind::ToolResult, json!("ok"), Utc::now())
                },
            )
            .unwrap();
        store.add_entry("sess-1", "/tmp/proj", &entry(EntryKind::User, "hi")).unwrap();

        let raw = std::fs::read_to_string(store.conversation_path("sess-1")).unwrap();
        let conv: VoiceConversation = serde_json::from_str(&raw).unwrap();
        assert_eq!(conv.tool_call_count, 1);
    }

    #[test]
    fn entries_carry_generated_id_and_conversation_id() {
        let e = TranscriptEntry::new("sess-1", EntryKind::User, json!("hi"), Utc::now());
        assert!(!e.id.is_empty());
        assert_eq!(e.conversation_id, "sess-1");

        let e2 = TranscriptEntry::new("sess-1", EntryKind::User, json!("hi"), Utc::now());
        assert_ne!(e.id, e2.id);
    }

    #[test]
    fn list_conversations_orders_newest_first() {
        let (_dir, store) = store();
        store.create_session("sess-older", "/tmp/proj", Utc::now() - chrono::Duration::seconds(60)).unwrap();
        store.create_session("sess-newer", "/tmp/proj", Utc::now()).unwrap();

        let listed = store.list_conversations().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, "sess-newer");
        assert_eq!(listed[1].id, "sess-older");
    }
}

//! Canonical Runtime event → wire-message mapping.
//!
//! Grounded on the bounded-queue, non-blocking-enqueue relay loop in the
//! teacher's node WebSocket bridge, with the canonical-to-wire table and
//! content-block index tracking taken from the original event-streaming
//! hook this system replaces.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::warn;

use xp_domain::hooks::EventSink;
use xp_domain::sanitize::sanitize;
use xp_domain::trace::TraceEvent;

/// In-progress `index -> block_type` map for one session's content-block
/// stream. `content_block:start` records a type; `content_block:delta`
/// looks it up; `content_block:end` removes it.
#[derive(Default)]
struct BlockTracker {
    types: HashMap<i64, String>,
}

/// Maps a canonical Runtime event name + payload to the wire message the
/// event queue carries, sanitizing and non-blocking-enqueueing it.
pub struct StreamingHook {
    sink: std::sync::Arc<dyn EventSink>,
    blocks: Mutex<BlockTracker>,
}

impl StreamingHook {
    pub fn new(sink: std::sync::Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            blocks: Mutex::new(BlockTracker::default()),
        }
    }

    /// Invoked once per canonical Runtime event. Always returns so the
    /// hook pipeline proceeds; never raises.
    pub fn on_event(&self, canonical: &str, payload: &Value) {
        let sanitized = sanitize(payload);
        let wire = match canonical {
            "content_block:start" => self.on_block_start(&sanitized),
            "content_block:delta" => self.on_block_delta(&sanitized),
            "content_block:end" => self.on_block_end(&sanitized),
            _ => map_canonical(canonical, &sanitized),
        };
        if let Some(message) = wire {
            self.sink.push(message);
        }
    }

    fn index_of(payload: &Value) -> Option<i64> {
        payload.get("index").and_then(Value::as_i64)
    }

    fn on_block_start(&self, payload: &Value) -> Option<Value> {
        let index = Self::index_of(payload)?;
        let block_type = payload
            .get("block_type")
            .or_else(|| payload.get("type"))
            .and_then(Value::as_str)
            .unwrap_or("text")
            .to_owned();
        self.blocks.lock().types.insert(index, block_type.clone());
        Some(json!({"type": "content_start", "index": index, "block_type": block_type}))
    }

    fn on_block_delta(&self, payload: &Value) -> Option<Value> {
        let index = Self::index_of(payload)?;
        let block_type = self.blocks.lock().types.get(&index).cloned();
        let delta = payload.get("delta");
        let text = match delta {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Object(_)) => delta
                .and_then(|d| d.get("text"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
            _ => String::new(),
        };
        Some(json!({
            "type": "content_delta",
            "index": index,
            "block_type": block_type,
            "text": text,
        }))
    }

    fn on_block_end(&self, payload: &Value) -> Option<Value> {
        let index = Self::index_of(payload)?;
        self.blocks.lock().types.remove(&index);
        Some(json!({"type": "content_end", "index": index}))
    }
}

/// The non-blocking, drop-on-full event queue backing one `EventSink`.
/// Bounded at exactly 10,000 per the queue-bounds invariant.
pub struct BoundedEventQueue {
    tx: tokio::sync::mpsc::Sender<Value>,
    rx: Mutex<Option<tokio::sync::mpsc::Receiver<Value>>>,
    session_id: Mutex<Option<String>>,
}

pub const QUEUE_CAPACITY: usize = 10_000;

impl BoundedEventQueue {
    pub fn new() -> Self {
        let (tx, rx) = tokio::sync::mpsc::channel(QUEUE_CAPACITY);
        Self { tx, rx: Mutex::new(Some(rx)), session_id: Mutex::new(None) }
    }

    /// Takes ownership of the receiving half; only the Voice Connection's
    /// SSE consumer loop should call this, exactly once per queue.
    pub fn take_receiver(&self) -> Option<tokio::sync::mpsc::Receiver<Value>> {
        self.rx.lock().take()
    }

    /// Associates this queue with the session it is relaying for, so a
    /// dropped-event trace can name the session. Set once the session id
    /// is known (a fresh queue is created before that, at connection time).
    pub fn set_session_id(&self, session_id: impl Into<String>) {
        *self.session_id.lock() = Some(session_id.into());
    }
}

impl Default for BoundedEventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for BoundedEventQueue {
    fn push(&self, message: Value) {
        if self.tx.try_send(message).is_err() {
            let session_id = self.session_id.lock().clone().unwrap_or_default();
            warn!(session_id, "event queue full, dropping event");
            TraceEvent::EventDropped { session_id, queue_depth: QUEUE_CAPACITY }.emit();
        }
    }
}

fn map_canonical(canonical: &str, payload: &Value) -> Option<Value> {
    let (wire_type, extra) = match canonical {
        "tool:pre" => (
            "tool_call",
            json!({
                "tool_name": payload.get("tool_name"),
                "tool_call_id": payload.get("tool_call_id"),
                "arguments": payload.get("arguments"),
                "status": "pending",
            }),
        ),
        "tool:post" => (
            "tool_result",
            json!({
                "tool_name": payload.get("tool_name"),
                "tool_call_id": payload.get("tool_call_id"),
                "output": payload.get("output"),
                "success": payload.get("success"),
                "error": payload.get("error"),
            }),
        ),
        "tool:error" => ("tool_error", payload.clone()),
        "thinking:delta" => ("thinking_delta", payload.clone()),
        "thinking:final" => ("thinking_final", payload.clone()),
        "session:fork" => (
            "session_fork",
            json!({
                "child_session_id": payload.get("child_session_id"),
                "agent": payload.get("agent"),
            }),
        ),
        "session:start" => ("session_start", payload.clone()),
        "session:end" => ("session_end", payload.clone()),
        "provider:request" | "llm:request" | "llm:request:raw" => {
            ("provider_request", json!({"event": canonical}))
        }
        "provider:response" | "llm:response" | "llm:response:raw" => {
            ("provider_response", json!({"event": canonical}))
        }
        "context:compaction" => ("context_compaction", payload.clone()),
        "user:notification" => ("display_message", payload.clone()),
        "cancel:requested" => (
            "cancel_requested",
            json!({
                "level": payload.get("level"),
                "running_tools": payload.get("running_tools"),
            }),
        ),
        "cancel:completed" => (
            "cancel_completed",
            json!({
                "level": payload.get("level"),
                "tools_cancelled": payload.get("tools_cancelled"),
            }),
        ),
        _ => {
            let derived = canonical.replace(':', "_").replace("_block", "");
            return Some(merge_type(&derived, payload));
        }
    };
    Some(merge_type(wire_type, &extra))
}

fn merge_type(wire_type: &str, extra: &Value) -> Value {
    let mut obj = extra.as_object().cloned().unwrap_or_default();
    obj.insert("type".to_owned(), Value::String(wire_type.to_owned()));
    Value::Object(obj)
}

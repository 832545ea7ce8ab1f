//! `ApprovalSystem` waiter store.
//!
//! Grounded on the teacher's `gateway/src/runtime/approval.rs`
//! (`oneshot::Sender` parked in a `RwLock<HashMap<..>>`), restructured to
//! nest per-session so multiple outstanding requests per session are
//! supported and keyed by `request_id`, as the spec requires ("Multiple
//! outstanding requests per session are permitted and must be keyed by
//! `request_id`").

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::oneshot;
use xp_domain::trace::TraceEvent;

use crate::types::ApprovalChoice;

/// Option strings treated as an affirmative choice for trace purposes.
/// The wire `options` set is caller-defined, so this is a best-effort
/// classification rather than an exhaustive contract.
const AFFIRMATIVE_OPTIONS: &[&str] = &["yes", "approve", "approved", "allow"];

struct Waiter {
    respond: oneshot::Sender<ApprovalChoice>,
}

/// Per-session table of outstanding approval waiters.
#[derive(Default)]
pub struct ApprovalStore {
    sessions: RwLock<HashMap<String, HashMap<String, Waiter>>>,
}

impl ApprovalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new outstanding request; returns the receiver the caller
    /// awaits for the resolution.
    pub fn register(
        &self,
        session_id: &str,
        request_id: &str,
    ) -> oneshot::Receiver<ApprovalChoice> {
        let (tx, rx) = oneshot::channel();
        self.sessions
            .write()
            .entry(session_id.to_owned())
            .or_default()
            .insert(request_id.to_owned(), Waiter { respond: tx });
        TraceEvent::ApprovalRequested { session_id: session_id.to_owned(), request_id: request_id.to_owned() }
            .emit();
        rx
    }

    /// `resolve_approval(session_id, request_id, choice)`. Returns
    /// `true` iff a waiter was found and woken. Synchronous; never blocks.
    pub fn resolve(&self, session_id: &str, request_id: &str, choice: ApprovalChoice) -> bool {
        let mut sessions = self.sessions.write();
        let Some(requests) = sessions.get_mut(session_id) else {
            return false;
        };
        let Some(waiter) = requests.remove(request_id) else {
            return false;
        };
        if requests.is_empty() {
            sessions.remove(session_id);
        }
        drop(sessions);
        let approved = AFFIRMATIVE_OPTIONS.contains(&choice.option.as_str());
        let woken = waiter.respond.send(choice).is_ok();
        TraceEvent::ApprovalResolved { session_id: session_id.to_owned(), request_id: request_id.to_owned(), approved }
            .emit();
        woken
    }

    /// Drop every outstanding waiter for a session without resolving them
    /// (used when a session ends with pending approvals — the dropped
    /// `oneshot::Sender` causes the awaiting receiver to observe a closed
    /// channel, which callers treat as "cancelled").
    pub fn clear_session(&self, session_id: &str) -> usize {
        self.sessions
            .write()
            .remove(session_id)
            .map(|m| m.len())
            .unwrap_or(0)
    }

    pub fn pending_count(&self, session_id: &str) -> usize {
        self.sessions
            .read()
            .get(session_id)
            .map(|m| m.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_wakes_the_correct_waiter() {
        let store = ApprovalStore::new();
        let rx = store.register("s1", "req-1");
        assert!(store.resolve("s1", "req-1", ApprovalChoice { option: "yes".into() }));
        let choice = rx.await.unwrap();
        assert_eq!(choice.option, "yes");
    }

    #[test]
    fn multiple_outstanding_requests_per_session() {
        let store = ApprovalStore::new();
        let _a = store.register("s1", "req-a");
        let _b = store.register("s1", "req-b");
        assert_eq!(store.pending_count("s1"), 2);
    }

    #[tokio::test]
    async fn resolve_only_wakes_matching_request_id() {
        let store = ApprovalStore::new();
        let rx_a = store.register("s1", "req-a");
        let _rx_b = store.register("s1", "req-b");
        store.resolve("s1", "req-a", ApprovalChoice { option: "ok".into() });
        assert_eq!(rx_a.await.unwrap().option, "ok");
        assert_eq!(store.pending_count("s1"), 1);
    }

    #[test]
    fn resolve_unknown_returns_false() {
        let store = ApprovalStore::new();
        assert!(!store.resolve("nope", "nope", ApprovalChoice { option: "x".into() }));
    }

    #[test]
    fn clear_session_drops_all_waiters() {
        let store = ApprovalStore::new();
        store.register("s1", "req-a");
        store.register("s1", "req-b");
        assert_eq!(store.clear_session("s1"), 2);
        assert_eq!(store.pending_count("s1"), 0);
    }
}

//! Hook lifecycle primitives shared by the Session Backend and the Voice
//! Connection.
//!
//! The Runtime's coordinator exposes a register/unregister pattern for
//! hooks (event sinks, approval gates). The original system had no
//! unregister callable wired through — this crate makes one a first-class,
//! always-releasable value so every call site can keep hook registrations
//! balanced mechanically rather than by convention.

use serde_json::Value;

/// A sink that a Runtime coordinator pushes canonical events/display
/// messages/approval requests into. Implemented by the Streaming Hook's
/// queue-backed adapter; consumed by anything the `Runtime` trait needs to
/// forward events to.
pub trait EventSink: Send + Sync {
    /// Non-blocking push. Implementations MUST NOT block; on a full bounded
    /// queue they drop the event and log at warn.
    fn push(&self, message: Value);
}

/// An owned, exactly-once-releasable hook unregistration. Dropping it
/// without calling `release` is intentionally still safe (the registration
/// is a no-op until released) but callers on every exit path (success,
/// error, cancellation) should call `release` explicitly so cleanup
/// happens at a predictable point rather than at an arbitrary drop.
pub struct HookGuard {
    unregister: Option<Box<dyn FnOnce() + Send>>,
}

impl HookGuard {
    pub fn new(unregister: impl FnOnce() + Send + 'static) -> Self {
        Self {
            unregister: Some(Box::new(unregister)),
        }
    }

    /// A guard whose release is a no-op (nothing was actually registered).
    pub fn noop() -> Self {
        Self { unregister: None }
    }

    /// Release the hook. Idempotent: calling it twice (or calling it after
    /// `noop()`) is a safe no-op.
    pub fn release(&mut self) {
        if let Some(f) = self.unregister.take() {
            f();
        }
    }
}

impl Drop for HookGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// A set of hook guards released together, e.g. the event-sink hook and the
/// approval-capability hook registered at the same `create_session` call.
#[derive(Default)]
pub struct HookGuardSet {
    guards: Vec<HookGuard>,
}

impl HookGuardSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, guard: HookGuard) {
        self.guards.push(guard);
    }

    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }

    /// Release every guard, in registration order. Always runs to
    /// completion even if an individual unregister panics is NOT guaranteed
    /// (Rust has no catch-unwind-by-default here); guards are expected to
    /// be simple, infallible bookkeeping removals.
    pub fn release_all(&mut self) -> usize {
        let n = self.guards.len();
        for mut guard in self.guards.drain(..) {
            guard.release();
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn release_invokes_closure_exactly_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let mut guard = HookGuard::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        guard.release();
        guard.release();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_releases_automatically() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        {
            let _guard = HookGuard::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn noop_guard_release_is_safe() {
        let mut guard = HookGuard::noop();
        guard.release();
    }

    #[test]
    fn guard_set_releases_all_in_order() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut set = HookGuardSet::new();
        for i in 0..3 {
            let order = order.clone();
            set.push(HookGuard::new(move || order.lock().push(i)));
        }
        assert_eq!(set.release_all(), 3);
        assert_eq!(*order.lock(), vec![0, 1, 2]);
        assert!(set.is_empty());
    }
}

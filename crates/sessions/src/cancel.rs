//! Per-session cancellation tokens.
//!
//! Grounded on the teacher's `gateway/src/runtime/cancel.rs` (`AtomicBool`
//! token), extended with the two-level `graceful`/`immediate` distinction
//! this spec requires and the teacher's boolean token does not model. The
//! teacher also keeps a `CancelMap` registry alongside its token; this
//! backend already indexes by `session_id` in its own session table
//! (`RealBackend::sessions`, one `CancelToken` per `Handle`), so a second
//! id-keyed registry would just duplicate that map.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::types::CancelLevel;

/// A cancellation token checked by the worker loop at each suspension
/// point. `graceful` is set on any `cancel_session` call; `immediate` is
/// only set when the caller explicitly requests the stronger level.
#[derive(Clone)]
pub struct CancelToken {
    graceful: Arc<AtomicBool>,
    immediate: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            graceful: Arc::new(AtomicBool::new(false)),
            immediate: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self, level: CancelLevel) {
        self.graceful.store(true, Ordering::Release);
        if level == CancelLevel::Immediate {
            self.immediate.store(true, Ordering::Release);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.graceful.load(Ordering::Acquire)
    }

    pub fn is_immediate(&self) -> bool {
        self.immediate.load(Ordering::Acquire)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

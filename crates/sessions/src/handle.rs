//! Per-session bookkeeping: the FIFO work queue, its dedicated worker task,
//! and the resources that must be released together when a session ends.
//!
//! Grounded on the teacher's `SessionLockMap` (semaphore-gated serialization
//! per session id), restructured around an `mpsc` queue + one worker task
//! per session rather than a semaphore, since the spec's worker protocol
//! requires strict FIFO ordering of queued work items, not just mutual
//! exclusion.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use xp_domain::hooks::{HookGuard, HookGuardSet};
use xp_domain::trace::TraceEvent;
use xp_domain::Result;

use crate::approval::ApprovalStore;
use crate::cancel::CancelToken;
use crate::runtime::RuntimeSession;

/// One unit of work a session's worker processes, in FIFO order.
pub enum WorkItem {
    SendMessage {
        message: String,
        reply: oneshot::Sender<Result<String>>,
    },
}

/// A cloneable handle for enqueuing messages onto a session's worker,
/// independent of the `Handle` it was obtained from.
#[derive(Clone)]
pub struct MessageSender {
    session_id: String,
    queue: mpsc::Sender<WorkItem>,
    pending: Arc<AtomicUsize>,
}

impl MessageSender {
    pub async fn send(&self, message: String) -> Result<String> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.fetch_add(1, Ordering::AcqRel);
        if self.queue.send(WorkItem::SendMessage { message, reply: reply_tx }).await.is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            return Err(xp_domain::Error::UnknownSession(self.session_id.clone()));
        }
        reply_rx
            .await
            .map_err(|_| xp_domain::Error::Other("worker dropped reply channel".into()))?
    }
}

/// A live session's handle: the queue its worker drains, the resources
/// that belong to its lifetime, and the join handle used to await a clean
/// shutdown.
pub struct Handle {
    pub session_id: String,
    pub runtime_session: RuntimeSession,
    pub cancel_token: CancelToken,
    pub approvals: Arc<ApprovalStore>,
    queue: mpsc::Sender<WorkItem>,
    worker: Option<JoinHandle<()>>,
    stopped: Arc<AtomicBool>,
    hooks: parking_lot::Mutex<HookGuardSet>,
    pending: Arc<AtomicUsize>,
}

impl Handle {
    /// Spawn the worker task and return the handle. `run_one` is called
    /// once per queued `SendMessage`, in submission order; the worker
    /// exits as soon as the queue is closed and drained.
    pub fn spawn<F, Fut>(
        session_id: String,
        runtime_session: RuntimeSession,
        cancel_token: CancelToken,
        approvals: Arc<ApprovalStore>,
        hooks: HookGuardSet,
        run_one: F,
    ) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<String>> + Send,
    {
        let (tx, mut rx) = mpsc::channel::<WorkItem>(64);
        let stopped = Arc::new(AtomicBool::new(false));
        let worker_stopped = stopped.clone();
        let worker_session_id = session_id.clone();
        let pending = Arc::new(AtomicUsize::new(0));
        let worker_pending = pending.clone();

        let worker = tokio::spawn(async move {
            let mut processed = 0usize;
            while let Some(item) = rx.recv().await {
                match item {
                    WorkItem::SendMessage { message, reply } => {
                        debug!(session_id = %worker_session_id, "processing queued turn");
                        let result = run_one(message).await;
                        processed += 1;
                        worker_pending.fetch_sub(1, Ordering::AcqRel);
                        if reply.send(result).is_err() {
                            warn!(session_id = %worker_session_id, "caller dropped before turn completed");
                        }
                    }
                }
            }
            worker_stopped.store(true, Ordering::Release);
            TraceEvent::WorkerDrained { session_id: worker_session_id, processed }.emit();
        });

        Self {
            session_id,
            runtime_session,
            cancel_token,
            approvals,
            queue: tx,
            worker: Some(worker),
            stopped,
            hooks: parking_lot::Mutex::new(hooks),
            pending,
        }
    }

    /// Add another hook guard to be released alongside the rest at
    /// shutdown, e.g. when `resume_session` re-wires a fresh event sink
    /// onto an already-live session.
    pub fn push_hook(&self, guard: HookGuard) {
        self.hooks.lock().push(guard);
    }

    /// Enqueue a turn and await its result. Errors if the worker has
    /// already shut down (session ended concurrently).
    pub async fn send_message(&self, message: String) -> Result<String> {
        self.message_sender().send(message).await
    }

    /// A cloneable, lock-free handle for enqueuing messages, usable after
    /// releasing a lock guard on the map this `Handle` lives in (its
    /// queue and pending counter are reference-counted independently of
    /// `self`).
    pub fn message_sender(&self) -> MessageSender {
        MessageSender {
            session_id: self.session_id.clone(),
            queue: self.queue.clone(),
            pending: self.pending.clone(),
        }
    }

    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::Acquire)
    }

    /// Turns enqueued but not yet completed by the worker, e.g. still
    /// in-flight when the session is ended.
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Close the queue, await the worker's drain-and-exit (bounded by the
    /// caller, which races this against a timeout), then release every
    /// hook guard. Consumes the handle — it is only called once a session
    /// is being removed from the backend's map.
    pub async fn shutdown(mut self) {
        drop(self.queue);
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
        let released = self.hooks.lock().release_all();
        TraceEvent::HookCleanup { session_id: self.session_id.clone(), released }.emit();
    }
}

//! Inbound message dispatch.
//!
//! DESIGN
//! ======
//! One decoded frame in, one `(kind, payload)` pair out. Control kinds are
//! handled synchronously on the read path; invocations run their callback on
//! a spawned task so a slow handler never stalls the reader. Completions
//! resolve a pending-invocation table keyed by invocation id.
//!
//! TRADE-OFFS
//! ==========
//! Callback concurrency is bounded by a semaphore rather than a worker pool:
//! permits cost nothing when idle and the reject-on-saturation policy keeps
//! the read loop responsive instead of stalling it behind a full queue.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::{Semaphore, oneshot};

use crate::error::ClientError;
use crate::protocol::{Envelope, MessageKind};

/// Terminal outcome of an invocation: the peer's `result` or its `error`.
pub type CompletionOutcome = Result<Option<String>, String>;

/// Application callback for inbound invocations. Runs on a spawned task;
/// the dispatcher does not wait for it.
pub type InvocationHandler = Arc<dyn Fn(Envelope) + Send + Sync>;

/// One dispatched inbound message: its kind and the raw decoded payload.
#[derive(Clone, Debug)]
pub struct Dispatched {
    pub kind: MessageKind,
    pub payload: Value,
}

// =============================================================================
// PENDING INVOCATIONS
// =============================================================================

/// Table of invocations awaiting a completion, keyed by invocation id.
/// Each entry resolves exactly once; dropping the table's senders wakes
/// every waiter with a closed-channel error.
#[derive(Debug, Default)]
pub struct PendingInvocations {
    entries: Mutex<HashMap<String, oneshot::Sender<CompletionOutcome>>>,
}

impl PendingInvocations {
    /// Register an invocation id and obtain the receiver its completion
    /// will resolve.
    pub fn register(&self, invocation_id: impl Into<String>) -> oneshot::Receiver<CompletionOutcome> {
        let (sender, receiver) = oneshot::channel();
        self.lock().insert(invocation_id.into(), sender);
        receiver
    }

    /// Drop a registration whose invocation was never written to the socket.
    pub fn discard(&self, invocation_id: &str) {
        self.lock().remove(invocation_id);
    }

    /// Resolve the entry matching this completion envelope. Returns false
    /// when no entry matches (a non-fatal anomaly the caller may log).
    fn resolve(&self, envelope: &Envelope) -> bool {
        let Some(invocation_id) = envelope.invocation_id.as_deref() else {
            return false;
        };
        let Some(sender) = self.lock().remove(invocation_id) else {
            return false;
        };

        let outcome = match envelope.error.as_deref().filter(|e| !e.is_empty()) {
            Some(error) => Err(error.to_owned()),
            None => Ok(envelope.result.clone()),
        };
        // The waiter may have given up; that is not our problem.
        let _ = sender.send(outcome);
        true
    }

    /// Drop every entry, waking all waiters with a closed-channel error.
    pub fn clear(&self) {
        self.lock().clear();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, oneshot::Sender<CompletionOutcome>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// =============================================================================
// DISPATCHER
// =============================================================================

/// Routes decoded frames by message kind.
pub struct Dispatcher {
    pending: Arc<PendingInvocations>,
    inflight: Arc<Semaphore>,
    limit: usize,
}

impl Dispatcher {
    /// `max_inflight` bounds concurrent invocation callbacks.
    #[must_use]
    pub fn new(max_inflight: usize) -> Self {
        Self {
            pending: Arc::new(PendingInvocations::default()),
            inflight: Arc::new(Semaphore::new(max_inflight)),
            limit: max_inflight,
        }
    }

    /// The pending-invocation table completions resolve against.
    #[must_use]
    pub fn pending(&self) -> Arc<PendingInvocations> {
        Arc::clone(&self.pending)
    }

    /// Decode one frame payload and route it.
    ///
    /// Invocations run `on_invocation` on a spawned task, bounded by the
    /// in-flight limit. Completions resolve the pending table. Everything
    /// else — stream items, stream/cancel invocations, pings, closes, and
    /// unknown discriminants — passes through for the caller to handle.
    ///
    /// # Errors
    ///
    /// [`ClientError::MessageDecode`] for malformed JSON or a missing `type`
    /// field; [`ClientError::InvocationQueueFull`] when the callback bound is
    /// saturated (the frame is still decoded, the callback is not run).
    pub fn dispatch(&self, payload: &[u8], on_invocation: &InvocationHandler) -> Result<Dispatched, ClientError> {
        let value: Value = serde_json::from_slice(payload)?;
        let envelope: Envelope = serde_json::from_value(value.clone())?;
        let kind = envelope.message_kind();

        match kind {
            MessageKind::Invocation => self.spawn_invocation(envelope, on_invocation)?,
            MessageKind::Completion => {
                if !self.pending.resolve(&envelope) {
                    tracing::warn!(
                        invocation_id = envelope.invocation_id.as_deref().unwrap_or("<none>"),
                        "completion without a pending invocation"
                    );
                }
            }
            MessageKind::Close => {
                tracing::info!(error = envelope.error.as_deref().unwrap_or(""), "server sent close");
            }
            MessageKind::Unknown(discriminant) => {
                tracing::debug!(discriminant, "unknown message kind");
            }
            _ => {}
        }

        Ok(Dispatched { kind, payload: value })
    }

    fn spawn_invocation(&self, envelope: Envelope, on_invocation: &InvocationHandler) -> Result<(), ClientError> {
        let permit = Arc::clone(&self.inflight)
            .try_acquire_owned()
            .map_err(|_| ClientError::InvocationQueueFull { limit: self.limit })?;

        let handler = Arc::clone(on_invocation);
        tokio::spawn(async move {
            handler(envelope);
            drop(permit);
        });
        Ok(())
    }
}

#[cfg(test)]
#[path = "dispatch_test.rs"]
mod tests;

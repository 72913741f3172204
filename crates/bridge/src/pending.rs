//! The queue of calls waiting for a worker response.
//!
//! Responses are matched to the oldest entry (FIFO) or, when the worker
//! echoes one, by request id. The lock is never held across an `.await`.

use deskpilot_core::BridgeError;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Instant;
use tokio::sync::oneshot;

pub(crate) type Responder = oneshot::Sender<Result<Value, BridgeError>>;

/// One in-flight attempt.
pub(crate) struct PendingCall {
    pub id: u64,
    pub action: String,
    pub created_at: Instant,
    responder: Responder,
}

impl PendingCall {
    pub fn new(id: u64, action: impl Into<String>, responder: Responder) -> Self {
        Self {
            id,
            action: action.into(),
            created_at: Instant::now(),
            responder,
        }
    }

    fn settle(self, result: Result<Value, BridgeError>) {
        // The caller may have given up already; the slot is consumed either way.
        let _ = self.responder.send(result);
    }
}

/// Outcome of routing one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Routed {
    Resolved { id: u64, action: String, elapsed_ms: u128 },
    Unmatched,
}

#[derive(Default)]
pub(crate) struct PendingQueue {
    calls: Mutex<VecDeque<PendingCall>>,
}

impl PendingQueue {
    pub fn push(&self, call: PendingCall) {
        self.lock().push_back(call);
    }

    /// Resolve the oldest pending call.
    pub fn resolve_oldest(&self, value: Value) -> Routed {
        let call = self.lock().pop_front();
        Self::settle_with(call, value)
    }

    /// Resolve the call with the given id. Unknown ids (late answers to
    /// calls that already timed out) are reported as unmatched.
    pub fn resolve_id(&self, id: u64, value: Value) -> Routed {
        let call = {
            let mut calls = self.lock();
            calls
                .iter()
                .position(|c| c.id == id)
                .and_then(|idx| calls.remove(idx))
        };
        Self::settle_with(call, value)
    }

    /// Drop a pending call without settling it. Returns `false` if it was
    /// already settled.
    pub fn remove(&self, id: u64) -> bool {
        let mut calls = self.lock();
        match calls.iter().position(|c| c.id == id) {
            Some(idx) => {
                calls.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Reject every pending call, draining the queue.
    pub fn reject_all(&self, error: BridgeError) -> usize {
        let drained: Vec<PendingCall> = self.lock().drain(..).collect();
        let count = drained.len();
        for call in drained {
            call.settle(Err(error.clone()));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    fn settle_with(call: Option<PendingCall>, value: Value) -> Routed {
        match call {
            Some(call) => {
                let routed = Routed::Resolved {
                    id: call.id,
                    action: call.action.clone(),
                    elapsed_ms: call.created_at.elapsed().as_millis(),
                };
                call.settle(Ok(value));
                routed
            }
            None => Routed::Unmatched,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<PendingCall>> {
        self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

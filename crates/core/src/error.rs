//! Error types for the DeskPilot domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context (worker bridge, model session, run loop) has its
//! own error enum; [`RunError`] wraps the other two.

use thiserror::Error;

/// Failures of a single call through the worker bridge.
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    #[error("Worker did not answer '{action}' within {timeout_ms}ms")]
    Timeout { action: String, timeout_ms: u64 },

    #[error("Worker crashed: {reason}")]
    WorkerCrashed { reason: String },

    #[error("Failed to spawn worker '{program}': {reason}")]
    Spawn { program: String, reason: String },

    #[error("Worker I/O failed: {0}")]
    Io(String),

    #[error("Bridge has been destroyed")]
    Destroyed,

    #[error("Failed to encode request: {0}")]
    Serialization(String),
}

impl BridgeError {
    /// Whether the retry loop should make another attempt after this error.
    ///
    /// Timeouts and crashes are transient: the worker is restarted behind
    /// the caller's back. Everything else fails the same way on retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::WorkerCrashed { .. } | Self::Io(_)
        )
    }
}

/// Failures reported by a model session.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("Model session could not be opened: {0}")]
    SessionFailed(String),

    #[error("Invalid model event: {0}")]
    InvalidEvent(String),
}

/// Run-level failures of the execution loop.
///
/// A user stop is not an error; it is reported as a normal run outcome.
#[derive(Debug, Clone, Error)]
pub enum RunError {
    #[error("A run is already in progress")]
    AlreadyRunning,

    #[error("Initialization failed: {0}")]
    Initialization(String),

    #[error("Worker call failed: {0}")]
    Worker(#[from] BridgeError),

    #[error("Model failed: {0}")]
    Model(#[from] ModelError),

    #[error("Maximum step count reached ({max_steps})")]
    StepLimitExceeded { max_steps: u32 },
}

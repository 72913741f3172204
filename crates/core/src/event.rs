//! Agent event system — what the surrounding shell observes.
//!
//! Every cross-boundary notification is a variant of the closed
//! [`AgentEvent`] enum, so consumers match exhaustively instead of probing
//! an open payload bag. Events are fire-and-forget: publishing never waits
//! for a consumer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Severity / flavour of a log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Error,
    Hint,
    Action,
}

/// Externally visible run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Running,
    Stopping,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// All events emitted by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Human-readable log line.
    Log {
        level: LogLevel,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Run state transition.
    Status { state: RunState },

    /// The model reported a reasoning phase via a `think` call.
    Thinking {
        phase: String,
        thought: String,
        message: String,
    },

    /// The model declared the task finished via a `done` call.
    Completed { message: String },

    /// One model event has been fully processed.
    Step { count: u32 },

    /// A run ended with an error.
    Error { message: String },

    /// An actuation call is about to be sent to the worker.
    ActionProgress {
        action: String,
        params: serde_json::Value,
    },

    /// The run loop exited without error.
    RunCompleted,
}

impl AgentEvent {
    /// Build a log event stamped with the current time.
    pub fn log(level: LogLevel, message: impl Into<String>) -> Self {
        Self::Log {
            level,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// Event name as used by the shell's channel names.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Log { .. } => "log",
            Self::Status { .. } => "status",
            Self::Thinking { .. } => "thinking",
            Self::Completed { .. } => "completed",
            Self::Step { .. } => "step",
            Self::Error { .. } => "error",
            Self::ActionProgress { .. } => "action_progress",
            Self::RunCompleted => "run_completed",
        }
    }
}

/// A broadcast-based event bus for agent events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<AgentEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: AgentEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<AgentEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

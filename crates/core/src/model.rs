//! Model traits — the abstraction over the language-model client.
//!
//! The model is an opaque producer of events. The loop opens one session per
//! run and pulls events from it; every pull carries the current (already
//! compressed) history so the session can build its next model request.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::message::{FunctionCall, Message};
use crate::session::{ScreenGeometry, SessionId};

/// Parameters for opening a model session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRequest {
    pub session_id: SessionId,
    pub goal: String,
    pub screen: ScreenGeometry,
    pub default_browser: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub default_browser_id: String,
}

/// The context sent along with each pull from the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequest {
    pub session_id: SessionId,
    pub goal: String,
    /// Conversation history, UI payloads already compressed.
    pub contents: Vec<Message>,
}

/// One event from the model stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEvent {
    /// The model turn carried by this event
    pub message: Message,

    /// Whether the model signalled this is its final response
    #[serde(default, rename = "final")]
    pub is_final: bool,
}

impl ModelEvent {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            is_final: false,
        }
    }

    pub fn final_response(message: Message) -> Self {
        Self {
            message,
            is_final: true,
        }
    }

    /// Tool calls carried by this event, in order.
    pub fn function_calls(&self) -> impl Iterator<Item = &FunctionCall> {
        self.message.function_calls()
    }
}

/// A live model session for one run.
#[async_trait]
pub trait ModelSession: Send {
    /// Pull the next event. `Ok(None)` means the stream completed.
    async fn next_event(
        &mut self,
        request: ModelRequest,
    ) -> std::result::Result<Option<ModelEvent>, ModelError>;
}

/// A factory for model sessions.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// A human-readable name for this model source.
    fn name(&self) -> &str;

    /// Open one session for a run.
    async fn open_session(
        &self,
        request: SessionRequest,
    ) -> std::result::Result<Box<dyn ModelSession>, ModelError>;
}

//! # DeskPilot Core
//!
//! Domain types, traits, and error definitions for the DeskPilot desktop
//! agent. This crate has **no process or model dependencies**. It defines
//! the domain model that the bridge, agent and CLI crates implement against.
//!
//! ## Seams
//!
//! - [`ActionWorker`] — anything that executes actions (the child-process
//!   bridge in production, in-process doubles in tests)
//! - [`ModelClient`] / [`ModelSession`] — the opaque language-model stream
//! - [`EventBus`] — fire-and-forget notifications to the surrounding shell

pub mod error;
pub mod event;
pub mod message;
pub mod model;
pub mod session;
pub mod worker;

// Re-export key types at crate root for ergonomics
pub use error::{BridgeError, ModelError, RunError};
pub use event::{AgentEvent, EventBus, LogLevel, RunState};
pub use message::{FunctionCall, FunctionResponse, InlineData, Message, Part, Role};
pub use model::{ModelClient, ModelEvent, ModelRequest, ModelSession, SessionRequest};
pub use session::{ScreenGeometry, SessionId, SessionRegistry, SessionState};
pub use worker::{ActionWorker, CallOptions};

//! # DeskPilot Bridge
//!
//! Newline-delimited JSON RPC to the out-of-process action worker.
//!
//! Requests are written as one JSON object per line on the worker's stdin
//! and answered in submission order on its stdout. Lines that are not JSON
//! objects are worker diagnostics and never consume a pending call. When
//! the worker dies, every call in flight fails with `WorkerCrashed`, a
//! replacement is spawned after a fixed backoff, and the ready callback
//! fires so callers can re-establish session state.

pub mod bridge;
pub mod codec;
pub mod command;
mod pending;
mod process;
pub mod retry;

pub use bridge::{ReadyCallback, StderrCallback, WorkerBridge, WorkerState};
pub use command::WorkerCommand;
pub use retry::RetryPolicy;

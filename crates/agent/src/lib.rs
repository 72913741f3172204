//! The agent side of DeskPilot.
//!
//! A run follows a **Think → Act → Observe** cycle:
//!
//! 1. **Open** a model session for the goal
//! 2. **Send** the trimmed, compressed history with every pull
//! 3. **Classify** each tool call: `think` and `done` are handled here,
//!    everything else is forwarded to the worker
//! 4. **Fold** the worker's answer back into the history, loop to step 2
//!
//! The loop ends on `done`, a final response, a stop request, the end of
//! the stream, the step ceiling or a hard failure.

pub mod context;
pub mod normalize;
pub mod orchestrator;
pub mod replay;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use context::{ContextManager, ContextSnapshot, ContextStats, SnapshotUpdate};
pub use orchestrator::{Environment, Orchestrator, RunOutcome, RunSummary, StopHandle};
pub use replay::ReplayModel;

//! Worker trait — the abstraction over the out-of-process action executor.
//!
//! The execution loop only ever talks to the worker through this trait, so
//! tests can substitute an in-process double for the real child-process
//! bridge.

use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

use crate::error::BridgeError;

/// Per-call overrides of the bridge defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallOptions {
    /// Deadline for a single attempt. `None` uses the bridge default.
    pub timeout: Option<Duration>,

    /// Number of retries after the first attempt. `None` uses the bridge default.
    pub retries: Option<u32>,
}

impl CallOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }
}

/// Anything that can execute actions on behalf of the agent.
#[async_trait]
pub trait ActionWorker: Send + Sync {
    /// Send one action and wait for its response payload.
    async fn call(
        &self,
        action: &str,
        params: serde_json::Value,
        options: CallOptions,
    ) -> Result<serde_json::Value, BridgeError>;

    /// Show or hide the OS cursor. Best-effort: failures are logged only.
    async fn set_cursor_visibility(&self, visible: bool) {
        let params = serde_json::json!({ "visible": visible });
        if let Err(e) = self
            .call("setCursorVisibility", params, CallOptions::default())
            .await
        {
            warn!(visible, error = %e, "Failed to set cursor visibility");
        }
    }
}

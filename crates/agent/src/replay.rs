//! A scripted model source.
//!
//! Replays a fixed list of [`ModelEvent`]s, one per pull, and records every
//! request it was sent. Scripts are JSON Lines, one event per line:
//!
//! ```text
//! {"message":{"role":"model","parts":[{"functionCall":{"name":"think","args":{"phase":"planning","thought":"..."}}}]}}
//! {"message":{"role":"model","parts":[{"functionCall":{"name":"done","args":{"message":"finished"}}}]},"final":true}
//! ```

use async_trait::async_trait;
use deskpilot_core::error::ModelError;
use deskpilot_core::model::{ModelClient, ModelEvent, ModelRequest, ModelSession, SessionRequest};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Model client that replays a script for every session it opens.
pub struct ReplayModel {
    events: Vec<ModelEvent>,
    requests: Arc<Mutex<Vec<ModelRequest>>>,
    sessions: Mutex<Vec<SessionRequest>>,
}

impl ReplayModel {
    pub fn new(events: Vec<ModelEvent>) -> Self {
        Self {
            events,
            requests: Arc::new(Mutex::new(Vec::new())),
            sessions: Mutex::new(Vec::new()),
        }
    }

    /// Parse a JSON Lines script. Blank lines and `#` comments are skipped.
    pub fn from_jsonl(script: &str) -> Result<Self, ModelError> {
        let mut events = Vec::new();
        for (idx, line) in script.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let event: ModelEvent = serde_json::from_str(line)
                .map_err(|e| ModelError::InvalidEvent(format!("line {}: {e}", idx + 1)))?;
            events.push(event);
        }
        Ok(Self::new(events))
    }

    pub fn from_file(path: &Path) -> Result<Self, ModelError> {
        let script = std::fs::read_to_string(path).map_err(|e| {
            ModelError::SessionFailed(format!("cannot read script {}: {e}", path.display()))
        })?;
        Self::from_jsonl(&script)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Every request pulled so far, across sessions.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Every session opened so far.
    pub fn sessions(&self) -> Vec<SessionRequest> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

struct ReplaySession {
    events: VecDeque<ModelEvent>,
    requests: Arc<Mutex<Vec<ModelRequest>>>,
}

#[async_trait]
impl ModelClient for ReplayModel {
    fn name(&self) -> &str {
        "replay"
    }

    async fn open_session(
        &self,
        request: SessionRequest,
    ) -> Result<Box<dyn ModelSession>, ModelError> {
        debug!(session = %request.session_id, events = self.events.len(), "Opening replay session");
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request);
        Ok(Box::new(ReplaySession {
            events: self.events.iter().cloned().collect(),
            requests: Arc::clone(&self.requests),
        }))
    }
}

#[async_trait]
impl ModelSession for ReplaySession {
    async fn next_event(&mut self, request: ModelRequest) -> Result<Option<ModelEvent>, ModelError> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request);
        Ok(self.events.pop_front())
    }
}

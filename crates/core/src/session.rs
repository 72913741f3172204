//! Session registry — explicit, passed-around storage for per-run state.
//!
//! Each run registers a [`SessionState`] under a fresh [`SessionId`] and
//! removes it when the run ends. Components that need the state (coordinate
//! normalisation, re-initialisation after a worker restart) receive the
//! registry and look the session up by id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// Unique identifier for a run session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Screen size in pixels as reported by the worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenGeometry {
    pub width: u32,
    pub height: u32,
}

impl ScreenGeometry {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_known(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// Session-scoped environment of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub goal: String,
    pub screen: ScreenGeometry,
    pub default_browser: String,
    #[serde(default)]
    pub default_browser_id: String,
    pub current_app: String,
    pub created_at: DateTime<Utc>,
}

impl SessionState {
    pub fn new(goal: impl Into<String>, screen: ScreenGeometry, default_browser: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            screen,
            default_browser: default_browser.into(),
            default_browser_id: String::new(),
            current_app: "Finder".into(),
            created_at: Utc::now(),
        }
    }
}

/// Registry of live sessions keyed by [`SessionId`].
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, SessionState>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session and return its id.
    pub fn create(&self, state: SessionState) -> SessionId {
        let id = SessionId::new();
        self.write().insert(id.clone(), state);
        id
    }

    /// Look up a session by id.
    pub fn get(&self, id: &SessionId) -> Option<SessionState> {
        self.read().get(id).cloned()
    }

    /// Mutate a session in place. Returns `false` if it does not exist.
    pub fn update(&self, id: &SessionId, f: impl FnOnce(&mut SessionState)) -> bool {
        match self.write().get_mut(id) {
            Some(state) => {
                f(state);
                true
            }
            None => false,
        }
    }

    /// Remove a session, returning its final state.
    pub fn remove(&self, id: &SessionId) -> Option<SessionState> {
        self.write().remove(id)
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<SessionId, SessionState>> {
        self.sessions.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<SessionId, SessionState>> {
        self.sessions.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

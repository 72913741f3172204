//! Shared test doubles for orchestrator tests.

use async_trait::async_trait;
use deskpilot_core::error::BridgeError;
use deskpilot_core::message::{Message, Part};
use deskpilot_core::model::ModelEvent;
use deskpilot_core::worker::{ActionWorker, CallOptions};
use serde_json::{Value, json};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::orchestrator::StopHandle;

/// A worker that answers environment queries and records every actuation.
///
/// `size`, `browser` and `setCursorVisibility` are answered but kept out of
/// [`calls`](Self::calls).
pub struct RecordingWorker {
    calls: Mutex<Vec<(String, Value)>>,
    cursor: Mutex<Vec<bool>>,
    size_queries: AtomicUsize,
    browser: Value,
    stop_on: Option<(usize, StopHandle)>,
    failing_action: Option<String>,
}

impl RecordingWorker {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            cursor: Mutex::new(Vec::new()),
            size_queries: AtomicUsize::new(0),
            browser: json!({"status": "success", "browser": "Google Chrome", "bundle_id": "com.google.Chrome"}),
            stop_on: None,
            failing_action: None,
        }
    }

    /// Request a stop while serving the `n`th actuation (1-based).
    pub fn stopping_on(mut self, n: usize, handle: StopHandle) -> Self {
        self.stop_on = Some((n, handle));
        self
    }

    /// Fail every call to `action` as if the worker crashed.
    pub fn failing(mut self, action: &str) -> Self {
        self.failing_action = Some(action.to_string());
        self
    }

    /// Answer the browser query with `response`.
    pub fn with_browser_response(mut self, response: Value) -> Self {
        self.browser = response;
        self
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn cursor_changes(&self) -> Vec<bool> {
        self.cursor.lock().unwrap().clone()
    }

    pub fn size_queries(&self) -> usize {
        self.size_queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ActionWorker for RecordingWorker {
    async fn call(
        &self,
        action: &str,
        params: Value,
        _options: CallOptions,
    ) -> Result<Value, BridgeError> {
        match action {
            "size" => {
                self.size_queries.fetch_add(1, Ordering::SeqCst);
                return Ok(json!({"width": 1920, "height": 1080}));
            }
            "browser" => return Ok(self.browser.clone()),
            "setCursorVisibility" => {
                let visible = params["visible"].as_bool().unwrap_or(true);
                self.cursor.lock().unwrap().push(visible);
                return Ok(json!({"status": "success"}));
            }
            _ => {}
        }

        if self.failing_action.as_deref() == Some(action) {
            return Err(BridgeError::WorkerCrashed {
                reason: "exit status: 1".into(),
            });
        }

        let count = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((action.to_string(), params));
            calls.len()
        };
        if let Some((n, handle)) = &self.stop_on {
            if count == *n {
                handle.stop();
            }
        }
        Ok(json!({"status": "success", "action": action}))
    }
}

pub fn think(phase: &str, thought: &str) -> ModelEvent {
    ModelEvent::new(Message::model(vec![Part::call(
        "think",
        json!({"phase": phase, "thought": thought}),
    )]))
}

pub fn action(name: &str, args: Value) -> ModelEvent {
    ModelEvent::new(Message::model(vec![Part::call(name, args)]))
}

pub fn done(message: &str) -> ModelEvent {
    ModelEvent::final_response(Message::model(vec![Part::call(
        "done",
        json!({"message": message}),
    )]))
}

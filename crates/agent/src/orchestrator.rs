//! The execution loop.
//!
//! A run pulls events from one model session and classifies every tool
//! call it carries:
//!
//! - `think` updates the progress snapshot and is reported, never executed
//! - `done` ends the run as completed
//! - anything else is an actuation, forwarded to the worker, its result
//!   folded back into the history
//!
//! Each processed event is one step. The run ends on `done`, a final
//! response, stream completion, a stop request (checked once per event),
//! the step ceiling, or a hard worker/model failure. Every exit path
//! restores the cursor and returns the orchestrator to idle.

use deskpilot_config::{HistoryConfig, RunConfig};
use deskpilot_core::error::RunError;
use deskpilot_core::event::{AgentEvent, EventBus, LogLevel, RunState};
use deskpilot_core::message::{FunctionCall, Message};
use deskpilot_core::model::{ModelClient, ModelRequest, SessionRequest};
use deskpilot_core::session::{ScreenGeometry, SessionId, SessionRegistry, SessionState};
use deskpilot_core::worker::{ActionWorker, CallOptions};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::{ContextManager, ContextSnapshot, SnapshotUpdate};
use crate::normalize;

/// Browser assumed when the worker cannot tell.
pub const FALLBACK_BROWSER: &str = "Safari";

const BROWSER_TIMEOUT: Duration = Duration::from_secs(5);

/// Phases whose thoughts are worth keeping as observations.
const OBSERVED_PHASES: [&str; 2] = ["verification", "reflection"];

/// How a run ended, when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The model called `done`.
    Completed { message: String },
    /// The model stream ran out or sent its final response.
    StreamEnded,
    /// A stop request was observed.
    Stopped,
}

/// Result of a run that did not fail.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub session_id: SessionId,
    pub outcome: RunOutcome,
    pub steps: u32,
    /// Snapshot at the end of the run
    pub snapshot: Option<ContextSnapshot>,
}

/// Cooperative stop signal shared with whoever may stop a run.
///
/// Each run gets a fresh token, so a stop issued between runs does not
/// cancel the next one.
#[derive(Clone, Default)]
pub struct StopHandle {
    token: Arc<Mutex<CancellationToken>>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop of the current run.
    pub fn stop(&self) {
        self.lock().cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().is_cancelled()
    }

    fn renew(&self) -> CancellationToken {
        let mut token = self.lock();
        *token = CancellationToken::new();
        token.clone()
    }

    fn lock(&self) -> MutexGuard<'_, CancellationToken> {
        self.token.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Worker-derived facts a run needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    pub screen: ScreenGeometry,
    pub default_browser: String,
    pub default_browser_id: String,
}

/// Drives runs: model stream in, worker calls and events out.
pub struct Orchestrator {
    worker: Arc<dyn ActionWorker>,
    model: Arc<dyn ModelClient>,
    events: Arc<EventBus>,
    sessions: Arc<SessionRegistry>,
    context: Mutex<ContextManager>,
    config: RunConfig,
    state: Mutex<RunState>,
    stop: StopHandle,
    environment: Mutex<Option<Environment>>,
    /// Set when the worker was replaced and the environment must be re-read.
    stale: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(
        worker: Arc<dyn ActionWorker>,
        model: Arc<dyn ModelClient>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            worker,
            model,
            events,
            sessions: Arc::new(SessionRegistry::new()),
            context: Mutex::new(ContextManager::default()),
            config: RunConfig::default(),
            state: Mutex::new(RunState::Idle),
            stop: StopHandle::new(),
            environment: Mutex::new(None),
            stale: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Set the run settings (step ceiling, coordinate mapping).
    pub fn with_run_config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the history limits.
    pub fn with_history_config(mut self, config: HistoryConfig) -> Self {
        self.context = Mutex::new(ContextManager::new(config));
        self
    }

    /// Set the maximum number of steps per run.
    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.config.max_steps = max_steps;
        self
    }

    /// Share a session registry with other components.
    pub fn with_sessions(mut self, sessions: Arc<SessionRegistry>) -> Self {
        self.sessions = sessions;
        self
    }

    /// Use an externally created stop handle.
    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Callback for the bridge's ready hook: marks the environment stale so
    /// it is re-read from the replacement worker.
    pub fn ready_hook(&self) -> impl Fn(u64) + Send + Sync + 'static {
        let stale = Arc::clone(&self.stale);
        move |generation| {
            debug!(generation, "Worker replaced; environment marked stale");
            stale.store(true, Ordering::SeqCst);
        }
    }

    pub fn state(&self) -> RunState {
        *self.lock_state()
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Run `f` with the context manager locked.
    pub fn with_context<R>(&self, f: impl FnOnce(&mut ContextManager) -> R) -> R {
        f(&mut self.context())
    }

    /// Query the worker for screen size and default browser.
    pub async fn init(&self) -> Result<Environment, RunError> {
        self.log(LogLevel::Info, "Initializing orchestrator...");

        let size = self
            .worker
            .call("size", json!({}), CallOptions::default())
            .await
            .map_err(|e| RunError::Initialization(format!("screen size query failed: {e}")))?;
        let dimension = |key: &str| {
            size.get(key)
                .and_then(Value::as_u64)
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(0)
        };
        let screen = ScreenGeometry::new(dimension("width"), dimension("height"));

        let browser_options = CallOptions::default()
            .with_timeout(BROWSER_TIMEOUT)
            .with_retries(0);
        let (default_browser, default_browser_id) =
            match self.worker.call("browser", json!({}), browser_options).await {
                Ok(res) if res.get("status").and_then(Value::as_str) == Some("success") => {
                    match res.get("browser").and_then(Value::as_str) {
                        Some(browser) if !browser.is_empty() => (
                            browser.to_string(),
                            res.get("bundle_id")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                        ),
                        _ => (FALLBACK_BROWSER.to_string(), String::new()),
                    }
                }
                Ok(_) => (FALLBACK_BROWSER.to_string(), String::new()),
                Err(e) => {
                    debug!(error = %e, "Default browser query failed");
                    (FALLBACK_BROWSER.to_string(), String::new())
                }
            };

        let environment = Environment {
            screen,
            default_browser,
            default_browser_id,
        };
        self.log(
            LogLevel::Info,
            format!("Screen size: {}x{}", screen.width, screen.height),
        );
        self.log(
            LogLevel::Info,
            format!("Default browser: {}", environment.default_browser),
        );

        *self.lock_environment() = Some(environment.clone());
        self.stale.store(false, Ordering::SeqCst);
        Ok(environment)
    }

    /// Execute one goal to completion.
    pub async fn run(&self, goal: &str) -> Result<RunSummary, RunError> {
        {
            let mut state = self.lock_state();
            if *state != RunState::Idle {
                return Err(RunError::AlreadyRunning);
            }
            *state = RunState::Running;
        }
        let token = self.stop.renew();
        self.emit(AgentEvent::Status {
            state: RunState::Running,
        });
        self.log(LogLevel::Info, format!("Task started - goal: {goal}"));

        let mut trace = RunTrace::default();
        let result = self.execute(goal, &token, &mut trace).await;
        self.finish(result, trace).await
    }

    /// Request a cooperative stop of the current run.
    pub fn stop(&self) {
        self.stop.stop();
        self.log(LogLevel::Info, "Stop requested");
    }

    /// Stop and forget the conversation.
    pub fn reset(&self) {
        self.stop.stop();
        self.context().clear();
        self.log(LogLevel::Info, "Reset");
    }

    /// Feed a user hint into the history of the current run.
    pub fn add_hint(&self, text: &str) {
        self.log(LogLevel::Hint, format!("Hint added: {text}"));
        self.context().add_message(Message::user(text));
    }

    async fn execute(
        &self,
        goal: &str,
        token: &CancellationToken,
        trace: &mut RunTrace,
    ) -> Result<RunOutcome, RunError> {
        let environment = self.environment().await?;

        {
            let mut context = self.context();
            context.clear();
            context.update_snapshot(
                SnapshotUpdate::goal(goal)
                    .with_phase("starting")
                    .with_completed_actions(Vec::new())
                    .with_observations(Vec::new()),
            );
        }

        let mut state = SessionState::new(goal, environment.screen, &environment.default_browser);
        state.default_browser_id = environment.default_browser_id.clone();
        let session_id = self.sessions.create(state);
        trace.session_id = Some(session_id.clone());

        self.worker.set_cursor_visibility(false).await;
        trace.cursor_hidden = true;

        let mut session = self
            .model
            .open_session(SessionRequest {
                session_id: session_id.clone(),
                goal: goal.to_string(),
                screen: environment.screen,
                default_browser: environment.default_browser.clone(),
                default_browser_id: environment.default_browser_id.clone(),
            })
            .await?;
        info!(session = %session_id, model = self.model.name(), "Model session opened");

        self.context().add_message(Message::user(goal));

        loop {
            let request = self.build_request(&session_id, goal);
            let Some(event) = session.next_event(request).await? else {
                self.log(LogLevel::Info, "Model stream completed");
                return Ok(RunOutcome::StreamEnded);
            };

            if token.is_cancelled() {
                *self.lock_state() = RunState::Stopping;
                self.emit(AgentEvent::Status {
                    state: RunState::Stopping,
                });
                self.log(LogLevel::Info, "Interrupted by stop request");
                return Ok(RunOutcome::Stopped);
            }

            self.context().add_message(event.message.clone());

            for call in event.function_calls() {
                match call.name.as_str() {
                    "think" => self.handle_think(call),
                    "done" => {
                        let message = self.handle_done(call);
                        return Ok(RunOutcome::Completed { message });
                    }
                    _ => self.actuate(&session_id, call).await?,
                }
            }

            if event.is_final {
                self.log(LogLevel::Info, "Task finished (final response received)");
                return Ok(RunOutcome::StreamEnded);
            }

            trace.steps += 1;
            self.emit(AgentEvent::Step { count: trace.steps });
            if trace.steps >= self.config.max_steps {
                return Err(RunError::StepLimitExceeded {
                    max_steps: self.config.max_steps,
                });
            }
        }
    }

    /// Common exit path for every outcome.
    async fn finish(
        &self,
        result: Result<RunOutcome, RunError>,
        trace: RunTrace,
    ) -> Result<RunSummary, RunError> {
        if trace.cursor_hidden {
            self.worker.set_cursor_visibility(true).await;
        }
        if let Some(id) = &trace.session_id {
            self.sessions.remove(id);
        }
        let snapshot = self.context().take_snapshot();

        let result = match result {
            Ok(outcome) => {
                info!(steps = trace.steps, ?outcome, "Run finished");
                self.emit(AgentEvent::RunCompleted);
                Ok(RunSummary {
                    session_id: trace.session_id.unwrap_or_default(),
                    outcome,
                    steps: trace.steps,
                    snapshot,
                })
            }
            Err(e) => {
                warn!(steps = trace.steps, error = %e, "Run failed");
                self.log(LogLevel::Error, format!("Execution error: {e}"));
                self.emit(AgentEvent::Error {
                    message: e.to_string(),
                });
                Err(e)
            }
        };

        *self.lock_state() = RunState::Idle;
        self.emit(AgentEvent::Status {
            state: RunState::Idle,
        });
        result
    }

    /// The cached environment, re-read first if missing or stale.
    async fn environment(&self) -> Result<Environment, RunError> {
        let cached = self.lock_environment().clone();
        match cached {
            Some(environment) if !self.stale.load(Ordering::SeqCst) => Ok(environment),
            _ => self.init().await,
        }
    }

    /// Screen geometry for an actuation, refreshing the session after a
    /// worker restart.
    async fn screen_for(&self, session_id: &SessionId) -> ScreenGeometry {
        if self.stale.load(Ordering::SeqCst) {
            match self.init().await {
                Ok(environment) => {
                    self.sessions.update(session_id, |s| {
                        s.screen = environment.screen;
                        s.default_browser = environment.default_browser.clone();
                        s.default_browser_id = environment.default_browser_id.clone();
                    });
                }
                Err(e) => warn!(error = %e, "Re-initialization after worker restart failed"),
            }
        }
        self.sessions
            .get(session_id)
            .map(|s| s.screen)
            .unwrap_or_default()
    }

    fn build_request(&self, session_id: &SessionId, goal: &str) -> ModelRequest {
        let context = self.context();
        let mut contents = context.compressed_messages();
        if context.trim_passes() > 0 {
            if let Some(summary) = context.generate_summary_message() {
                contents.insert(0, summary);
            }
        }
        ModelRequest {
            session_id: session_id.clone(),
            goal: goal.to_string(),
            contents,
        }
    }

    fn handle_think(&self, call: &FunctionCall) {
        let phase = call.str_arg("phase").unwrap_or("executing").to_string();
        let thought = call.str_arg("thought").unwrap_or_default().to_string();
        let message = format!("[{}] {thought}", phase_label(&phase));

        {
            let mut context = self.context();
            context.update_snapshot(SnapshotUpdate::phase(&phase));
            if OBSERVED_PHASES.contains(&phase.as_str()) && !thought.is_empty() {
                context.record_observation(thought.clone());
            }
        }

        self.log(LogLevel::Info, message.clone());
        self.emit(AgentEvent::Thinking {
            phase,
            thought,
            message,
        });
    }

    fn handle_done(&self, call: &FunctionCall) -> String {
        let message = call.str_arg("message").unwrap_or_default().to_string();
        self.context()
            .update_snapshot(SnapshotUpdate::phase("completed"));
        self.log(LogLevel::Success, format!("Completed: {message}"));
        self.emit(AgentEvent::Completed {
            message: message.clone(),
        });
        message
    }

    async fn actuate(&self, session_id: &SessionId, call: &FunctionCall) -> Result<(), RunError> {
        self.log(LogLevel::Action, format!("Action: {} {}", call.name, call.args));
        self.emit(AgentEvent::ActionProgress {
            action: call.name.clone(),
            params: call.args.clone(),
        });

        let params = if self.config.normalized_coordinates {
            let screen = self.screen_for(session_id).await;
            normalize::to_screen(&call.args, screen)
        } else {
            call.args.clone()
        };

        let response = self
            .worker
            .call(&call.name, params, CallOptions::default())
            .await?;

        let mut context = self.context();
        context.record_action(&call.name);
        context.add_message(Message::function_result(&call.name, response));
        Ok(())
    }

    fn emit(&self, event: AgentEvent) {
        self.events.publish(event);
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        debug!(?level, "{message}");
        self.emit(AgentEvent::log(level, message));
    }

    fn context(&self) -> MutexGuard<'_, ContextManager> {
        self.context.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_state(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_environment(&self) -> MutexGuard<'_, Option<Environment>> {
        self.environment
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Default)]
struct RunTrace {
    session_id: Option<SessionId>,
    steps: u32,
    cursor_hidden: bool,
}

/// Display label for a reasoning phase.
pub fn phase_label(phase: &str) -> &str {
    match phase {
        "planning" => "Planning",
        "executing" => "Executing",
        "verification" => "Verification",
        "reflection" => "Reflection",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replay::ReplayModel;
    use crate::test_helpers::{RecordingWorker, action, done, think};
    use deskpilot_core::error::BridgeError;
    use deskpilot_core::model::ModelEvent;
    use tokio::sync::broadcast;

    fn orchestrator(worker: &Arc<RecordingWorker>, events: Vec<ModelEvent>) -> Orchestrator {
        Orchestrator::new(
            Arc::clone(worker) as Arc<dyn ActionWorker>,
            Arc::new(ReplayModel::new(events)),
            Arc::new(EventBus::default()),
        )
    }

    fn clicks(n: usize) -> Vec<ModelEvent> {
        (0..n)
            .map(|i| action("click", json!({"x": 10 * i, "y": 10})))
            .collect()
    }

    fn drain(rx: &mut broadcast::Receiver<Arc<AgentEvent>>) -> Vec<AgentEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push((*event).clone());
        }
        out
    }

    #[tokio::test]
    async fn step_limit_aborts_run() {
        let worker = Arc::new(RecordingWorker::new());
        let orch = orchestrator(&worker, clicks(10)).with_max_steps(5);
        let mut rx = orch.events.subscribe();

        let err = orch.run("click around").await.unwrap_err();
        assert!(matches!(err, RunError::StepLimitExceeded { max_steps: 5 }));
        assert_eq!(worker.call_count(), 5);
        assert_eq!(orch.state(), RunState::Idle);
        assert_eq!(worker.cursor_changes(), vec![false, true]);

        let events = drain(&mut rx);
        let steps: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                AgentEvent::Step { count } => Some(*count),
                _ => None,
            })
            .collect();
        assert_eq!(steps, vec![1, 2, 3, 4, 5]);
        assert!(events.iter().any(|e| matches!(e, AgentEvent::Error { .. })));
        assert!(!events.iter().any(|e| matches!(e, AgentEvent::RunCompleted)));
    }

    #[tokio::test]
    async fn stop_is_observed_before_next_event() {
        let stop = StopHandle::new();
        let worker = Arc::new(RecordingWorker::new().stopping_on(3, stop.clone()));
        let orch = orchestrator(&worker, clicks(10)).with_stop_handle(stop);
        let mut rx = orch.events.subscribe();

        let summary = orch.run("click around").await.unwrap();
        assert_eq!(summary.outcome, RunOutcome::Stopped);
        assert_eq!(summary.steps, 3);
        assert_eq!(worker.call_count(), 3);
        assert_eq!(orch.state(), RunState::Idle);

        let states: Vec<RunState> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                AgentEvent::Status { state } => Some(state),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![RunState::Running, RunState::Stopping, RunState::Idle]
        );
    }

    #[tokio::test]
    async fn stop_between_runs_does_not_cancel_next_run() {
        let worker = Arc::new(RecordingWorker::new());
        let orch = orchestrator(&worker, vec![action("click", json!({})), done("ok")]);
        orch.stop();

        let summary = orch.run("goal").await.unwrap();
        assert_eq!(
            summary.outcome,
            RunOutcome::Completed {
                message: "ok".into()
            }
        );
    }

    #[tokio::test]
    async fn end_to_end_event_sequence() {
        let worker = Arc::new(RecordingWorker::new());
        let orch = orchestrator(
            &worker,
            vec![
                think("planning", "open the menu"),
                action("click", json!({"x": 500, "y": 500})),
                think("verification", "menu is open"),
                done("finished"),
            ],
        );
        let mut rx = orch.events.subscribe();

        let summary = orch.run("open the menu").await.unwrap();
        assert_eq!(
            summary.outcome,
            RunOutcome::Completed {
                message: "finished".into()
            }
        );
        assert_eq!(summary.steps, 3);
        assert_eq!(worker.call_count(), 1);

        let events = drain(&mut rx);
        let visible: Vec<&AgentEvent> = events
            .iter()
            .filter(|e| !matches!(e.kind(), "log" | "step" | "run_completed"))
            .collect();
        assert_eq!(visible.len(), 6, "{visible:#?}");
        assert_eq!(
            *visible[0],
            AgentEvent::Status {
                state: RunState::Running
            }
        );
        assert!(matches!(visible[1], AgentEvent::Thinking { phase, .. } if phase == "planning"));
        assert!(matches!(visible[2], AgentEvent::ActionProgress { action, .. } if action == "click"));
        assert!(
            matches!(visible[3], AgentEvent::Thinking { phase, message, .. }
                if phase == "verification" && message == "[Verification] menu is open")
        );
        assert_eq!(
            *visible[4],
            AgentEvent::Completed {
                message: "finished".into()
            }
        );
        assert_eq!(
            *visible[5],
            AgentEvent::Status {
                state: RunState::Idle
            }
        );
        assert!(events.iter().any(|e| matches!(e, AgentEvent::RunCompleted)));

        let snapshot = summary.snapshot.unwrap();
        assert_eq!(snapshot.goal, "open the menu");
        assert_eq!(snapshot.current_phase, "completed");
        assert_eq!(snapshot.completed_actions, vec!["click"]);
        assert_eq!(snapshot.key_observations, vec!["menu is open"]);
    }

    #[tokio::test]
    async fn rejects_concurrent_run() {
        let worker = Arc::new(RecordingWorker::new());
        let orch = orchestrator(&worker, vec![done("ok")]);
        *orch.lock_state() = RunState::Running;

        let err = orch.run("goal").await.unwrap_err();
        assert!(matches!(err, RunError::AlreadyRunning));
        assert_eq!(worker.size_queries(), 0);
        assert_eq!(orch.state(), RunState::Running);
    }

    #[tokio::test]
    async fn maps_grid_coordinates_to_pixels() {
        let worker = Arc::new(RecordingWorker::new());
        let orch = orchestrator(
            &worker,
            vec![
                action("click", json!({"x": 500, "y": 500})),
                action("drag", json!({"from_x": 0, "from_y": 0, "to_x": 1000, "to_y": 1000})),
                done("ok"),
            ],
        );
        orch.run("goal").await.unwrap();

        let calls = worker.calls();
        assert_eq!(calls[0].1, json!({"x": 960, "y": 540}));
        assert_eq!(
            calls[1].1,
            json!({"from_x": 0, "from_y": 0, "to_x": 1920, "to_y": 1080})
        );
    }

    #[tokio::test]
    async fn raw_coordinates_when_mapping_disabled() {
        let worker = Arc::new(RecordingWorker::new());
        let orch = orchestrator(&worker, vec![action("click", json!({"x": 500, "y": 500}))])
            .with_run_config(RunConfig {
                normalized_coordinates: false,
                ..RunConfig::default()
            });
        orch.run("goal").await.unwrap();
        assert_eq!(worker.calls()[0].1, json!({"x": 500, "y": 500}));
    }

    #[tokio::test]
    async fn worker_failure_ends_run_with_error() {
        let worker = Arc::new(RecordingWorker::new().failing("click"));
        let orch = orchestrator(&worker, vec![action("click", json!({})), done("ok")]);
        let mut rx = orch.events.subscribe();

        let err = orch.run("goal").await.unwrap_err();
        assert!(matches!(err, RunError::Worker(BridgeError::WorkerCrashed { .. })));
        assert_eq!(orch.state(), RunState::Idle);
        assert_eq!(worker.cursor_changes(), vec![false, true]);
        assert!(orch.sessions().is_empty());

        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(e, AgentEvent::Error { .. })));
        assert!(!events.iter().any(|e| matches!(e, AgentEvent::Completed { .. })));
        assert_eq!(
            events.last(),
            Some(&AgentEvent::Status {
                state: RunState::Idle
            })
        );
    }

    #[tokio::test]
    async fn stream_end_and_final_response() {
        let worker = Arc::new(RecordingWorker::new());
        let orch = orchestrator(&worker, vec![action("click", json!({}))]);
        let summary = orch.run("goal").await.unwrap();
        assert_eq!(summary.outcome, RunOutcome::StreamEnded);
        assert_eq!(summary.steps, 1);

        let orch = orchestrator(
            &worker,
            vec![ModelEvent::final_response(Message::model_text("all set"))],
        );
        let summary = orch.run("goal").await.unwrap();
        assert_eq!(summary.outcome, RunOutcome::StreamEnded);
        assert_eq!(summary.steps, 0);
    }

    #[tokio::test]
    async fn summary_leads_requests_after_trimming() {
        let worker = Arc::new(RecordingWorker::new());
        let model = Arc::new(ReplayModel::new(clicks(6)));
        let orch = Orchestrator::new(
            Arc::clone(&worker) as Arc<dyn ActionWorker>,
            Arc::clone(&model) as Arc<dyn ModelClient>,
            Arc::new(EventBus::default()),
        )
        .with_history_config(HistoryConfig {
            max_messages: 4,
            ..HistoryConfig::default()
        });

        orch.run("fill the form").await.unwrap();

        let requests = model.requests();
        assert_eq!(requests[0].contents.len(), 1);
        assert_eq!(requests[0].contents[0].text(), "fill the form");

        let last = requests.last().unwrap();
        let summary = last.contents[0].text();
        assert!(summary.starts_with("## Context Summary"), "{summary}");
        assert!(summary.contains("fill the form"));
        assert_eq!(last.contents[0].importance, Some(0.9));
        assert!(last.contents.len() <= 5);
    }

    #[tokio::test]
    async fn trimming_keeps_latest_turns_when_model_stamps_are_stale() {
        let worker = Arc::new(RecordingWorker::new());
        let stale = chrono::Utc::now() - chrono::Duration::hours(1);
        let events = clicks(6)
            .into_iter()
            .map(|mut event| {
                event.message.timestamp = stale;
                event
            })
            .collect();
        let orch = orchestrator(&worker, events).with_history_config(HistoryConfig {
            max_messages: 4,
            ..HistoryConfig::default()
        });

        orch.run("click six times").await.unwrap();

        // goal + 6 × (model turn, worker result) = seqs 0..=12
        let seqs: Vec<u64> = orch.with_context(|c| c.messages().iter().map(|m| m.seq).collect());
        assert_eq!(seqs.len(), 4);
        assert!(seqs.windows(2).all(|w| w[0] < w[1]), "{seqs:?}");
        assert!(seqs.ends_with(&[11, 12]), "{seqs:?}");
    }

    #[tokio::test]
    async fn ready_hook_forces_reinitialization() {
        let worker = Arc::new(RecordingWorker::new());
        let orch = orchestrator(&worker, vec![action("click", json!({})), done("ok")]);

        orch.run("first").await.unwrap();
        assert_eq!(worker.size_queries(), 1);

        orch.run("second").await.unwrap();
        assert_eq!(worker.size_queries(), 1);

        let hook = orch.ready_hook();
        hook(2);
        orch.run("third").await.unwrap();
        assert_eq!(worker.size_queries(), 2);
    }

    #[tokio::test]
    async fn browser_falls_back_when_unknown() {
        let worker = Arc::new(
            RecordingWorker::new().with_browser_response(json!({"status": "error"})),
        );
        let orch = orchestrator(&worker, Vec::new());
        let environment = orch.init().await.unwrap();
        assert_eq!(environment.screen, ScreenGeometry::new(1920, 1080));
        assert_eq!(environment.default_browser, FALLBACK_BROWSER);
        assert_eq!(environment.default_browser_id, "");

        let worker = Arc::new(RecordingWorker::new());
        let orch = orchestrator(&worker, Vec::new());
        let environment = orch.init().await.unwrap();
        assert_eq!(environment.default_browser, "Google Chrome");
        assert_eq!(environment.default_browser_id, "com.google.Chrome");
    }

    #[tokio::test]
    async fn hint_lands_in_history() {
        let worker = Arc::new(RecordingWorker::new());
        let orch = orchestrator(&worker, Vec::new());
        let mut rx = orch.events.subscribe();

        orch.add_hint("the button is blue");
        assert_eq!(orch.with_context(|c| c.messages().len()), 1);
        assert!(drain(&mut rx).iter().any(|e| matches!(
            e,
            AgentEvent::Log { level: LogLevel::Hint, message, .. } if message.contains("the button is blue")
        )));

        orch.reset();
        assert_eq!(orch.with_context(|c| c.messages().len()), 0);
        assert!(orch.stop_handle().is_stopped());
    }

    #[test]
    fn phase_labels() {
        assert_eq!(phase_label("planning"), "Planning");
        assert_eq!(phase_label("reflection"), "Reflection");
        assert_eq!(phase_label("custom"), "custom");
    }
}

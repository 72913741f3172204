//! The worker bridge: a self-healing request/response channel to one
//! worker process.
//!
//! ```text
//! Running ──exit──▶ Crashing ──▶ Restarting ──spawn ok──▶ Running
//!                                     │
//!                                     └──spawn failed──▶ Down ──next call──▶ Running
//! Running ──write missed its deadline──▶ Down
//! (any) ──destroy()──▶ Destroyed
//! ```

use async_trait::async_trait;
use deskpilot_config::{AppConfig, BridgeConfig};
use deskpilot_core::{ActionWorker, BridgeError, CallOptions};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::codec;
use crate::command::WorkerCommand;
use crate::pending::{PendingCall, PendingQueue};
use crate::process::{SpawnContext, WorkerExit, WorkerProcess, spawn_worker};
use crate::retry::RetryPolicy;

/// Called with the new worker generation after a replacement worker is up.
pub type ReadyCallback = Arc<dyn Fn(u64) + Send + Sync>;

/// Called with every line the worker writes to stderr.
pub type StderrCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Deadline for the best-effort cursor toggle.
const CURSOR_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle state of the worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    Crashing,
    Restarting,
    /// A respawn failed; the next call tries again.
    Down,
    Destroyed,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Crashing => "crashing",
            Self::Restarting => "restarting",
            Self::Down => "down",
            Self::Destroyed => "destroyed",
        };
        f.write_str(s)
    }
}

#[derive(Default)]
pub(crate) struct Hooks {
    ready: Mutex<Option<ReadyCallback>>,
    stderr: Mutex<Option<StderrCallback>>,
}

impl Hooks {
    pub(crate) fn ready(&self, generation: u64) {
        let callback = self
            .ready
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        if let Some(callback) = callback {
            callback(generation);
        }
    }

    pub(crate) fn stderr(&self, line: &str) {
        let callback = self
            .stderr
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        if let Some(callback) = callback {
            callback(line);
        }
    }
}

/// Resilient RPC channel to the action worker.
///
/// Cheap to clone; all clones share one worker.
#[derive(Clone)]
pub struct WorkerBridge {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    command: WorkerCommand,
    config: BridgeConfig,
    pending: Arc<PendingQueue>,
    hooks: Arc<Hooks>,
    state: Mutex<WorkerState>,
    /// Pushing a pending call and writing its line happen under this lock,
    /// so queue order always equals wire order.
    process: tokio::sync::Mutex<Option<WorkerProcess>>,
    exits: mpsc::UnboundedSender<WorkerExit>,
    next_id: AtomicU64,
    generation: AtomicU64,
}

impl WorkerBridge {
    /// Spawn the worker and start supervising it.
    pub async fn spawn(command: WorkerCommand, config: BridgeConfig) -> Result<Self, BridgeError> {
        let (exits_tx, exits_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(BridgeInner {
            command,
            config,
            pending: Arc::new(PendingQueue::default()),
            hooks: Arc::new(Hooks::default()),
            state: Mutex::new(WorkerState::Down),
            process: tokio::sync::Mutex::new(None),
            exits: exits_tx,
            next_id: AtomicU64::new(1),
            generation: AtomicU64::new(0),
        });

        {
            let mut slot = inner.process.lock().await;
            *slot = Some(inner.start_process()?);
            inner.transition(&[WorkerState::Down], WorkerState::Running);
        }

        tokio::spawn(supervise(Arc::downgrade(&inner), exits_rx));
        Ok(Self { inner })
    }

    /// Spawn the worker described by the application config.
    pub async fn from_config(config: &AppConfig) -> Result<Self, BridgeError> {
        Self::spawn(WorkerCommand::from_config(&config.worker), config.bridge.clone()).await
    }

    /// Send one action, retrying transient failures with exponential backoff.
    pub async fn call(
        &self,
        action: &str,
        params: Value,
        options: CallOptions,
    ) -> Result<Value, BridgeError> {
        let config = &self.inner.config;
        let timeout = options.timeout.unwrap_or_else(|| config.timeout());
        let policy = RetryPolicy::new(
            options.retries.unwrap_or(config.retries),
            config.retry_base(),
        );

        let inner = &self.inner;
        let params = &params;
        policy
            .run(action, move |_| inner.call_once(action, params, timeout))
            .await
    }

    /// Register the callback fired after a replacement worker is up.
    pub fn on_ready(&self, callback: impl Fn(u64) + Send + Sync + 'static) {
        *self
            .inner
            .hooks
            .ready
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Arc::new(callback));
    }

    /// Register the callback fed with the worker's stderr lines.
    pub fn on_stderr(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        *self
            .inner
            .hooks
            .stderr
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Arc::new(callback));
    }

    /// Kill the worker and reject everything in flight. Later calls fail
    /// with [`BridgeError::Destroyed`].
    pub async fn destroy(&self) {
        {
            let mut state = self.inner.lock_state();
            if *state == WorkerState::Destroyed {
                return;
            }
            *state = WorkerState::Destroyed;
        }

        let process = self.inner.process.lock().await.take();
        if let Some(process) = process {
            info!(generation = process.generation, pid = process.pid, "Stopping worker");
        }
        let rejected = self.inner.pending.reject_all(BridgeError::Destroyed);
        if rejected > 0 {
            warn!(rejected, "Rejected in-flight calls on destroy");
        }
    }

    pub fn state(&self) -> WorkerState {
        *self.inner.lock_state()
    }

    /// Number of calls waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.len()
    }

    /// Generation of the most recently spawned worker (1 for the first).
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// OS pid of the live worker, if any.
    pub async fn pid(&self) -> Option<u32> {
        self.inner.process.lock().await.as_ref().and_then(|p| p.pid)
    }

    pub fn command(&self) -> &WorkerCommand {
        &self.inner.command
    }
}

impl BridgeInner {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, WorkerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn state(&self) -> WorkerState {
        *self.lock_state()
    }

    /// Move to `to` if the current state is one of `from`.
    fn transition(&self, from: &[WorkerState], to: WorkerState) -> bool {
        let mut state = self.lock_state();
        if from.contains(&state) {
            debug!(from = %*state, to = %to, "Worker state change");
            *state = to;
            true
        } else {
            false
        }
    }

    fn start_process(&self) -> Result<WorkerProcess, BridgeError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        spawn_worker(
            &self.command,
            generation,
            SpawnContext {
                pending: Arc::clone(&self.pending),
                hooks: Arc::clone(&self.hooks),
                exits: self.exits.clone(),
                request_ids: self.config.request_ids,
                debug: self.config.debug,
            },
        )
    }

    /// Make sure a worker is live, respawning lazily from `Down`. Returns
    /// the new generation when a respawn happened.
    fn ensure_running(&self, slot: &mut Option<WorkerProcess>) -> Result<Option<u64>, BridgeError> {
        match self.state() {
            WorkerState::Running if slot.is_some() => Ok(None),
            WorkerState::Running | WorkerState::Crashing | WorkerState::Restarting => {
                Err(BridgeError::WorkerCrashed {
                    reason: "worker is restarting".into(),
                })
            }
            WorkerState::Destroyed => Err(BridgeError::Destroyed),
            WorkerState::Down => {
                let process = self.start_process()?;
                let generation = process.generation;
                if !self.transition(&[WorkerState::Down], WorkerState::Running) {
                    return Err(BridgeError::Destroyed);
                }
                *slot = Some(process);
                info!(generation, "Worker respawned on demand");
                Ok(Some(generation))
            }
        }
    }

    /// One attempt: write the request, then wait for the response. The
    /// lock, the write and the wait all share one deadline.
    async fn call_once(
        &self,
        action: &str,
        params: &Value,
        timeout: Duration,
    ) -> Result<Value, BridgeError> {
        let deadline = Instant::now() + timeout;
        let timed_out = || BridgeError::Timeout {
            action: action.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        };

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let line = codec::encode_request(self.config.request_ids.then_some(id), action, params)?;
        let (tx, mut rx) = oneshot::channel();

        let respawned = {
            let Ok(mut slot) = tokio::time::timeout_at(deadline, self.process.lock()).await else {
                warn!(action, "Timed out waiting for the worker's input stream");
                return Err(timed_out());
            };
            let respawned = self.ensure_running(&mut slot)?;
            let Some(process) = slot.as_mut() else {
                return Err(BridgeError::WorkerCrashed {
                    reason: "no worker process".into(),
                });
            };

            self.pending.push(PendingCall::new(id, action, tx));
            let written = tokio::time::timeout_at(deadline, process.send_line(&line)).await;
            match written {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.pending.remove(id);
                    warn!(action, error = %e, "Failed to write to worker");
                    return Err(BridgeError::Io(e.to_string()));
                }
                Err(_) => {
                    self.pending.remove(id);
                    self.retire_stalled(&mut slot);
                    return Err(timed_out());
                }
            }
            respawned
        };

        if let Some(generation) = respawned {
            self.hooks.ready(generation);
        }
        if self.config.debug {
            info!(id, request = %codec::preview(&line, 200), "Worker call");
        }

        match tokio::time::timeout_at(deadline, &mut rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BridgeError::WorkerCrashed {
                reason: "response channel closed".into(),
            }),
            Err(_) => {
                if self.pending.remove(id) {
                    warn!(id, action, timeout_ms = timeout.as_millis() as u64, "Worker call timed out");
                    Err(timed_out())
                } else {
                    // Settled between the deadline and the removal.
                    rx.try_recv().unwrap_or_else(|_| Err(timed_out()))
                }
            }
        }
    }

    /// A write that missed its deadline left a partial line on the wire.
    /// Kill that worker and fail its in-flight calls; the next call
    /// respawns from `Down`.
    fn retire_stalled(&self, slot: &mut Option<WorkerProcess>) {
        let Some(process) = slot.take() else {
            return;
        };
        error!(generation = process.generation, "Worker stopped reading its input; retiring it");
        drop(process);
        self.transition(&[WorkerState::Running], WorkerState::Down);
        let rejected = self.pending.reject_all(BridgeError::WorkerCrashed {
            reason: "worker stopped reading requests".into(),
        });
        if rejected > 0 {
            warn!(rejected, "Rejected in-flight calls of a stalled worker");
        }
    }

    /// Crash path: reject everything in flight, retire the process, back
    /// off, then spawn a replacement.
    async fn handle_crash(&self, exit: WorkerExit) {
        {
            let mut slot = self.process.lock().await;
            let current = slot.as_ref().map(|p| p.generation);
            if current != Some(exit.generation)
                || !self.transition(&[WorkerState::Running], WorkerState::Crashing)
            {
                debug!(generation = exit.generation, "Ignoring exit of a retired worker");
                return;
            }

            error!(generation = exit.generation, reason = %exit.reason, "Worker crashed");
            let rejected = self.pending.reject_all(BridgeError::WorkerCrashed {
                reason: exit.reason.clone(),
            });
            if rejected > 0 {
                warn!(rejected, "Rejected in-flight calls after crash");
            }
            slot.take();
            self.transition(&[WorkerState::Crashing], WorkerState::Restarting);
        }

        tokio::time::sleep(self.config.restart_backoff()).await;

        let generation = {
            let mut slot = self.process.lock().await;
            if self.state() != WorkerState::Restarting {
                return;
            }
            match self.start_process() {
                Ok(process) => {
                    let generation = process.generation;
                    if !self.transition(&[WorkerState::Restarting], WorkerState::Running) {
                        return;
                    }
                    *slot = Some(process);
                    generation
                }
                Err(e) => {
                    self.transition(&[WorkerState::Restarting], WorkerState::Down);
                    error!(error = %e, "Worker restart failed; next call will retry");
                    return;
                }
            }
        };

        info!(generation, "Worker restarted");
        self.hooks.ready(generation);
    }
}

async fn supervise(inner: Weak<BridgeInner>, mut exits: mpsc::UnboundedReceiver<WorkerExit>) {
    while let Some(exit) = exits.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.handle_crash(exit).await;
    }
}

#[async_trait]
impl ActionWorker for WorkerBridge {
    async fn call(
        &self,
        action: &str,
        params: Value,
        options: CallOptions,
    ) -> Result<Value, BridgeError> {
        WorkerBridge::call(self, action, params, options).await
    }

    async fn set_cursor_visibility(&self, visible: bool) {
        let options = CallOptions::default()
            .with_timeout(CURSOR_TIMEOUT)
            .with_retries(0);
        let params = serde_json::json!({ "visible": visible });
        if let Err(e) = WorkerBridge::call(self, "setCursorVisibility", params, options).await {
            warn!(visible, error = %e, "Failed to set cursor visibility");
        }
    }
}

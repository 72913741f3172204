//! One generation of the worker child process and its I/O tasks.
//!
//! Each generation owns three tasks: a stdout reader that routes responses
//! into the pending queue, a stderr forwarder, and an exit watcher. The
//! watcher reports natural exits to the bridge's supervisor; dropping the
//! [`WorkerProcess`] handle tells it to kill the child instead.

use deskpilot_core::BridgeError;
use serde_json::Value;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bridge::Hooks;
use crate::codec::{self, Inbound};
use crate::command::WorkerCommand;
use crate::pending::{PendingQueue, Routed};

/// How long an exited worker's reader may keep draining buffered answers.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Report of a worker that exited on its own.
#[derive(Debug)]
pub(crate) struct WorkerExit {
    pub generation: u64,
    pub reason: String,
}

/// Everything a new generation needs from the bridge.
pub(crate) struct SpawnContext {
    pub pending: Arc<PendingQueue>,
    pub hooks: Arc<Hooks>,
    pub exits: mpsc::UnboundedSender<WorkerExit>,
    pub request_ids: bool,
    pub debug: bool,
}

/// Handle to a live worker. Dropping it kills the child.
pub(crate) struct WorkerProcess {
    pub generation: u64,
    pub pid: Option<u32>,
    stdin: ChildStdin,
    _kill: oneshot::Sender<()>,
}

impl WorkerProcess {
    /// Write one protocol line and flush it.
    pub async fn send_line(&mut self, line: &str) -> std::io::Result<()> {
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await
    }
}

/// Spawn the worker and its I/O tasks.
pub(crate) fn spawn_worker(
    command: &WorkerCommand,
    generation: u64,
    ctx: SpawnContext,
) -> Result<WorkerProcess, BridgeError> {
    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &command.cwd {
        cmd.current_dir(dir);
    }
    for (key, value) in &command.env {
        cmd.env(key, value);
    }

    let spawn_error = |reason: String| BridgeError::Spawn {
        program: command.program.clone(),
        reason,
    };

    let mut child = cmd.spawn().map_err(|e| spawn_error(e.to_string()))?;
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| spawn_error("stdin missing".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| spawn_error("stdout missing".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| spawn_error("stderr missing".into()))?;
    let pid = child.id();

    let reader = tokio::spawn(read_responses(
        stdout,
        ctx.pending,
        generation,
        ctx.request_ids,
        ctx.debug,
    ));
    let stderr_task = tokio::spawn(forward_stderr(stderr, ctx.hooks, generation));

    let (kill_tx, kill_rx) = oneshot::channel();
    tokio::spawn(watch_exit(
        child,
        generation,
        kill_rx,
        reader,
        stderr_task,
        ctx.exits,
    ));

    info!(generation, pid, command = %command, "Worker started");

    Ok(WorkerProcess {
        generation,
        pid,
        stdin,
        _kill: kill_tx,
    })
}

enum Stop {
    Exited(String),
    Killed,
}

async fn watch_exit(
    mut child: Child,
    generation: u64,
    mut kill_rx: oneshot::Receiver<()>,
    mut reader: JoinHandle<()>,
    stderr_task: JoinHandle<()>,
    exits: mpsc::UnboundedSender<WorkerExit>,
) {
    let stop = tokio::select! {
        status = child.wait() => Stop::Exited(match status {
            Ok(status) => status.to_string(),
            Err(e) => format!("wait failed: {e}"),
        }),
        _ = &mut kill_rx => Stop::Killed,
    };

    match stop {
        Stop::Killed => {
            if let Err(e) = child.start_kill() {
                debug!(generation, error = %e, "Worker already gone");
            }
            let _ = child.wait().await;
            reader.abort();
            stderr_task.abort();
            debug!(generation, "Worker stopped");
        }
        Stop::Exited(reason) => {
            // Answers written just before the exit may still be buffered.
            if tokio::time::timeout(READER_DRAIN_TIMEOUT, &mut reader)
                .await
                .is_err()
            {
                reader.abort();
            }
            let _ = exits.send(WorkerExit { generation, reason });
        }
    }
}

async fn read_responses(
    stdout: ChildStdout,
    pending: Arc<PendingQueue>,
    generation: u64,
    request_ids: bool,
    debug_wire: bool,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => route_line(&line, &pending, request_ids, debug_wire),
            Ok(None) => break,
            Err(e) => {
                warn!(generation, error = %e, "Worker stdout read failed");
                break;
            }
        }
    }
    debug!(generation, "Worker stdout closed");
}

/// Route one stdout line to the pending call it answers.
pub(crate) fn route_line(line: &str, pending: &PendingQueue, request_ids: bool, debug_wire: bool) {
    let (id, value) = match codec::decode_line(line) {
        Inbound::Empty => return,
        Inbound::Noise { reason } => {
            warn!(line = %codec::preview(line.trim(), 200), %reason, "Ignoring non-protocol worker output");
            return;
        }
        Inbound::Response { id, value } => (id, value),
    };

    if debug_wire {
        let execution_time_ms = value.get("execution_time_ms").and_then(Value::as_f64);
        info!(
            response = %codec::preview(line.trim(), 200),
            execution_time_ms,
            "Worker response"
        );
    }

    let routed = match id {
        Some(id) if request_ids => pending.resolve_id(id, value),
        _ => pending.resolve_oldest(value),
    };

    match routed {
        Routed::Resolved {
            id,
            action,
            elapsed_ms,
        } => debug!(id, action = %action, elapsed_ms = elapsed_ms as u64, "Worker call resolved"),
        Routed::Unmatched => warn!(
            line = %codec::preview(line.trim(), 200),
            "Discarding worker response with no pending call"
        ),
    }
}

async fn forward_stderr(stderr: ChildStderr, hooks: Arc<Hooks>, generation: u64) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        warn!(generation, "worker: {line}");
        hooks.stderr(line);
    }
}

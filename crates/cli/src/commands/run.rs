//! `deskpilot run` — Execute one goal end to end.

use deskpilot_agent::{Orchestrator, ReplayModel, RunOutcome};
use deskpilot_bridge::WorkerBridge;
use deskpilot_config::AppConfig;
use deskpilot_core::event::{AgentEvent, EventBus, LogLevel, RunState};
use deskpilot_core::worker::ActionWorker;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

pub async fn run(
    goal: String,
    script: PathBuf,
    max_steps: Option<u32>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if let Some(max_steps) = max_steps {
        config.run.max_steps = max_steps;
        config.validate()?;
    }

    let model = ReplayModel::from_file(&script)?;
    if model.is_empty() {
        return Err(format!("Script {} contains no events", script.display()).into());
    }

    let bridge = WorkerBridge::from_config(&config).await?;
    tracing::info!(worker = %bridge.command(), pid = ?bridge.pid().await, "Worker started");

    let events = Arc::new(EventBus::default());
    let orchestrator = Arc::new(
        Orchestrator::new(
            Arc::new(bridge.clone()) as Arc<dyn ActionWorker>,
            Arc::new(model),
            Arc::clone(&events),
        )
        .with_history_config(config.history.clone())
        .with_run_config(config.run.clone()),
    );
    bridge.on_ready(orchestrator.ready_hook());

    let mut rx = events.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Some(line) = format_event(&event) {
                        println!("{line}");
                    }
                    if matches!(
                        *event,
                        AgentEvent::Status {
                            state: RunState::Idle
                        }
                    ) {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event printer fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let stop = orchestrator.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n  Stopping after the current step...");
            stop.stop();
        }
    });

    let result = orchestrator.run(&goal).await;
    let _ = tokio::time::timeout(Duration::from_secs(1), printer).await;
    bridge.destroy().await;

    let summary = result?;
    println!();
    match &summary.outcome {
        RunOutcome::Completed { message } => println!("  ✅ Completed: {message}"),
        RunOutcome::StreamEnded => println!("  ⏹️  Model stream ended"),
        RunOutcome::Stopped => println!("  🛑 Stopped"),
    }
    println!("  Steps: {}", summary.steps);
    Ok(())
}

/// Render an event as one terminal line. Step counters are not printed.
fn format_event(event: &AgentEvent) -> Option<String> {
    let line = match event {
        AgentEvent::Log { level, message, .. } => {
            let icon = match level {
                LogLevel::Info => "ℹ️ ",
                LogLevel::Success => "✅",
                LogLevel::Error => "❌",
                LogLevel::Hint => "💡",
                LogLevel::Action => "👉",
            };
            format!("  {icon} {message}")
        }
        AgentEvent::Status { state } => format!("  [status] {state:?}"),
        AgentEvent::Error { message } => format!("  ❌ {message}"),
        AgentEvent::Thinking { .. }
        | AgentEvent::Completed { .. }
        | AgentEvent::ActionProgress { .. }
        | AgentEvent::Step { .. }
        | AgentEvent::RunCompleted => return None,
    };
    Some(line)
}

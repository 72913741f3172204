//! DeskPilot CLI — the main entry point.
//!
//! Commands:
//! - `run`     — Execute a goal against the worker, driven by a model script
//! - `call`    — Send a single action to the worker
//! - `doctor`  — Diagnose config and worker health
//! - `config`  — Show, validate or locate the configuration

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "deskpilot",
    about = "DeskPilot — desktop automation agent control process",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a goal; model events come from a JSONL script
    Run {
        /// What the agent should accomplish
        goal: String,

        /// Model event script (one JSON event per line)
        #[arg(short, long)]
        script: std::path::PathBuf,

        /// Override the step ceiling
        #[arg(long)]
        max_steps: Option<u32>,
    },

    /// Send one action to the worker and print its response
    Call {
        /// Action name, e.g. `size` or `screenshot`
        action: String,

        /// Action parameters as a JSON object
        #[arg(short, long, default_value = "{}")]
        params: String,

        /// Per-attempt timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Diagnose config and worker health
    Doctor,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Validate the configuration file
    Validate,
    /// Print the configuration file path
    Path,
    /// Print the default configuration
    Default,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries events and responses
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            goal,
            script,
            max_steps,
        } => commands::run::run(goal, script, max_steps).await?,
        Commands::Call {
            action,
            params,
            timeout_ms,
        } => commands::call::run(action, params, timeout_ms).await?,
        Commands::Doctor => commands::doctor::run().await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show().await?,
            ConfigAction::Validate => commands::config_cmd::validate().await?,
            ConfigAction::Path => commands::config_cmd::path().await?,
            ConfigAction::Default => commands::config_cmd::default().await?,
        },
    }

    Ok(())
}

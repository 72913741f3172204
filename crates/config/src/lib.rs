//! Configuration loading, validation, and management for DeskPilot.
//!
//! Loads configuration from `~/.deskpilot/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.deskpilot/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// How to launch the action worker
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Call timeout, retry and restart policy
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Conversation history limits and compression caps
    #[serde(default)]
    pub history: HistoryConfig,

    /// Execution loop settings
    #[serde(default)]
    pub run: RunConfig,
}

/// Worker launch settings.
///
/// A prebuilt executor binary wins when it is configured and exists on
/// disk; otherwise the interpreter runs the executor script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary: Option<String>,

    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    #[serde(default = "default_script")]
    pub script: String,
}

fn default_interpreter() -> String {
    "venv/bin/python".into()
}
fn default_script() -> String {
    "src/executor/main.py".into()
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            binary: None,
            interpreter: default_interpreter(),
            script: default_script(),
        }
    }
}

impl WorkerConfig {
    /// Resolve the program and arguments used to spawn the worker.
    pub fn command(&self) -> (String, Vec<String>) {
        match &self.binary {
            Some(binary) if Path::new(binary).exists() => (binary.clone(), Vec::new()),
            Some(binary) => {
                tracing::warn!(binary = %binary, "Executor binary not found, falling back to interpreter");
                (self.interpreter.clone(), vec![self.script.clone()])
            }
            None => (self.interpreter.clone(), vec![self.script.clone()]),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Per-attempt deadline
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Retries after the first attempt
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Base of the exponential retry backoff (`base * 2^attempt`)
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    /// Pause between a crash and the replacement spawn
    #[serde(default = "default_restart_backoff_ms")]
    pub restart_backoff_ms: u64,

    /// Tag requests with ids and correlate answers by id when echoed
    #[serde(default)]
    pub request_ids: bool,

    /// Verbose wire logging
    #[serde(default)]
    pub debug: bool,
}

fn default_timeout_ms() -> u64 {
    30_000
}
fn default_retries() -> u32 {
    3
}
fn default_retry_base_ms() -> u64 {
    1_000
}
fn default_restart_backoff_ms() -> u64 {
    1_000
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            retries: default_retries(),
            retry_base_ms: default_retry_base_ms(),
            restart_backoff_ms: default_restart_backoff_ms(),
            request_ids: false,
            debug: false,
        }
    }
}

impl BridgeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_base(&self) -> Duration {
        Duration::from_millis(self.retry_base_ms)
    }

    pub fn restart_backoff(&self) -> Duration {
        Duration::from_millis(self.restart_backoff_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,

    /// Share of `max_messages` always kept as the recent tail
    #[serde(default = "default_recent_ratio")]
    pub recent_ratio: f32,

    #[serde(default = "default_max_text_chars")]
    pub max_text_chars: usize,

    #[serde(default = "default_max_ui_nodes")]
    pub max_ui_nodes: usize,

    #[serde(default = "default_max_ui_depth")]
    pub max_ui_depth: usize,

    #[serde(default = "default_max_ui_children")]
    pub max_ui_children: usize,

    #[serde(default = "default_max_observations")]
    pub max_observations: usize,

    /// Tools whose responses are re-fetchable UI trees
    #[serde(default = "default_ui_tools")]
    pub ui_tools: Vec<String>,
}

fn default_max_messages() -> usize {
    24
}
fn default_recent_ratio() -> f32 {
    0.4
}
fn default_max_text_chars() -> usize {
    1000
}
fn default_max_ui_nodes() -> usize {
    200
}
fn default_max_ui_depth() -> usize {
    2
}
fn default_max_ui_children() -> usize {
    20
}
fn default_max_observations() -> usize {
    8
}
fn default_ui_tools() -> Vec<String> {
    vec!["elementsJson".into(), "webElements".into()]
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            recent_ratio: default_recent_ratio(),
            max_text_chars: default_max_text_chars(),
            max_ui_nodes: default_max_ui_nodes(),
            max_ui_depth: default_max_ui_depth(),
            max_ui_children: default_max_ui_children(),
            max_observations: default_max_observations(),
            ui_tools: default_ui_tools(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Map 0..=1000 model coordinates to screen pixels
    #[serde(default = "default_true")]
    pub normalized_coordinates: bool,
}

fn default_max_steps() -> u32 {
    30
}
fn default_true() -> bool {
    true
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            normalized_coordinates: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.deskpilot/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `DESKPILOT_EXECUTOR_BINARY`, `DESKPILOT_PYTHON_PATH`, `DESKPILOT_EXECUTOR_PATH`
    /// - `DESKPILOT_TIMEOUT_MS`, `DESKPILOT_RETRIES`, `DESKPILOT_MAX_STEPS`
    /// - `DESKPILOT_DEBUG`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// production).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(binary) = lookup("DESKPILOT_EXECUTOR_BINARY") {
            self.worker.binary = Some(binary);
        }
        if let Some(python) = lookup("DESKPILOT_PYTHON_PATH") {
            self.worker.interpreter = python;
        }
        if let Some(script) = lookup("DESKPILOT_EXECUTOR_PATH") {
            self.worker.script = script;
        }
        if let Some(value) = lookup("DESKPILOT_TIMEOUT_MS") {
            self.bridge.timeout_ms = parse_env("DESKPILOT_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = lookup("DESKPILOT_RETRIES") {
            self.bridge.retries = parse_env("DESKPILOT_RETRIES", &value)?;
        }
        if let Some(value) = lookup("DESKPILOT_MAX_STEPS") {
            self.run.max_steps = parse_env("DESKPILOT_MAX_STEPS", &value)?;
        }
        if let Some(value) = lookup("DESKPILOT_DEBUG") {
            self.bridge.debug = matches!(value.as_str(), "1" | "true" | "yes");
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".deskpilot")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.history.recent_ratio > 0.0 && self.history.recent_ratio <= 1.0) {
            return Err(ConfigError::ValidationError(
                "history.recent_ratio must be in (0.0, 1.0]".into(),
            ));
        }

        if self.history.max_messages == 0 {
            return Err(ConfigError::ValidationError(
                "history.max_messages must be at least 1".into(),
            ));
        }

        if self.run.max_steps == 0 {
            return Err(ConfigError::ValidationError(
                "run.max_steps must be at least 1".into(),
            ));
        }

        if self.bridge.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "bridge.timeout_ms must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| {
        ConfigError::ValidationError(format!("{key} has an invalid value: {value}"))
    })
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

//! `deskpilot call` — Send a single action to the worker.

use deskpilot_bridge::WorkerBridge;
use deskpilot_config::AppConfig;
use deskpilot_core::worker::CallOptions;
use serde_json::Value;
use std::time::Duration;

pub async fn run(
    action: String,
    params: String,
    timeout_ms: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let params = parse_params(&params)?;

    let mut options = CallOptions::default();
    if let Some(ms) = timeout_ms {
        options = options.with_timeout(Duration::from_millis(ms));
    }

    let bridge = WorkerBridge::from_config(&config).await?;
    let result = bridge.call(&action, params, options).await;
    bridge.destroy().await;

    let response = result?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

/// Parameters must be a JSON object; an empty string means `{}`.
fn parse_params(raw: &str) -> Result<Value, Box<dyn std::error::Error>> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    let value: Value =
        serde_json::from_str(raw).map_err(|e| format!("--params is not valid JSON: {e}"))?;
    if !value.is_object() {
        return Err("--params must be a JSON object".into());
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn params_must_be_an_object() {
        assert_eq!(parse_params(r#"{"x": 1}"#).unwrap(), json!({"x": 1}));
        assert_eq!(parse_params("  ").unwrap(), json!({}));
        assert!(parse_params("[1]").is_err());
        assert!(parse_params("{oops").is_err());
    }
}

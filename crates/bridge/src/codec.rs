//! Line codec for the worker protocol.
//!
//! Outbound: one JSON object per line, `{"action": .., "params": {..}}`,
//! plus `"id"` when request ids are enabled. Inbound: any JSON object is a
//! response; everything else is worker chatter.

use deskpilot_core::BridgeError;
use serde_json::{Map, Value};

/// Result of decoding one inbound line.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Blank line.
    Empty,
    /// Diagnostic output that is not a protocol message.
    Noise { reason: String },
    /// A response object. `id` is set when the worker echoed a numeric id.
    Response { id: Option<u64>, value: Value },
}

/// Encode one request line (without the trailing newline).
pub fn encode_request(id: Option<u64>, action: &str, params: &Value) -> Result<String, BridgeError> {
    let params = match params {
        Value::Null => Value::Object(Map::new()),
        other => other.clone(),
    };

    let mut request = Map::new();
    request.insert("action".into(), Value::String(action.to_string()));
    request.insert("params".into(), params);
    if let Some(id) = id {
        request.insert("id".into(), Value::from(id));
    }

    serde_json::to_string(&Value::Object(request))
        .map_err(|e| BridgeError::Serialization(e.to_string()))
}

/// Decode one line read from the worker's stdout.
pub fn decode_line(line: &str) -> Inbound {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Inbound::Empty;
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(value @ Value::Object(_)) => {
            let id = value.get("id").and_then(Value::as_u64);
            Inbound::Response { id, value }
        }
        Ok(other) => Inbound::Noise {
            reason: format!("expected a JSON object, got {}", json_kind(&other)),
        },
        Err(e) => Inbound::Noise {
            reason: e.to_string(),
        },
    }
}

/// Shorten a payload for debug logging.
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

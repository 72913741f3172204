//! Compression of structured UI payloads.
//!
//! Accessibility and DOM dumps dominate the token budget but can always be
//! fetched again, so before a request goes to the model their responses
//! are cut down: depth capped, arrays capped, verbose keys dropped and long
//! strings truncated. Re-applying the compression changes nothing.

use deskpilot_config::HistoryConfig;
use deskpilot_core::message::{Message, Part};
use serde_json::{Map, Value};

/// Replaces any value nested deeper than the depth cap.
pub const TRUNCATION_MARKER: &str = "[truncated]";

/// Appended to strings cut at the character cap.
pub const TRUNCATION_SUFFIX: &str = "...[truncated]";

const DROPPED_KEYS: [&str; 2] = ["description", "help"];
const CHILDREN_KEY: &str = "children";

/// Compress every UI-tool response in `message`. Other parts are untouched.
pub fn compress_message(message: &Message, config: &HistoryConfig) -> Message {
    let parts = message
        .parts
        .iter()
        .map(|part| match part {
            Part::FunctionResponse(response)
                if is_ui_tool(&response.name, config)
                    && (response.response.is_object() || response.response.is_array()) =>
            {
                let mut response = response.clone();
                response.response = compress_value(&response.response, config);
                Part::FunctionResponse(response)
            }
            other => other.clone(),
        })
        .collect();

    Message {
        parts,
        ..message.clone()
    }
}

/// Compress one payload, starting at depth 0.
pub fn compress_value(value: &Value, config: &HistoryConfig) -> Value {
    compress_node(value, 0, config.max_ui_nodes, config)
}

fn is_ui_tool(name: &str, config: &HistoryConfig) -> bool {
    config.ui_tools.iter().any(|t| t == name)
}

fn compress_node(value: &Value, depth: usize, array_cap: usize, config: &HistoryConfig) -> Value {
    if depth > config.max_ui_depth {
        return Value::String(TRUNCATION_MARKER.into());
    }

    match value {
        Value::Array(items) => Value::Array(
            items
                .iter()
                .take(array_cap)
                .map(|item| compress_node(item, depth + 1, config.max_ui_nodes, config))
                .collect(),
        ),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, child) in map {
                if DROPPED_KEYS.contains(&key.as_str()) {
                    continue;
                }
                let cap = if key == CHILDREN_KEY {
                    config.max_ui_children
                } else {
                    config.max_ui_nodes
                };
                out.insert(key.clone(), compress_node(child, depth + 1, cap, config));
            }
            Value::Object(out)
        }
        Value::String(text) => truncate_text(text, config.max_text_chars),
        scalar => scalar.clone(),
    }
}

fn truncate_text(text: &str, max_chars: usize) -> Value {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => Value::String(format!("{}{TRUNCATION_SUFFIX}", &text[..idx])),
        None => Value::String(text.to_string()),
    }
}

//! Message and Part domain types.
//!
//! These are the value objects that flow between the model session, the
//! context manager and the worker:
//! model emits a `FunctionCall` part → the loop forwards it to the worker →
//! the worker's answer comes back as a `FunctionResponse` part.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The role of a message sender in the conversation history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user (goal, hints)
    User,
    /// The language model
    Model,
    /// A tool result folded back into the conversation
    Function,
}

/// A tool invocation emitted by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

impl FunctionCall {
    pub fn new(name: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// Read a string argument, if present.
    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(|v| v.as_str())
    }
}

/// The result of a tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub name: String,
    #[serde(default)]
    pub response: serde_json::Value,
}

/// Inline binary payload (screenshots, mostly).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    /// Base64-encoded bytes
    pub data: String,
}

/// One part of a message.
///
/// Serialized externally tagged, e.g. `{"text": "..."}` or
/// `{"functionCall": {"name": "click", "args": {...}}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Part {
    Text(String),
    FunctionCall(FunctionCall),
    FunctionResponse(FunctionResponse),
    InlineData(InlineData),
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn call(name: impl Into<String>, args: serde_json::Value) -> Self {
        Self::FunctionCall(FunctionCall::new(name, args))
    }

    pub fn response(name: impl Into<String>, response: serde_json::Value) -> Self {
        Self::FunctionResponse(FunctionResponse {
            name: name.into(),
            response,
        })
    }

    pub fn image(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self::InlineData(InlineData {
            mime_type: mime_type.into(),
            data: data.into(),
        })
    }
}

/// A single entry in the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who produced this message
    pub role: Role,

    /// Ordered content parts
    pub parts: Vec<Part>,

    /// Creation time; trimming restores temporal order from this
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    /// Importance in [0, 1]. `None` until the context manager scores it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub importance: Option<f32>,

    /// Insertion sequence assigned by the context manager (tie-breaker
    /// for equal timestamps).
    #[serde(default, skip_serializing)]
    pub seq: u64,
}

impl Message {
    /// Create a message with the given role and parts.
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self {
            role,
            parts,
            timestamp: Utc::now(),
            importance: None,
            seq: 0,
        }
    }

    /// Create a user text message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![Part::text(text)])
    }

    /// Create a model message.
    pub fn model(parts: Vec<Part>) -> Self {
        Self::new(Role::Model, parts)
    }

    /// Create a model text message.
    pub fn model_text(text: impl Into<String>) -> Self {
        Self::new(Role::Model, vec![Part::text(text)])
    }

    /// Create a function-result message for a worker response.
    pub fn function_result(name: impl Into<String>, response: serde_json::Value) -> Self {
        Self::new(Role::Function, vec![Part::response(name, response)])
    }

    /// Pin the importance instead of letting the context manager score it.
    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = Some(importance.clamp(0.0, 1.0));
        self
    }

    /// All tool calls carried by this message, in order.
    pub fn function_calls(&self) -> impl Iterator<Item = &FunctionCall> {
        self.parts.iter().filter_map(|p| match p {
            Part::FunctionCall(call) => Some(call),
            _ => None,
        })
    }

    /// Concatenated text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_user_message() {
        let msg = Message::user("Open Safari");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.text(), "Open Safari");
        assert!(msg.importance.is_none());
    }

    #[test]
    fn part_wire_shape() {
        let part = Part::call("click", serde_json::json!({"x": 10, "y": 20}));
        let json = serde_json::to_string(&part).unwrap();
        assert!(json.contains(r#""functionCall""#));
        assert!(json.contains(r#""name":"click""#));

        let image = Part::image("image/jpeg", "AAAA");
        let json = serde_json::to_string(&image).unwrap();
        assert!(json.contains(r#""inlineData""#));
        assert!(json.contains(r#""mimeType":"image/jpeg""#));
    }

    #[test]
    fn message_parses_without_timestamp() {
        let json = r#"{"role":"model","parts":[{"text":"hi"},{"functionCall":{"name":"done","args":{"message":"ok"}}}]}"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.role, Role::Model);
        let calls: Vec<_> = msg.function_calls().collect();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].str_arg("message"), Some("ok"));
    }

    #[test]
    fn importance_is_clamped() {
        let msg = Message::model_text("x").with_importance(3.0);
        assert_eq!(msg.importance, Some(1.0));
    }
}

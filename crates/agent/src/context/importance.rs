//! Importance scoring for history entries.
//!
//! A score is computed once, when a message enters the history, and never
//! changes. Older messages are evicted lowest-score first.

use deskpilot_core::message::{FunctionResponse, Message, Part};
use serde_json::Value;

pub const BASE_SCORE: f32 = 0.5;
pub const ERROR_BONUS: f32 = 0.3;
pub const COMPLETION_BONUS: f32 = 0.3;
pub const PLANNING_BONUS: f32 = 0.2;
pub const IMAGE_BONUS: f32 = 0.1;
/// Re-fetchable UI trees are the cheapest thing to lose.
pub const UI_DATA_PENALTY: f32 = 0.1;

/// Score a message in [0, 1]. Every part contributes.
pub fn score(message: &Message, ui_tools: &[String]) -> f32 {
    let mut score = BASE_SCORE;

    for part in &message.parts {
        match part {
            Part::Text(text) => {
                if mentions_error(text) {
                    score += ERROR_BONUS;
                }
                if text.contains("完了") {
                    score += COMPLETION_BONUS;
                }
            }
            Part::FunctionCall(call) => {
                if call.name == "done" {
                    score += COMPLETION_BONUS;
                }
                if call.name == "think" && call.str_arg("phase") == Some("planning") {
                    score += PLANNING_BONUS;
                }
            }
            Part::FunctionResponse(response) => {
                if is_error_response(response) {
                    score += ERROR_BONUS;
                }
                if response.name == "done" {
                    score += COMPLETION_BONUS;
                }
                if ui_tools.iter().any(|t| *t == response.name) {
                    score -= UI_DATA_PENALTY;
                }
            }
            Part::InlineData(data) => {
                if data.mime_type.starts_with("image/") {
                    score += IMAGE_BONUS;
                }
            }
        }
    }

    score.clamp(0.0, 1.0)
}

fn mentions_error(text: &str) -> bool {
    text.to_lowercase().contains("error") || text.contains("エラー")
}

fn is_error_response(response: &FunctionResponse) -> bool {
    let payload = &response.response;
    payload.get("status").and_then(Value::as_str) == Some("error")
        || payload.get("error").is_some_and(|e| !e.is_null())
}

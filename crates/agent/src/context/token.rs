//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~4 characters per token, with a fixed
//! surcharge for inline images. Deterministic and monotonic in content
//! size, which is all the trimming and stats code needs.

use deskpilot_core::message::{Message, Part};

/// Characters charged for one inline data part.
pub const INLINE_DATA_CHARS: usize = 100;

/// Estimate the token count for a character count. Rounds up.
pub fn estimate_tokens(chars: usize) -> usize {
    chars.div_ceil(4)
}

/// Characters a single part contributes to the estimate.
pub fn part_chars(part: &Part) -> usize {
    match part {
        Part::Text(text) => text.chars().count(),
        Part::FunctionCall(call) => json_chars(call),
        Part::FunctionResponse(response) => json_chars(response),
        Part::InlineData(_) => INLINE_DATA_CHARS,
    }
}

/// Estimate tokens for a single message.
pub fn estimate_message_tokens(message: &Message) -> usize {
    estimate_tokens(message.parts.iter().map(part_chars).sum())
}

/// Estimate tokens for a slice of messages.
pub fn estimate_messages_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

fn json_chars<T: serde::Serialize>(value: &T) -> usize {
    serde_json::to_string(value)
        .map(|s| s.chars().count())
        .unwrap_or_default()
}

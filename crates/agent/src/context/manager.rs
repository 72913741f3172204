//! The context manager: owner of the conversation history.
//!
//! History is append-only except for trimming. When it grows past
//! `max_messages`, a recent tail is kept verbatim and the older head is
//! thinned by importance; survivors keep their content and their relative
//! arrival order.

use deskpilot_config::HistoryConfig;
use deskpilot_core::message::Message;
use serde::Serialize;
use tracing::debug;

use super::compress;
use super::importance;
use super::snapshot::{ContextSnapshot, SnapshotUpdate};
use super::token;

/// Importance pinned on generated summary messages.
pub const SUMMARY_IMPORTANCE: f32 = 0.9;

/// Size of the history as seen by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ContextStats {
    pub message_count: usize,
    pub estimated_tokens: usize,
    pub has_snapshot: bool,
    /// Trimming passes since the last `clear()`
    pub trim_passes: u64,
    /// Messages evicted since the last `clear()`
    pub evicted_messages: u64,
}

pub struct ContextManager {
    config: HistoryConfig,
    messages: Vec<Message>,
    snapshot: Option<ContextSnapshot>,
    next_seq: u64,
    trim_passes: u64,
    evicted_messages: u64,
}

impl Default for ContextManager {
    fn default() -> Self {
        Self::new(HistoryConfig::default())
    }
}

impl ContextManager {
    pub fn new(config: HistoryConfig) -> Self {
        Self {
            config,
            messages: Vec::new(),
            snapshot: None,
            next_seq: 0,
            trim_passes: 0,
            evicted_messages: 0,
        }
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    /// Append a message, scoring it if it carries no importance yet, then
    /// trim if the history is over budget.
    pub fn add_message(&mut self, mut message: Message) {
        if message.importance.is_none() {
            message.importance = Some(importance::score(&message, &self.config.ui_tools));
        }
        message.seq = self.next_seq;
        self.next_seq += 1;

        self.messages.push(message);
        self.trim_if_needed();
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// The history with every UI payload compressed, ready for a model request.
    pub fn compressed_messages(&self) -> Vec<Message> {
        self.messages
            .iter()
            .map(|m| compress::compress_message(m, &self.config))
            .collect()
    }

    pub fn compress_ui_data(&self, message: &Message) -> Message {
        compress::compress_message(message, &self.config)
    }

    pub fn update_snapshot(&mut self, update: SnapshotUpdate) {
        self.snapshot
            .get_or_insert_with(ContextSnapshot::default)
            .apply(update);
    }

    pub fn snapshot(&self) -> Option<&ContextSnapshot> {
        self.snapshot.as_ref()
    }

    /// Remove and return the snapshot.
    pub fn take_snapshot(&mut self) -> Option<ContextSnapshot> {
        self.snapshot.take()
    }

    /// Append an action name to the snapshot's completed actions.
    pub fn record_action(&mut self, action: impl Into<String>) {
        self.snapshot
            .get_or_insert_with(ContextSnapshot::default)
            .completed_actions
            .push(action.into());
    }

    /// Append a key observation, keeping the newest `max_observations`.
    pub fn record_observation(&mut self, observation: impl Into<String>) {
        let cap = self.config.max_observations;
        self.snapshot
            .get_or_insert_with(ContextSnapshot::default)
            .observe(observation, cap);
    }

    /// Render the snapshot as a model-role summary message that survives
    /// trimming. `None` until a snapshot exists.
    pub fn generate_summary_message(&self) -> Option<Message> {
        self.snapshot
            .as_ref()
            .map(|s| Message::model_text(s.render()).with_importance(SUMMARY_IMPORTANCE))
    }

    pub fn trim_passes(&self) -> u64 {
        self.trim_passes
    }

    pub fn stats(&self) -> ContextStats {
        ContextStats {
            message_count: self.messages.len(),
            estimated_tokens: token::estimate_messages_tokens(&self.messages),
            has_snapshot: self.snapshot.is_some(),
            trim_passes: self.trim_passes,
            evicted_messages: self.evicted_messages,
        }
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.snapshot = None;
        self.trim_passes = 0;
        self.evicted_messages = 0;
    }

    /// Size of the always-kept recent tail.
    fn recent_window(&self) -> usize {
        let max = self.config.max_messages;
        ((max as f32 * self.config.recent_ratio).ceil() as usize).min(max)
    }

    fn trim_if_needed(&mut self) {
        let max = self.config.max_messages;
        let before = self.messages.len();
        if before <= max {
            return;
        }

        let recent_count = self.recent_window();
        let split = before - recent_count;
        let recent = self.messages.split_off(split);
        let mut older = std::mem::take(&mut self.messages);

        // Stable: equal scores keep their original (oldest-first) order.
        older.sort_by(|a, b| {
            b.importance
                .unwrap_or(0.0)
                .total_cmp(&a.importance.unwrap_or(0.0))
        });
        older.truncate(max - recent_count);

        let mut kept = older;
        kept.extend(recent);
        // Timestamps come from whoever built the message; seq is arrival order.
        kept.sort_by_key(|m| m.seq);

        let evicted = before - kept.len();
        self.messages = kept;
        self.trim_passes += 1;
        self.evicted_messages += evicted as u64;
        debug!(before, after = self.messages.len(), evicted, "Trimmed history");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use deskpilot_core::message::Part;
    use serde_json::json;

    fn config(max_messages: usize) -> HistoryConfig {
        HistoryConfig {
            max_messages,
            ..HistoryConfig::default()
        }
    }

    fn at(text: &str, offset_secs: i64) -> Message {
        let mut msg = Message::user(text);
        msg.timestamp = Utc::now() + Duration::seconds(offset_secs);
        msg
    }

    #[test]
    fn scores_on_insert_and_keeps_pinned_importance() {
        let mut ctx = ContextManager::default();
        ctx.add_message(Message::user("an error happened"));
        ctx.add_message(Message::user("pinned").with_importance(0.1));

        let msgs = ctx.messages();
        assert!((msgs[0].importance.unwrap() - 0.8).abs() < 1e-5);
        assert_eq!(msgs[1].importance, Some(0.1));
        assert_eq!((msgs[0].seq, msgs[1].seq), (0, 1));
    }

    #[test]
    fn recent_window_rounds_up() {
        assert_eq!(ContextManager::new(config(24)).recent_window(), 10);
        assert_eq!(ContextManager::new(config(10)).recent_window(), 4);
        assert_eq!(ContextManager::new(config(1)).recent_window(), 1);
    }

    #[test]
    fn trimming_bounds_size_and_keeps_recent_tail() {
        let max = 10;
        let mut ctx = ContextManager::new(config(max));
        for i in 0..(max + 7) {
            ctx.add_message(at(&format!("m{i}"), i as i64));
        }

        let texts: Vec<String> = ctx.messages().iter().map(Message::text).collect();
        assert!(texts.len() <= max);
        // The 4 newest originals are present.
        for i in (max + 7 - 4)..(max + 7) {
            assert!(texts.contains(&format!("m{i}")), "missing m{i}");
        }
        assert!(ctx.stats().trim_passes > 0);
        assert_eq!(ctx.stats().evicted_messages, 7);
    }

    #[test]
    fn important_old_messages_survive() {
        let max = 10;
        let mut ctx = ContextManager::new(config(max));
        ctx.add_message(at("critical", 0).with_importance(1.0));
        for i in 1..=max as i64 + 5 {
            ctx.add_message(at(&format!("filler {i}"), i));
        }

        let msgs = ctx.messages();
        assert_eq!(msgs.len(), max);
        assert_eq!(msgs[0].text(), "critical");
    }

    #[test]
    fn trimming_preserves_temporal_order_and_content() {
        let mut ctx = ContextManager::new(config(6));
        for i in 0..12 {
            let msg = if i % 3 == 0 {
                at(&format!("error {i}"), i)
            } else {
                at(&format!("note {i}"), i)
            };
            ctx.add_message(msg);
        }

        let msgs = ctx.messages();
        assert!(msgs.windows(2).all(|w| w[0].seq < w[1].seq));
        for msg in msgs {
            let n: usize = msg.text().split(' ').nth(1).unwrap().parse().unwrap();
            let expected = if n % 3 == 0 { format!("error {n}") } else { format!("note {n}") };
            assert_eq!(msg.text(), expected);
        }
    }

    #[test]
    fn survivors_keep_arrival_order_whatever_their_timestamps() {
        let mut ctx = ContextManager::new(config(4));
        // Alternate old and new stamps, as with pre-built model turns
        // interleaved with fresh worker results.
        for i in 0..12 {
            let offset = if i % 2 == 0 { -3600 } else { i };
            ctx.add_message(at(&format!("m{i}"), offset));
        }

        let seqs: Vec<u64> = ctx.messages().iter().map(|m| m.seq).collect();
        assert!(seqs.windows(2).all(|w| w[0] < w[1]), "{seqs:?}");
        // The ceil(0.4 * 4) = 2 newest arrivals are always present.
        assert!(seqs.contains(&10) && seqs.contains(&11), "{seqs:?}");
        assert_eq!(ctx.messages().len(), 4);
    }

    #[test]
    fn summary_requires_snapshot() {
        let mut ctx = ContextManager::default();
        assert!(ctx.generate_summary_message().is_none());

        ctx.update_snapshot(SnapshotUpdate::goal("Book a table").with_phase("planning"));
        ctx.record_action("click");
        ctx.record_observation("reservation form visible");

        let summary = ctx.generate_summary_message().unwrap();
        assert_eq!(summary.importance, Some(SUMMARY_IMPORTANCE));
        assert!(summary.text().contains("Book a table"));
        assert!(summary.text().contains("- Completed Actions: click"));
        assert!(summary.text().contains("- reservation form visible"));
    }

    #[test]
    fn stats_track_size() {
        let mut ctx = ContextManager::default();
        assert_eq!(ctx.stats().estimated_tokens, 0);
        assert!(!ctx.stats().has_snapshot);

        ctx.add_message(Message::user("a".repeat(40)));
        let small = ctx.stats().estimated_tokens;
        ctx.add_message(Message::model(vec![Part::image("image/png", "AAAA")]));
        let stats = ctx.stats();
        assert_eq!(small, 10);
        assert_eq!(stats.estimated_tokens, 10 + 25);
        assert_eq!(stats.message_count, 2);
    }

    #[test]
    fn clear_resets_everything() {
        let mut ctx = ContextManager::new(config(2));
        ctx.update_snapshot(SnapshotUpdate::goal("g"));
        for i in 0..5 {
            ctx.add_message(at(&format!("m{i}"), i));
        }
        ctx.clear();

        let stats = ctx.stats();
        assert_eq!(stats.message_count, 0);
        assert!(!stats.has_snapshot);
        assert_eq!(stats.trim_passes, 0);
    }

    #[test]
    fn compressed_messages_leave_history_untouched() {
        let mut ctx = ContextManager::default();
        ctx.add_message(Message::function_result(
            "elementsJson",
            json!({"description": "verbose", "role": "AXWindow"}),
        ));

        let compressed = ctx.compressed_messages();
        assert!(serde_json::to_string(&compressed[0]).unwrap().contains("AXWindow"));
        assert!(!serde_json::to_string(&compressed[0]).unwrap().contains("verbose"));
        assert!(serde_json::to_string(&ctx.messages()[0]).unwrap().contains("verbose"));
    }
}

//! Progress snapshot: a compact record of where a run stands.

use serde::{Deserialize, Serialize};

/// Goal, progress and observations of the current run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub goal: String,
    pub completed_actions: Vec<String>,
    pub current_phase: String,
    pub key_observations: Vec<String>,
}

/// Partial update; every `Some` field overwrites the snapshot's value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotUpdate {
    pub goal: Option<String>,
    pub completed_actions: Option<Vec<String>>,
    pub current_phase: Option<String>,
    pub key_observations: Option<Vec<String>>,
}

impl SnapshotUpdate {
    pub fn goal(goal: impl Into<String>) -> Self {
        Self {
            goal: Some(goal.into()),
            ..Self::default()
        }
    }

    pub fn phase(phase: impl Into<String>) -> Self {
        Self {
            current_phase: Some(phase.into()),
            ..Self::default()
        }
    }

    pub fn with_phase(mut self, phase: impl Into<String>) -> Self {
        self.current_phase = Some(phase.into());
        self
    }

    pub fn with_completed_actions(mut self, actions: Vec<String>) -> Self {
        self.completed_actions = Some(actions);
        self
    }

    pub fn with_observations(mut self, observations: Vec<String>) -> Self {
        self.key_observations = Some(observations);
        self
    }
}

impl ContextSnapshot {
    pub fn apply(&mut self, update: SnapshotUpdate) {
        if let Some(goal) = update.goal {
            self.goal = goal;
        }
        if let Some(actions) = update.completed_actions {
            self.completed_actions = actions;
        }
        if let Some(phase) = update.current_phase {
            self.current_phase = phase;
        }
        if let Some(observations) = update.key_observations {
            self.key_observations = observations;
        }
    }

    /// Append an observation, keeping only the newest `cap`.
    pub fn observe(&mut self, observation: impl Into<String>, cap: usize) {
        self.key_observations.push(observation.into());
        if self.key_observations.len() > cap {
            let excess = self.key_observations.len() - cap;
            self.key_observations.drain(..excess);
        }
    }

    /// Render as the markdown block used for the summary message.
    pub fn render(&self) -> String {
        let goal = non_empty_or(&self.goal, "Not specified");
        let actions = if self.completed_actions.is_empty() {
            "None".to_string()
        } else {
            self.completed_actions.join(", ")
        };
        let phase = non_empty_or(&self.current_phase, "Starting");
        let observations = if self.key_observations.is_empty() {
            "None".to_string()
        } else {
            self.key_observations
                .iter()
                .map(|o| format!("- {o}"))
                .collect::<Vec<_>>()
                .join("\n")
        };

        format!(
            "## Context Summary\n\n\
             **Goal**: {goal}\n\n\
             **Progress**:\n\
             - Completed Actions: {actions}\n\
             - Current Phase: {phase}\n\n\
             **Key Observations**:\n\
             {observations}"
        )
    }
}

fn non_empty_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.is_empty() { fallback } else { value }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_updates_overwrite_only_given_fields() {
        let mut snapshot = ContextSnapshot::default();
        snapshot.apply(SnapshotUpdate::goal("Open Safari").with_phase("starting"));
        snapshot.apply(SnapshotUpdate::phase("planning"));

        assert_eq!(snapshot.goal, "Open Safari");
        assert_eq!(snapshot.current_phase, "planning");
        assert!(snapshot.completed_actions.is_empty());
    }

    #[test]
    fn observations_are_capped() {
        let mut snapshot = ContextSnapshot::default();
        for i in 0..5 {
            snapshot.observe(format!("obs {i}"), 3);
        }
        assert_eq!(snapshot.key_observations, vec!["obs 2", "obs 3", "obs 4"]);
    }

    #[test]
    fn renders_summary() {
        let snapshot = ContextSnapshot {
            goal: "Search for flights".into(),
            completed_actions: vec!["click".into(), "type".into()],
            current_phase: "verification".into(),
            key_observations: vec!["results page loaded".into()],
        };
        let text = snapshot.render();
        assert!(text.starts_with("## Context Summary"));
        assert!(text.contains("**Goal**: Search for flights"));
        assert!(text.contains("- Completed Actions: click, type"));
        assert!(text.contains("- Current Phase: verification"));
        assert!(text.contains("- results page loaded"));
    }

    #[test]
    fn renders_placeholders_when_empty() {
        let text = ContextSnapshot::default().render();
        assert!(text.contains("**Goal**: Not specified"));
        assert!(text.contains("- Completed Actions: None"));
        assert!(text.contains("- Current Phase: Starting"));
        assert!(text.ends_with("None"));
    }
}

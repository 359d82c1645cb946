use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::screen::Screenshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone)]
pub struct HistoryTurn {
    pub role: Role,
    pub text: Option<String>,
    pub image: Option<Screenshot>,
}

impl HistoryTurn {
    pub fn system(text: impl Into<String>) -> Self {
        Self { role: Role::System, text: Some(text.into()), image: None }
    }

    pub fn user(text: impl Into<String>, image: Option<Screenshot>) -> Self {
        Self { role: Role::User, text: Some(text.into()), image }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: Role::Assistant, text: Some(text.into()), image: None }
    }

    pub fn has_image(&self) -> bool {
        self.image.is_some()
    }
}

/// Minimal per-step screen metadata sent alongside the screenshot.
#[derive(Debug, Clone, Serialize)]
pub struct ScreenInfo {
    pub current_app: String,
    pub width: u32,
    pub height: u32,
}

/// Text of the perception turn. Only the first step repeats the goal.
pub fn perception_text(goal: Option<&str>, info: &ScreenInfo) -> String {
    let info_json = serde_json::to_string(&json!({ "current_app": info.current_app }))
        .unwrap_or_else(|_| "{}".to_string());
    match goal {
        Some(goal) => format!("{}\n\n** Screen Info **\n\n{}", goal, info_json),
        None => format!("** Screen Info **\n\n{}", info_json),
    }
}

pub const ACTION_FAILED_NOTICE: &str =
    "The last action failed. Look at the new screenshot and try a different approach.";

/// Ordered conversation for one task session.
#[derive(Debug, Clone, Default)]
pub struct History {
    turns: Vec<HistoryTurn>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: HistoryTurn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[HistoryTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&HistoryTurn> {
        self.turns.last()
    }

    pub fn image_count(&self) -> usize {
        self.turns.iter().filter(|t| t.has_image()).count()
    }

    /// Drops image payloads from every user turn, keeping their text. Runs
    /// after each decision so screenshots never accumulate across steps.
    pub fn prune_images(&mut self) -> usize {
        let mut pruned = 0;
        for turn in self.turns.iter_mut().filter(|t| t.role == Role::User) {
            if turn.image.take().is_some() {
                pruned += 1;
            }
        }
        pruned
    }

    pub fn into_turns(self) -> Vec<HistoryTurn> {
        self.turns
    }
}

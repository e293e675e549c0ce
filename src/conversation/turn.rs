//! Conversation turns and the bounded turn history.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Role of a conversation turn.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    /// Instructions for the model.
    System,
    /// User input.
    User,
    /// Model response.
    Assistant,
}

impl TurnRole {
    /// Stable string form, matching chat-completion roles.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for TurnRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TurnRole {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "system" => Ok(Self::System),
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            _ => Err(value.to_string()),
        }
    }
}

/// A single message in a conversation.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Who produced the turn.
    pub role: TurnRole,
    /// Message text.
    pub content: String,
}

impl ConversationTurn {
    /// Build a system turn.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::System,
            content: content.into(),
        }
    }

    /// Build a user turn.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
        }
    }

    /// Build an assistant turn.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
        }
    }
}

/// Ordered, size-capped turn history.
///
/// A leading system turn is pinned; eviction removes the oldest turn after it.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(from = "StoredHistory")]
pub struct ConversationHistory {
    max_turns: usize,
    turns: VecDeque<ConversationTurn>,
}

/// Serialized form; loaded blobs go through the same capacity rules as `push`.
#[derive(Deserialize)]
struct StoredHistory {
    max_turns: usize,
    #[serde(default)]
    turns: VecDeque<ConversationTurn>,
}

impl From<StoredHistory> for ConversationHistory {
    fn from(stored: StoredHistory) -> Self {
        let mut history = Self::new(stored.max_turns);
        history.turns = stored.turns;
        history.evict_overflow();
        history
    }
}

impl ConversationHistory {
    /// Create an empty history. `max_turns` is raised to 2 if lower.
    #[must_use]
    pub fn new(max_turns: usize) -> Self {
        Self {
            max_turns: max_turns.max(2),
            turns: VecDeque::new(),
        }
    }

    /// Create a history seeded with a system turn.
    #[must_use]
    pub fn with_instructions(max_turns: usize, instructions: &str) -> Self {
        let mut history = Self::new(max_turns);
        if !instructions.is_empty() {
            history.push(ConversationTurn::system(instructions));
        }
        history
    }

    /// Append a turn, evicting the oldest non-pinned turn when full.
    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push_back(turn);
        self.evict_overflow();
    }

    fn evict_overflow(&mut self) {
        while self.turns.len() > self.max_turns {
            let pinned = self
                .turns
                .front()
                .is_some_and(|first| first.role == TurnRole::System);
            if self.turns.remove(usize::from(pinned)).is_none() {
                break;
            }
        }
    }

    /// Iterate over turns, oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    /// Most recent turn.
    #[must_use]
    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.back()
    }

    /// Number of stored turns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Whether no turns are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Configured capacity.
    #[must_use]
    pub const fn max_turns(&self) -> usize {
        self.max_turns
    }

    /// Remove every turn.
    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_never_exceeds_capacity() {
        let mut history = ConversationHistory::new(3);
        for i in 0..10 {
            history.push(ConversationTurn::user(format!("m{i}")));
            assert!(history.len() <= 3);
        }
        let contents: Vec<&str> = history.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["m7", "m8", "m9"]);
    }

    #[test]
    fn test_system_turn_is_pinned() {
        let mut history = ConversationHistory::with_instructions(3, "be brief");
        history.push(ConversationTurn::user("a"));
        history.push(ConversationTurn::assistant("b"));
        history.push(ConversationTurn::user("c"));

        let contents: Vec<&str> = history.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["be brief", "b", "c"]);
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn test_capacity_lower_bound() {
        let mut history = ConversationHistory::new(0);
        assert_eq!(history.max_turns(), 2);
        history.push(ConversationTurn::user("a"));
        history.push(ConversationTurn::user("b"));
        history.push(ConversationTurn::user("c"));
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_history_serialized_shape() {
        let mut history = ConversationHistory::new(4);
        history.push(ConversationTurn::user("hi"));
        let value = serde_json::to_value(&history).unwrap_or_default();
        assert_eq!(value["max_turns"], 4);
        assert_eq!(value["turns"][0]["role"], "user");
        assert_eq!(value["turns"][0]["content"], "hi");
    }

    #[test]
    fn test_loaded_history_is_clamped_and_trimmed() {
        let history: ConversationHistory = serde_json::from_value(serde_json::json!({
            "max_turns": 2,
            "turns": [
                {"role": "user", "content": "a"},
                {"role": "assistant", "content": "b"},
                {"role": "user", "content": "c"}
            ]
        }))
        .unwrap();
        let contents: Vec<&str> = history.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["b", "c"]);
    }

    #[test]
    fn test_loaded_zero_capacity_with_pinned_turn_still_accepts_pushes() {
        let mut history: ConversationHistory = serde_json::from_value(serde_json::json!({
            "max_turns": 0,
            "turns": [{"role": "system", "content": "rules"}]
        }))
        .unwrap();
        assert_eq!(history.max_turns(), 2);

        history.push(ConversationTurn::user("a"));
        history.push(ConversationTurn::user("b"));
        let contents: Vec<&str> = history.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["rules", "b"]);
    }
}

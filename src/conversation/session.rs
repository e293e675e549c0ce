//! Per-conversation state persisted between turns.

use serde::{Deserialize, Serialize};

use crate::conversation::turn::ConversationHistory;
use crate::llm::mime::content_type_for;

/// A file the user sent during the conversation.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    /// File name, the last path segment of the source URL.
    pub name: String,
    /// MIME type.
    pub content_type: String,
    /// Where the content can be downloaded.
    pub source_url: String,
}

impl Attachment {
    /// Build an attachment, deriving name and content type when missing.
    #[must_use]
    pub fn new(source_url: &str, name: Option<&str>, content_type: Option<&str>) -> Self {
        let name = name
            .filter(|n| !n.is_empty())
            .map_or_else(|| last_segment(source_url).to_string(), str::to_string);
        let content_type = content_type
            .filter(|c| !c.is_empty())
            .map_or_else(|| content_type_for(&name).to_string(), str::to_string);
        Self {
            name,
            content_type,
            source_url: source_url.to_string(),
        }
    }
}

fn last_segment(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/').next().unwrap_or(path)
}

/// State stored for one conversation key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSession {
    /// Bounded turn history.
    pub history: ConversationHistory,
    /// Remote assistant thread, set once on first use.
    #[serde(default)]
    pub thread_id: Option<String>,
    /// Files received so far.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl ConversationSession {
    /// Start a session seeded with the system instructions.
    #[must_use]
    pub fn new(max_turns: usize, instructions: &str) -> Self {
        Self {
            history: ConversationHistory::with_instructions(max_turns, instructions),
            thread_id: None,
            attachments: Vec::new(),
        }
    }

    /// Reset to an empty session, keeping the history capacity.
    pub fn reset(&mut self) {
        self.history.clear();
        self.thread_id = None;
        self.attachments.clear();
    }

    /// Find an attachment by file name.
    #[must_use]
    pub fn attachment(&self, name: &str) -> Option<&Attachment> {
        self.attachments.iter().rev().find(|a| a.name == name)
    }
}

/// Conversation state key for a channel conversation.
#[must_use]
pub fn conversation_key(channel_id: &str, conversation_id: &str) -> String {
    format!("{channel_id}/conversations/{conversation_id}")
}

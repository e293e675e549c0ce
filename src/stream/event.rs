//! Events produced by a streaming run.

use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::core::errors::BotResult;

/// Identifies a run on an assistant thread.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRef {
    /// Thread the run belongs to.
    pub thread_id: String,
    /// Run identifier.
    pub run_id: String,
}

/// An image produced by the model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImageReference {
    /// File stored by the assistants API, served through `/api/files/{id}`.
    File(String),
    /// External image URL.
    Url(String),
}

impl ImageReference {
    /// Markdown image link for this reference.
    #[must_use]
    pub fn to_markdown(&self) -> String {
        match self {
            Self::File(id) => format!("![{id}](/api/files/{id})"),
            Self::Url(url) => format!("![image]({url})"),
        }
    }
}

/// Incremental message content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageDelta {
    /// Text fragment.
    Text(String),
    /// Image block.
    Image(ImageReference),
}

/// A function call the run is waiting on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call id to echo back with the output.
    pub id: String,
    /// Function name.
    pub name: String,
    /// Raw JSON arguments.
    pub arguments: String,
}

/// Output returned to the run for one tool call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Call id this output answers.
    pub tool_call_id: String,
    /// Tool result text.
    pub output: String,
}

/// Event in a run's stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    /// The run exists and can receive tool outputs.
    RunCreated(RunRef),
    /// The run failed; the message is shown to the user.
    RunFailed {
        /// Failure description.
        message: String,
    },
    /// New message content.
    MessageDelta(MessageDelta),
    /// The run is paused waiting for tool outputs.
    RequiresAction(Vec<ToolCall>),
}

impl StreamEvent {
    /// Text delta shorthand.
    #[must_use]
    pub fn text(fragment: impl Into<String>) -> Self {
        Self::MessageDelta(MessageDelta::Text(fragment.into()))
    }
}

/// Boxed stream of run events.
pub type EventStream = Pin<Box<dyn Stream<Item = BotResult<StreamEvent>> + Send>>;

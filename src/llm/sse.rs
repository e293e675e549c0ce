//! Server-sent event frames over `eventsource-stream`.

use std::fmt::Display;

use eventsource_stream::{Event, Eventsource};
use futures::{Stream, StreamExt};

use crate::core::errors::{BotError, BotResult};

/// Event name the parser assigns when a frame has no `event:` field.
const DEFAULT_EVENT: &str = "message";

/// One decoded SSE frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SseFrame {
    /// Value of the `event:` field, if any.
    pub event: Option<String>,
    /// `data:` lines joined with newlines.
    pub data: String,
}

impl SseFrame {
    /// Whether this frame is the `[DONE]` terminator used by chat completions.
    #[must_use]
    pub fn is_done_marker(&self) -> bool {
        self.data.trim() == "[DONE]"
    }
}

impl From<Event> for SseFrame {
    fn from(event: Event) -> Self {
        let name = (!event.event.is_empty() && event.event != DEFAULT_EVENT).then_some(event.event);
        Self {
            event: name,
            data: event.data,
        }
    }
}

/// Decode any byte-chunk stream into SSE frames.
pub fn decode<S, B, E>(bytes: S) -> impl Stream<Item = BotResult<SseFrame>> + Send
where
    S: Stream<Item = Result<B, E>> + Send,
    B: AsRef<[u8]> + Send,
    E: Display + Send,
{
    bytes.eventsource().map(|item| match item {
        Ok(event) => Ok(SseFrame::from(event)),
        Err(err) => Err(BotError::Stream(format!("event stream: {err}"))),
    })
}

/// Decode a streaming HTTP response body into SSE frames.
pub fn frames(response: reqwest::Response) -> impl Stream<Item = BotResult<SseFrame>> + Send {
    decode(response.bytes_stream())
}

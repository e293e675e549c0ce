//! Progressive reply delivery: informative typing, interim updates, final message.

use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::core::errors::BotResult;
use crate::transport::activity::Activity;
use crate::transport::sink::ActivitySink;

/// Text of the informative update sent when a reply starts.
pub const TYPING_TEXT: &str = "Typing...";

/// Text that closes a stream interrupted before any content arrived.
pub const INTERRUPTED_TEXT: &str = "The reply was interrupted.";

/// How replies are streamed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamingPolicy {
    /// Send informative and interim updates.
    pub enabled: bool,
    /// Push an interim update every N text fragments.
    pub update_every: usize,
}

impl StreamingPolicy {
    /// Policy that only sends the final message.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            enabled: false,
            update_every: usize::MAX,
        }
    }

    /// Whether the `count`-th fragment should trigger an interim update.
    #[must_use]
    pub const fn is_update_due(&self, count: usize) -> bool {
        self.enabled && self.update_every > 0 && count % self.update_every == 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StreamType {
    Informative,
    Streaming,
    Final,
}

impl StreamType {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Informative => "informative",
            Self::Streaming => "streaming",
            Self::Final => "final",
        }
    }
}

/// One reply delivered in several steps through the same stream handle.
pub struct StreamingReply<'a> {
    sink: &'a dyn ActivitySink,
    policy: StreamingPolicy,
    handle: Option<String>,
    sequence: u32,
}

impl<'a> StreamingReply<'a> {
    /// Prepare a reply on `sink`.
    #[must_use]
    pub fn new(sink: &'a dyn ActivitySink, policy: StreamingPolicy) -> Self {
        Self {
            sink,
            policy,
            handle: None,
            sequence: 0,
        }
    }

    /// Id of the first activity, once started.
    #[must_use]
    pub fn handle(&self) -> Option<&str> {
        self.handle.as_deref()
    }

    /// Send the informative typing update and keep its id as the stream handle.
    ///
    /// # Errors
    /// Returns an error if delivery fails.
    pub async fn start(&mut self) -> BotResult<()> {
        if !self.policy.enabled || self.handle.is_some() {
            return Ok(());
        }
        let activity = self.stream_activity(Activity::typing(), TYPING_TEXT, StreamType::Informative);
        let id = self.sink.send(activity).await?;
        debug!(stream_id = %id, "streaming reply started");
        self.handle = Some(id);
        Ok(())
    }

    /// Push the text accumulated so far.
    ///
    /// # Errors
    /// Returns an error if delivery fails.
    pub async fn update(&mut self, text: &str) -> BotResult<()> {
        let Some(handle) = self.handle.clone() else {
            return Ok(());
        };
        if self.sink.supports_updates() {
            self.sink.update(&handle, Activity::message(text)).await
        } else {
            let activity = self.stream_activity(Activity::typing(), text, StreamType::Streaming);
            self.sink.send(activity).await.map(|_| ())
        }
    }

    /// Deliver the final text, in place when possible.
    ///
    /// # Errors
    /// Returns an error if delivery fails.
    pub async fn finish(mut self, text: &str) -> BotResult<()> {
        let Some(handle) = self.handle.clone() else {
            return self.sink.send(Activity::message(text)).await.map(|_| ());
        };
        if self.sink.supports_updates() {
            self.sink.update(&handle, Activity::message(text)).await
        } else {
            let activity = self.stream_activity(Activity::message(""), text, StreamType::Final);
            self.sink.send(activity).await.map(|_| ())
        }
    }

    /// Close a started stream after a failure with the text received so far.
    /// Nothing is sent when no stream was started. Delivery errors are logged.
    pub async fn abandon(self, text: &str) {
        if self.handle.is_none() {
            return;
        }
        let text = if text.is_empty() { INTERRUPTED_TEXT } else { text };
        if let Err(err) = self.finish(text).await {
            warn!(%err, "failed to close streaming reply");
        }
    }

    fn stream_activity(&mut self, mut activity: Activity, text: &str, kind: StreamType) -> Activity {
        self.sequence += 1;
        let mut info = json!({
            "type": "streaminfo",
            "streamType": kind.as_str(),
        });
        if kind != StreamType::Final {
            info["streamSequence"] = json!(self.sequence);
        }
        if let Some(handle) = &self.handle {
            info["streamId"] = Value::String(handle.clone());
        }
        activity.text = Some(text.to_string());
        activity.channel_data = Some(info.clone());
        activity.entities.push(info);
        activity
    }
}

//! Outbound activity delivery seam.

use std::future::Future;
use std::pin::Pin;

use crate::core::errors::BotResult;
use crate::transport::activity::Activity;

/// Boxed future type for sink operations.
pub type SinkFuture<'a, T> = Pin<Box<dyn Future<Output = BotResult<T>> + Send + 'a>>;

/// Delivers activities into the current conversation.
pub trait ActivitySink: Send + Sync {
    /// Send a new activity and return its id.
    ///
    /// # Errors
    /// Returns an error if delivery fails.
    fn send(&self, activity: Activity) -> SinkFuture<'_, String>;

    /// Replace a previously sent activity.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    fn update(&self, activity_id: &str, activity: Activity) -> SinkFuture<'_, ()>;

    /// Whether sent activities can be edited in place.
    fn supports_updates(&self) -> bool;

    /// Send a plain text message.
    ///
    /// # Errors
    /// Returns an error if delivery fails.
    fn send_text(&self, text: &str) -> SinkFuture<'_, String> {
        self.send(Activity::message(text))
    }
}

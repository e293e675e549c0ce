//! Custom inference endpoint backend.

use crate::conversation::session::ConversationSession;
use crate::conversation::turn::ConversationTurn;
use crate::core::errors::BotResult;
use crate::llm::chat_completion::ChatMessage;
use crate::llm::custom_endpoint::CustomEndpointClient;

use super::BackendReply;

/// Sends the full history to a custom endpoint.
pub struct CustomCompletion {
    client: CustomEndpointClient,
}

impl CustomCompletion {
    /// Create the backend.
    #[must_use]
    pub const fn new(client: CustomEndpointClient) -> Self {
        Self { client }
    }

    pub(super) async fn respond(&self, session: &mut ConversationSession) -> BotResult<BackendReply> {
        let messages: Vec<ChatMessage> = session.history.iter().map(ChatMessage::from).collect();
        let text = self.client.complete(&messages).await?;
        session.history.push(ConversationTurn::assistant(text.clone()));
        Ok(BackendReply::text(text))
    }
}

//! Direct chat-completion backend.

use crate::conversation::session::ConversationSession;
use crate::conversation::turn::ConversationTurn;
use crate::core::errors::BotResult;
use crate::llm::chat_completion::{ChatCompletionClient, ChatMessage};
use crate::llm::citations::CitationFormatter;
use crate::stream::driver::RunDriver;
use crate::stream::tools::ToolRegistry;
use crate::transport::sink::ActivitySink;
use crate::transport::streaming::StreamingPolicy;

use super::BackendReply;

/// One chat-completion call over the full history.
pub struct DirectCompletion {
    chat: ChatCompletionClient,
    formatter: CitationFormatter,
    streaming: StreamingPolicy,
    tools: ToolRegistry,
}

impl DirectCompletion {
    /// Create the backend.
    #[must_use]
    pub fn new(
        chat: ChatCompletionClient,
        formatter: CitationFormatter,
        streaming: StreamingPolicy,
    ) -> Self {
        Self {
            chat,
            formatter,
            streaming,
            tools: ToolRegistry::new(),
        }
    }

    pub(super) async fn respond(
        &self,
        session: &mut ConversationSession,
        sink: &dyn ActivitySink,
    ) -> BotResult<BackendReply> {
        let messages: Vec<ChatMessage> = session.history.iter().map(ChatMessage::from).collect();

        if self.streaming.enabled {
            let events = self.chat.stream(&messages).await?;
            let outcome = RunDriver::new(sink, &self.tools, self.streaming)
                .drive(events, session)
                .await?;
            return Ok(BackendReply::delivered(outcome.text));
        }

        let completion = self.chat.complete(&messages).await?;
        let text = self.formatter.rewrite(&completion.text);
        session.history.push(ConversationTurn::assistant(text.clone()));
        Ok(BackendReply {
            text,
            citations: completion.citations,
            delivered: false,
        })
    }
}

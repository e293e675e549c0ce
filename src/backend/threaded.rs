//! Assistant thread backend with streaming runs.

use tracing::info;

use crate::conversation::session::{Attachment, ConversationSession};
use crate::conversation::turn::ConversationTurn;
use crate::core::errors::{BotError, BotResult};
use crate::llm::assistants::{AssistantsClient, FileTool, MessageAttachment};
use crate::stream::driver::RunDriver;
use crate::stream::tools::ToolRegistry;
use crate::transport::cards::file_tool_suggestions;
use crate::transport::sink::ActivitySink;
use crate::transport::streaming::StreamingPolicy;

use super::BackendReply;

/// Runs each user message on a persistent assistant thread.
pub struct ThreadedRun {
    assistants: AssistantsClient,
    tools: ToolRegistry,
    instructions: String,
    streaming: StreamingPolicy,
}

impl ThreadedRun {
    /// Create the backend.
    #[must_use]
    pub fn new(
        assistants: AssistantsClient,
        tools: ToolRegistry,
        instructions: impl Into<String>,
        streaming: StreamingPolicy,
    ) -> Self {
        Self {
            assistants,
            tools,
            instructions: instructions.into(),
            streaming,
        }
    }

    /// Underlying assistants client.
    #[must_use]
    pub const fn assistants(&self) -> &AssistantsClient {
        &self.assistants
    }

    async fn ensure_thread(&self, session: &mut ConversationSession) -> BotResult<String> {
        if let Some(thread_id) = &session.thread_id {
            return Ok(thread_id.clone());
        }
        let thread_id = self.assistants.create_thread().await?;
        info!(%thread_id, "assistant thread created");
        session.thread_id = Some(thread_id.clone());
        Ok(thread_id)
    }

    pub(super) async fn respond(
        &self,
        session: &mut ConversationSession,
        text: &str,
        sink: &dyn ActivitySink,
    ) -> BotResult<BackendReply> {
        let thread_id = self.ensure_thread(session).await?;
        self.assistants.create_message(&thread_id, text, &[]).await?;
        let events = self
            .assistants
            .create_run_stream(&thread_id, Some(self.instructions.as_str()))
            .await?;
        let outcome = RunDriver::new(sink, &self.tools, self.streaming)
            .with_resubmitter(&self.assistants)
            .drive(events, session)
            .await?;
        Ok(BackendReply::delivered(outcome.text))
    }

    pub(super) async fn register_attachment(
        &self,
        session: &mut ConversationSession,
        attachment: &Attachment,
        sink: &dyn ActivitySink,
    ) -> BotResult<()> {
        let thread_id = self.ensure_thread(session).await?;
        let notice = format!("File uploaded: {}", attachment.name);
        session.history.push(ConversationTurn::user(notice.clone()));
        sink.send_text(&notice).await?;
        self.assistants.create_message(&thread_id, &notice, &[]).await?;
        if let Some(suggestions) = file_tool_suggestions(&attachment.name, &attachment.content_type)
        {
            sink.send(suggestions).await?;
        }
        Ok(())
    }

    pub(super) async fn attach_to_tools(
        &self,
        session: &mut ConversationSession,
        tools: &[FileTool],
        file_name: &str,
    ) -> BotResult<String> {
        let attachment = session
            .attachment(file_name)
            .cloned()
            .ok_or_else(|| BotError::AttachmentNotFound(file_name.to_string()))?;
        let bytes = self.assistants.download(&attachment.source_url).await?;
        let file_id = self
            .assistants
            .upload_file(&attachment.name, &attachment.content_type, bytes)
            .await?;
        let thread_id = self.ensure_thread(session).await?;
        self.assistants
            .create_message(
                &thread_id,
                &format!("File uploaded: {}", attachment.name),
                &[MessageAttachment {
                    file_id,
                    tools: tools.to_vec(),
                }],
            )
            .await?;
        let names: Vec<&str> = tools.iter().map(|t| t.as_str()).collect();
        info!(file = %attachment.name, tools = ?names, "file attached to assistant tools");
        Ok(format!("File added to {} successfully!", names.join(",")))
    }
}

//! Generative backends behind one adapter.
//!
//! Every variant appends the user's message before calling its backend and
//! the response after success. On failure the history is restored to its
//! state before the turn and the error propagates.

pub mod custom;
pub mod direct;
pub mod orchestrated;
pub mod threaded;

pub use custom::CustomCompletion;
pub use direct::DirectCompletion;
pub use orchestrated::OrchestratedCompletion;
pub use threaded::ThreadedRun;

use tracing::warn;

use crate::conversation::session::{Attachment, ConversationSession};
use crate::conversation::turn::ConversationTurn;
use crate::core::config::{BackendKind, BotConfig};
use crate::core::errors::{BotError, BotResult};
use crate::llm::assistants::{AssistantsClient, FileTool};
use crate::llm::chat_completion::ChatCompletionClient;
use crate::llm::citations::{Citation, CitationFormatter};
use crate::llm::custom_endpoint::CustomEndpointClient;
use crate::llm::openai::AzureOpenAi;
use crate::llm::search::SearchClient;
use crate::stream::tools::{ImageQueryTool, ToolRegistry};
use crate::transport::sink::ActivitySink;
use crate::transport::streaming::StreamingPolicy;

/// What a backend produced for one user message.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BackendReply {
    /// Reply text, as recorded in the history.
    pub text: String,
    /// Grounding citations to show in a card.
    pub citations: Vec<Citation>,
    /// Whether the reply was already delivered through the sink.
    pub delivered: bool,
}

impl BackendReply {
    /// Reply the caller still has to send.
    #[must_use]
    pub const fn text(text: String) -> Self {
        Self {
            text,
            citations: Vec::new(),
            delivered: false,
        }
    }

    /// Reply already streamed to the user.
    #[must_use]
    pub const fn delivered(text: String) -> Self {
        Self {
            text,
            citations: Vec::new(),
            delivered: true,
        }
    }
}

/// The configured backend.
pub enum BackendAdapter {
    /// Chat completion.
    Direct(DirectCompletion),
    /// Assistant thread with streaming runs.
    Threaded(ThreadedRun),
    /// Rig-orchestrated completion.
    Orchestrated(OrchestratedCompletion),
    /// Custom endpoint.
    Custom(CustomCompletion),
}

impl BackendAdapter {
    /// Build the backend selected by `config`.
    ///
    /// # Errors
    /// Returns an error if a client cannot be built from the configuration.
    pub fn from_config(config: &BotConfig, http: &reqwest::Client) -> BotResult<Self> {
        let streaming = if config.streaming.enabled {
            StreamingPolicy {
                enabled: true,
                update_every: config.streaming.update_every,
            }
        } else {
            StreamingPolicy::disabled()
        };
        let formatter = CitationFormatter::new()?;
        let instructions = config.conversation.instructions.clone();

        Ok(match config.backend {
            BackendKind::ChatCompletions => {
                let api = AzureOpenAi::new(http.clone(), &config.openai)?;
                let chat = ChatCompletionClient::new(
                    api,
                    config.openai.deployment.clone(),
                    config.search.clone(),
                );
                Self::Direct(DirectCompletion::new(chat, formatter, streaming))
            }
            BackendKind::Assistant => {
                let api = AzureOpenAi::new(http.clone(), &config.openai)?;
                let assistant_id = config.openai.assistant_id.clone().ok_or_else(|| {
                    BotError::InvalidConfig("AZURE_OPENAI_ASSISTANT_ID is not set".to_string())
                })?;
                let vision = ChatCompletionClient::new(
                    api.clone(),
                    config.openai.deployment.clone(),
                    None,
                );
                let mut tools = ToolRegistry::new();
                tools.register(Box::new(ImageQueryTool::new(http.clone(), vision)));
                Self::Threaded(ThreadedRun::new(
                    AssistantsClient::new(api, assistant_id),
                    tools,
                    instructions,
                    streaming,
                ))
            }
            BackendKind::SemanticKernel => {
                let search = config
                    .search
                    .as_ref()
                    .map(|search| SearchClient::new(http.clone(), search))
                    .transpose()?;
                Self::Orchestrated(OrchestratedCompletion::new(
                    &config.orchestrator,
                    instructions,
                    formatter,
                    search,
                )?)
            }
            BackendKind::Phi => Self::Custom(CustomCompletion::new(CustomEndpointClient::new(
                http.clone(),
                &config.custom,
            )?)),
        })
    }

    /// Backend kind.
    #[must_use]
    pub const fn kind(&self) -> BackendKind {
        match self {
            Self::Direct(_) => BackendKind::ChatCompletions,
            Self::Threaded(_) => BackendKind::Assistant,
            Self::Orchestrated(_) => BackendKind::SemanticKernel,
            Self::Custom(_) => BackendKind::Phi,
        }
    }

    /// Assistants client, for serving generated files.
    #[must_use]
    pub const fn assistants(&self) -> Option<&AssistantsClient> {
        match self {
            Self::Threaded(threaded) => Some(threaded.assistants()),
            _ => None,
        }
    }

    /// Answer `text`, recording both turns in `session.history`.
    ///
    /// # Errors
    /// Returns the backend error; the history is left as it was before the call.
    pub async fn respond(
        &self,
        session: &mut ConversationSession,
        text: &str,
        sink: &dyn ActivitySink,
    ) -> BotResult<BackendReply> {
        let snapshot = session.history.clone();
        session.history.push(ConversationTurn::user(text));

        let result = match self {
            Self::Direct(direct) => direct.respond(session, sink).await,
            Self::Threaded(threaded) => threaded.respond(session, text, sink).await,
            Self::Orchestrated(orchestrated) => orchestrated.respond(session).await,
            Self::Custom(custom) => custom.respond(session).await,
        };

        if let Err(err) = &result {
            warn!(backend = %self.kind(), error = %err, "backend call failed, restoring history");
            session.history = snapshot;
        }
        result
    }

    /// Hand a newly received file to the backend.
    ///
    /// # Errors
    /// Returns an error if the backend cannot register the file.
    pub async fn register_attachment(
        &self,
        session: &mut ConversationSession,
        attachment: &Attachment,
        sink: &dyn ActivitySink,
    ) -> BotResult<()> {
        match self {
            Self::Threaded(threaded) => {
                threaded
                    .register_attachment(session, attachment, sink)
                    .await
            }
            _ => Ok(()),
        }
    }

    /// Attach a previously received file to assistant tools; returns user feedback.
    ///
    /// # Errors
    /// Returns [`BotError::Unsupported`] for backends without assistant tools,
    /// [`BotError::AttachmentNotFound`] for unknown files, or the upload error.
    pub async fn attach_to_tools(
        &self,
        session: &mut ConversationSession,
        tools: &[FileTool],
        file_name: &str,
    ) -> BotResult<String> {
        match self {
            Self::Threaded(threaded) => threaded.attach_to_tools(session, tools, file_name).await,
            _ => Err(BotError::Unsupported(format!(
                "file tools are not available for the {} backend",
                self.kind()
            ))),
        }
    }
}

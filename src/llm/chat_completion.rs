//! Chat-completion client, plain and streaming.

use async_stream::try_stream;
use futures::StreamExt;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::conversation::turn::{ConversationTurn, TurnRole};
use crate::core::config::SearchConfig;
use crate::core::errors::{BotError, BotResult};
use crate::llm::citations::{Citation, citations_from_context};
use crate::llm::openai::{AzureOpenAi, ensure_success, send_json};
use crate::llm::sse;
use crate::stream::event::{EventStream, StreamEvent};

/// Content of a request message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text.
    Text(String),
    /// Multi-part content (text and images).
    Parts(Vec<ContentPart>),
}

/// One part of a multi-part message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Text part.
    Text {
        /// Text value.
        text: String,
    },
    /// Image part, usually a base64 data URL.
    ImageUrl {
        /// Image location.
        image_url: ImageUrl,
    },
}

/// Image location for an image part.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ImageUrl {
    /// `https://` or `data:` URL.
    pub url: String,
}

/// A chat-completion request message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    /// Speaker role.
    pub role: TurnRole,
    /// Message content.
    pub content: MessageContent,
}

impl From<&ConversationTurn> for ChatMessage {
    fn from(turn: &ConversationTurn) -> Self {
        Self {
            role: turn.role,
            content: MessageContent::Text(turn.content.clone()),
        }
    }
}

/// Final (non-streamed) completion result.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChatCompletion {
    /// Assistant text, unmodified.
    pub text: String,
    /// Grounding citations, when a data source was used.
    pub citations: Vec<Citation>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    context: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

/// Client for one chat deployment.
#[derive(Clone, Debug)]
pub struct ChatCompletionClient {
    api: AzureOpenAi,
    deployment: String,
    search: Option<SearchConfig>,
}

impl ChatCompletionClient {
    /// Create a client for `deployment`, optionally grounded on a search index.
    #[must_use]
    pub fn new(api: AzureOpenAi, deployment: impl Into<String>, search: Option<SearchConfig>) -> Self {
        Self {
            api,
            deployment: deployment.into(),
            search,
        }
    }

    fn path(&self) -> String {
        format!("openai/deployments/{}/chat/completions", self.deployment)
    }

    fn body(&self, messages: &[ChatMessage], stream: bool) -> Value {
        let mut body = json!({
            "messages": messages,
            "stream": stream,
        });
        if let Some(search) = &self.search {
            let authentication = search.api_key.as_ref().map_or_else(
                || json!({"type": "system_assigned_managed_identity"}),
                |key| json!({"type": "api_key", "key": key}),
            );
            body["data_sources"] = json!([{
                "type": "azure_search",
                "parameters": {
                    "endpoint": search.endpoint,
                    "index_name": search.index,
                    "authentication": authentication,
                }
            }]);
        }
        body
    }

    /// Run one completion over `messages`.
    ///
    /// # Errors
    /// Returns an error on transport failure, non-2xx status, or a response
    /// without choices.
    pub async fn complete(&self, messages: &[ChatMessage]) -> BotResult<ChatCompletion> {
        let request = self
            .api
            .request(Method::POST, &self.path())?
            .json(&self.body(messages, false));
        let response: CompletionResponse = send_json(request).await?;
        let choice = response.choices.into_iter().next().ok_or_else(|| {
            BotError::MalformedResponse("completion returned no choices".to_string())
        })?;
        Ok(ChatCompletion {
            text: choice.message.content.unwrap_or_default(),
            citations: citations_from_context(choice.message.context.as_ref()),
        })
    }

    /// Run a streaming completion, yielding one text delta per content chunk.
    ///
    /// # Errors
    /// Returns an error if the request cannot be sent or is rejected.
    pub async fn stream(&self, messages: &[ChatMessage]) -> BotResult<EventStream> {
        let request = self
            .api
            .request(Method::POST, &self.path())?
            .json(&self.body(messages, true));
        let response = ensure_success(request.send().await?).await?;
        let mut frames = Box::pin(sse::frames(response));

        let events = try_stream! {
            while let Some(frame) = frames.next().await {
                let frame = frame?;
                if frame.is_done_marker() {
                    break;
                }
                let chunk: CompletionChunk = serde_json::from_str(&frame.data)?;
                for choice in chunk.choices {
                    if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                        yield StreamEvent::text(content);
                    }
                }
            }
        };
        Ok(Box::pin(events))
    }
}

//! Clients for the generative backends and their wire helpers.
//!
//! - `openai`: Azure OpenAI request plumbing shared by the clients below
//! - `chat_completion`: plain and streaming chat completions
//! - `assistants`: threads, runs, tool output submission and files
//! - `custom_endpoint`: bearer-authenticated custom inference endpoint
//! - `search`: index search that grounds orchestrated completions
//! - `sse`: server-sent event frames
//! - `citations`, `mime`: response and attachment helpers

pub mod assistants;
pub mod chat_completion;
pub mod citations;
pub mod custom_endpoint;
pub mod mime;
pub mod openai;
pub mod search;
pub mod sse;

pub use assistants::{AssistantsClient, FileTool, MessageAttachment};
pub use chat_completion::{
    ChatCompletion, ChatCompletionClient, ChatMessage, ContentPart, ImageUrl, MessageContent,
};
pub use citations::{Citation, CitationFormatter};
pub use custom_endpoint::CustomEndpointClient;
pub use openai::AzureOpenAi;
pub use search::SearchClient;
pub use sse::SseFrame;

//! Core configuration and error types.

pub mod config;
pub mod errors;

pub use config::{
    BackendKind, BotConfig, ConversationConfig, CustomEndpointConfig, OpenAiConfig,
    OrchestratorConfig, SearchConfig, ServerConfig, SsoConfig, StorageConfig, StreamingConfig,
    TransportConfig,
};
pub use errors::{BotError, BotResult};

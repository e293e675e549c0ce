//! Error types for the bot backend.

use thiserror::Error;

/// Bot backend error type.
#[derive(Debug, Error)]
pub enum BotError {
    /// Invalid configuration or unsupported values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// HTTP transport error.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// A remote service answered with a non-success status.
    #[error("http status {status}: {body}")]
    HttpStatus {
        /// Status code returned by the service.
        status: u16,
        /// Response body, possibly empty.
        body: String,
    },
    /// A response was well-formed JSON but lacked the expected fields.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    /// Server-sent event stream could not be decoded.
    #[error("stream error: {0}")]
    Stream(String),
    /// Tool outputs were produced before the run was announced.
    #[error("tool outputs pending but no run was created")]
    MissingRun,
    /// Operation is not available for the configured backend.
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    /// A referenced attachment is not part of the conversation.
    #[error("attachment not found: {0}")]
    AttachmentNotFound(String),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// `SQLite` storage error (sync).
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// `SQLite` storage error (async).
    #[error("tokio-rusqlite error: {0}")]
    TokioSqlite(#[from] tokio_rusqlite::Error),
    /// Regex compilation error.
    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),
    /// URL parse error.
    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
    /// HTTP client error from Rig.
    #[error("rig http client error: {0}")]
    RigHttp(#[from] rig::http_client::Error),
    /// Completion error from Rig.
    #[error("completion error: {0}")]
    Completion(#[from] rig::completion::CompletionError),
}

impl BotError {
    /// Check if this error came from a remote service being unavailable or throttling.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Convenience result alias for bot operations.
pub type BotResult<T> = Result<T, BotError>;

//! Configuration for the bot backend.
//!
//! Everything is read once at startup (see [`BotConfig::from_env`]) and then
//! passed explicitly to the components that need it.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::core::errors::{BotError, BotResult};

/// Default Azure OpenAI API version.
const DEFAULT_API_VERSION: &str = "2024-05-01-preview";
/// Default server port (Bot Framework convention).
const DEFAULT_PORT: u16 = 3978;
/// Default number of turns kept per conversation.
const DEFAULT_MAX_TURNS: usize = 10;
/// Default number of streamed fragments between interim updates.
const DEFAULT_UPDATE_EVERY: usize = 50;

/// Which generative backend answers user messages.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Direct chat-completion call.
    #[default]
    ChatCompletions,
    /// Assistant thread with streaming runs.
    Assistant,
    /// Agent-orchestrated completion.
    SemanticKernel,
    /// Custom bearer-authenticated inference endpoint.
    Phi,
}

impl BackendKind {
    /// Stable string form used in configuration.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ChatCompletions => "chat-completions",
            Self::Assistant => "assistant",
            Self::SemanticKernel => "semantic-kernel",
            Self::Phi => "phi",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = BotError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "chat-completions" => Ok(Self::ChatCompletions),
            "assistant" => Ok(Self::Assistant),
            "semantic-kernel" => Ok(Self::SemanticKernel),
            "phi" => Ok(Self::Phi),
            "langchain" => Err(BotError::InvalidConfig(
                "langchain is not supported in this version".to_string(),
            )),
            other => Err(BotError::InvalidConfig(format!(
                "invalid engine type: {other}"
            ))),
        }
    }
}

/// Top-level configuration for the bot.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BotConfig {
    /// Selected backend variant.
    pub backend: BackendKind,
    /// Azure OpenAI settings (chat completions, assistants, files).
    pub openai: OpenAiConfig,
    /// Optional Azure AI Search grounding for chat completions.
    pub search: Option<SearchConfig>,
    /// Custom endpoint settings.
    pub custom: CustomEndpointConfig,
    /// Orchestrated completion settings.
    pub orchestrator: OrchestratorConfig,
    /// Conversation behaviour.
    pub conversation: ConversationConfig,
    /// Streaming reply behaviour.
    pub streaming: StreamingConfig,
    /// Single sign-on gating.
    pub sso: SsoConfig,
    /// Bot Framework credentials.
    pub transport: TransportConfig,
    /// Conversation storage.
    pub storage: StorageConfig,
    /// HTTP server.
    pub server: ServerConfig,
    /// Send error details to users.
    pub debug: bool,
}

impl BotConfig {
    /// Build configuration from process environment variables.
    ///
    /// # Errors
    /// Returns an error if a value cannot be parsed or validation fails.
    pub fn from_env() -> BotResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    ///
    /// # Errors
    /// Returns an error if a value cannot be parsed or validation fails.
    pub fn from_lookup<F>(lookup: F) -> BotResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let backend = match get("GEN_AI_IMPLEMENTATION") {
            Some(value) => value.parse()?,
            None => BackendKind::default(),
        };

        let search = get("AZURE_SEARCH_API_ENDPOINT").map(|endpoint| SearchConfig {
            endpoint,
            index: get("AZURE_SEARCH_INDEX").unwrap_or_default(),
            api_key: get("AZURE_SEARCH_API_KEY"),
        });

        let defaults = Self::default();
        let config = Self {
            backend,
            openai: OpenAiConfig {
                endpoint: get("AZURE_OPENAI_API_ENDPOINT"),
                api_key: get("AZURE_OPENAI_API_KEY"),
                api_version: get("AZURE_OPENAI_API_VERSION")
                    .unwrap_or(defaults.openai.api_version),
                deployment: get("AZURE_OPENAI_DEPLOYMENT_NAME").unwrap_or_default(),
                assistant_id: get("AZURE_OPENAI_ASSISTANT_ID"),
            },
            search,
            custom: CustomEndpointConfig {
                endpoint: get("AZURE_AI_PHI_DEPLOYMENT_ENDPOINT"),
                api_key: get("AZURE_AI_PHI_DEPLOYMENT_KEY"),
            },
            orchestrator: OrchestratorConfig {
                model: get("ORCHESTRATOR_MODEL").unwrap_or(defaults.orchestrator.model),
                base_url: get("ORCHESTRATOR_BASE_URL"),
                temperature: defaults.orchestrator.temperature,
            },
            conversation: ConversationConfig {
                instructions: get("LLM_INSTRUCTIONS")
                    .unwrap_or(defaults.conversation.instructions),
                welcome_message: get("LLM_WELCOME_MESSAGE")
                    .unwrap_or(defaults.conversation.welcome_message),
                max_turns: parse_or(get("MAX_TURNS"), "MAX_TURNS", DEFAULT_MAX_TURNS)?,
            },
            streaming: StreamingConfig {
                enabled: get("AZURE_OPENAI_STREAMING").is_none_or(|v| parse_flag(&v)),
                update_every: parse_or(
                    get("STREAM_UPDATE_INTERVAL"),
                    "STREAM_UPDATE_INTERVAL",
                    DEFAULT_UPDATE_EVERY,
                )?,
            },
            sso: SsoConfig {
                enabled: get("SSO_ENABLED").is_some_and(|v| parse_flag(&v)),
                connection_name: get("SSO_CONFIG_NAME").unwrap_or(defaults.sso.connection_name),
                title: get("SSO_MESSAGE_TITLE").unwrap_or(defaults.sso.title),
                prompt: get("SSO_MESSAGE_PROMPT").unwrap_or(defaults.sso.prompt),
            },
            transport: TransportConfig {
                app_id: get("MicrosoftAppId"),
                app_password: get("MicrosoftAppPassword"),
                tenant_id: get("MicrosoftAppTenantId"),
            },
            storage: StorageConfig {
                sqlite_path: get("CONVERSATION_DB_PATH").map(PathBuf::from),
            },
            server: ServerConfig {
                port: parse_or(get("PORT"), "PORT", DEFAULT_PORT)?,
            },
            debug: get("DEBUG").is_some_and(|v| parse_flag(&v)),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or a required setting is missing
    /// for the selected backend.
    pub fn validate(&self) -> BotResult<()> {
        if self.conversation.max_turns < 2 {
            return Err(BotError::InvalidConfig(
                "conversation.max_turns must be >= 2".to_string(),
            ));
        }

        if self.streaming.update_every == 0 {
            return Err(BotError::InvalidConfig(
                "streaming.update_every must be > 0".to_string(),
            ));
        }

        match self.backend {
            BackendKind::ChatCompletions | BackendKind::Assistant => {
                require(self.openai.endpoint.as_deref(), "AZURE_OPENAI_API_ENDPOINT")?;
                if self.openai.deployment.is_empty() {
                    return Err(missing("AZURE_OPENAI_DEPLOYMENT_NAME"));
                }
                if self.backend == BackendKind::Assistant {
                    require(self.openai.assistant_id.as_deref(), "AZURE_OPENAI_ASSISTANT_ID")?;
                }
            }
            BackendKind::Phi => {
                require(self.custom.endpoint.as_deref(), "AZURE_AI_PHI_DEPLOYMENT_ENDPOINT")?;
            }
            BackendKind::SemanticKernel => {
                if self.orchestrator.model.is_empty() {
                    return Err(missing("ORCHESTRATOR_MODEL"));
                }
            }
        }

        for endpoint in [
            self.openai.endpoint.as_deref(),
            self.custom.endpoint.as_deref(),
            self.orchestrator.base_url.as_deref(),
            self.search.as_ref().map(|s| s.endpoint.as_str()),
        ]
        .into_iter()
        .flatten()
        {
            Url::parse(endpoint)?;
        }

        Ok(())
    }
}

fn require(value: Option<&str>, key: &str) -> BotResult<()> {
    value.map(|_| ()).ok_or_else(|| missing(key))
}

fn missing(key: &str) -> BotError {
    BotError::InvalidConfig(format!("{key} is required for the selected backend"))
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

fn parse_or<T: FromStr>(value: Option<String>, key: &str, default: T) -> BotResult<T> {
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| BotError::InvalidConfig(format!("{key} has an invalid value: {raw}"))),
        None => Ok(default),
    }
}

/// Azure OpenAI settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OpenAiConfig {
    /// Resource endpoint, e.g. `https://my-resource.openai.azure.com`.
    pub endpoint: Option<String>,
    /// API key; requests are unauthenticated when absent.
    pub api_key: Option<String>,
    /// API version query parameter.
    pub api_version: String,
    /// Chat model deployment name.
    pub deployment: String,
    /// Assistant id used for threaded runs.
    pub assistant_id: Option<String>,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            api_version: DEFAULT_API_VERSION.to_string(),
            deployment: String::new(),
            assistant_id: None,
        }
    }
}

/// Azure AI Search data source for grounded chat completions.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Search service endpoint.
    pub endpoint: String,
    /// Index name.
    pub index: String,
    /// API key; managed identity is used when absent.
    pub api_key: Option<String>,
}

/// Custom inference endpoint settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CustomEndpointConfig {
    /// Full URL receiving the completion request.
    pub endpoint: Option<String>,
    /// Bearer key.
    pub api_key: Option<String>,
}

/// Orchestrated completion settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Completion model name.
    pub model: String,
    /// Optional custom base URL.
    pub base_url: Option<String>,
    /// Temperature for generation.
    pub temperature: f64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            model: "llama3.1:8b".to_string(),
            base_url: None,
            temperature: 0.4,
        }
    }
}

/// Conversation behaviour.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// System instructions seeded into new conversations.
    pub instructions: String,
    /// Message sent when a user joins.
    pub welcome_message: String,
    /// Maximum number of turns kept per conversation.
    pub max_turns: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            instructions: "You are a helpful assistant.".to_string(),
            welcome_message: "Hello and welcome to the GenAI Bot!".to_string(),
            max_turns: DEFAULT_MAX_TURNS,
        }
    }
}

/// Streaming reply behaviour.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Send typing and interim updates while a response streams.
    pub enabled: bool,
    /// Push an interim update every N text fragments.
    pub update_every: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            update_every: DEFAULT_UPDATE_EVERY,
        }
    }
}

/// Single sign-on settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SsoConfig {
    /// Require a user token before answering.
    pub enabled: bool,
    /// OAuth connection name registered on the bot.
    pub connection_name: String,
    /// Sign-in card title.
    pub title: String,
    /// Sign-in card text.
    pub prompt: String,
}

impl Default for SsoConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            connection_name: "default".to_string(),
            title: "Sign in".to_string(),
            prompt: "Please sign in to continue.".to_string(),
        }
    }
}

/// Bot Framework credentials.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Application (client) id; outbound calls are unauthenticated when absent.
    pub app_id: Option<String>,
    /// Client secret.
    pub app_password: Option<String>,
    /// Tenant for single-tenant bots.
    pub tenant_id: Option<String>,
}

/// Conversation storage settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `SQLite` database path; in-memory storage is used when absent.
    pub sqlite_path: Option<PathBuf>,
}

/// HTTP server settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listening port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: DEFAULT_PORT }
    }
}

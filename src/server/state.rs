//! Application state shared across all request handlers.

use std::sync::Arc;

use tracing::info;

use crate::auth::sso::{BotFrameworkTokenClient, SsoGate, TOKEN_SERVICE_URL};
use crate::backend::BackendAdapter;
use crate::bot::handler::BotHandler;
use crate::conversation::store::{
    ConversationStore, MemoryConversationStore, SqliteConversationStore,
};
use crate::core::config::BotConfig;
use crate::core::errors::BotResult;
use crate::transport::connector::ConnectorClient;

/// Signed-in user names kept for greeting and logging.
const SSO_NAME_CACHE_CAPACITY: usize = 1024;

/// Shared application state.
pub struct AppState {
    /// Turn handler.
    pub handler: BotHandler,
    /// Outbound connector.
    pub connector: Arc<ConnectorClient>,
    /// Whether inbound requests must carry a bearer token.
    pub require_auth: bool,
}

impl AppState {
    /// Assemble state from already-built parts.
    #[must_use]
    pub fn new(handler: BotHandler, connector: Arc<ConnectorClient>, require_auth: bool) -> Arc<Self> {
        Arc::new(Self {
            handler,
            connector,
            require_auth,
        })
    }

    /// Build clients, store and handler from configuration.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the store cannot be opened.
    pub async fn from_config(config: &BotConfig) -> BotResult<Arc<Self>> {
        config.validate()?;
        let http = reqwest::Client::new();

        let store: Arc<dyn ConversationStore> = match &config.storage.sqlite_path {
            Some(path) => {
                info!(path = %path.display(), "using sqlite conversation store");
                Arc::new(SqliteConversationStore::open(path).await?)
            }
            None => {
                info!("using in-memory conversation store");
                Arc::new(MemoryConversationStore::new())
            }
        };

        let connector = Arc::new(ConnectorClient::new(http.clone(), config.transport.clone()));
        let sso = if config.sso.enabled {
            let client = BotFrameworkTokenClient::new(
                Arc::clone(&connector),
                TOKEN_SERVICE_URL,
                config.transport.app_id.clone(),
            )?;
            Some(SsoGate::new(
                config.sso.clone(),
                Arc::new(client),
                SSO_NAME_CACHE_CAPACITY,
            )?)
        } else {
            None
        };

        let backend = BackendAdapter::from_config(config, &http)?;
        info!(backend = %backend.kind(), sso = config.sso.enabled, "bot configured");
        let handler = BotHandler::new(config, backend, store, sso);

        Ok(Self::new(handler, connector, config.transport.app_id.is_some()))
    }
}

//! Optional single sign-on gate backed by the Bot Framework token service.

use std::future::Future;
use std::num::NonZeroUsize;
use std::pin::Pin;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use lru::LruCache;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{info, warn};
use url::Url;

use crate::core::config::SsoConfig;
use crate::core::errors::{BotError, BotResult};
use crate::llm::openai::ensure_success;
use crate::transport::activity::Activity;
use crate::transport::cards::sign_in_card;
use crate::transport::connector::ConnectorClient;
use crate::transport::sink::ActivitySink;

/// Default Bot Framework token service.
pub const TOKEN_SERVICE_URL: &str = "https://token.botframework.com";

/// Boxed future type for token operations.
pub type TokenFuture<'a, T> = Pin<Box<dyn Future<Output = BotResult<T>> + Send + 'a>>;

/// Access to per-user OAuth tokens.
pub trait UserTokenClient: Send + Sync {
    /// Cached token for the user, if signed in.
    ///
    /// # Errors
    /// Returns an error if the token service cannot be reached.
    fn get_token<'a>(
        &'a self,
        user_id: &'a str,
        connection_name: &'a str,
        channel_id: &'a str,
    ) -> TokenFuture<'a, Option<String>>;

    /// Drop the user's token.
    ///
    /// # Errors
    /// Returns an error if the token service rejects the request.
    fn sign_out<'a>(
        &'a self,
        user_id: &'a str,
        connection_name: &'a str,
        channel_id: &'a str,
    ) -> TokenFuture<'a, ()>;

    /// Sign-in URL for the conversation of `activity`.
    ///
    /// # Errors
    /// Returns an error if the token service rejects the request.
    fn sign_in_link<'a>(
        &'a self,
        activity: &'a Activity,
        connection_name: &'a str,
    ) -> TokenFuture<'a, Option<String>>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
}

/// Token client for the Bot Framework token service.
pub struct BotFrameworkTokenClient {
    connector: Arc<ConnectorClient>,
    base_url: Url,
    app_id: Option<String>,
}

impl BotFrameworkTokenClient {
    /// Create a client authenticated with the connector's bot token.
    ///
    /// # Errors
    /// Returns an error if `base_url` is invalid.
    pub fn new(
        connector: Arc<ConnectorClient>,
        base_url: &str,
        app_id: Option<String>,
    ) -> BotResult<Self> {
        Ok(Self {
            connector,
            base_url: Url::parse(base_url)?,
            app_id,
        })
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
    ) -> BotResult<reqwest::Response> {
        let mut url = self.base_url.join(path)?;
        url.query_pairs_mut().extend_pairs(query);
        let mut builder = self.connector.http().request(method, url);
        if let Some(token) = self.connector.access_token().await? {
            builder = builder.bearer_auth(token);
        }
        Ok(builder.send().await?)
    }
}

impl UserTokenClient for BotFrameworkTokenClient {
    fn get_token<'a>(
        &'a self,
        user_id: &'a str,
        connection_name: &'a str,
        channel_id: &'a str,
    ) -> TokenFuture<'a, Option<String>> {
        Box::pin(async move {
            let response = self
                .request(
                    Method::GET,
                    "api/usertoken/GetToken",
                    &[
                        ("userId", user_id),
                        ("connectionName", connection_name),
                        ("channelId", channel_id),
                    ],
                )
                .await?;
            if matches!(response.status(), StatusCode::NOT_FOUND | StatusCode::NO_CONTENT) {
                return Ok(None);
            }
            let token: TokenResponse = ensure_success(response).await?.json().await?;
            Ok(token.token.filter(|t| !t.is_empty()))
        })
    }

    fn sign_out<'a>(
        &'a self,
        user_id: &'a str,
        connection_name: &'a str,
        channel_id: &'a str,
    ) -> TokenFuture<'a, ()> {
        Box::pin(async move {
            let response = self
                .request(
                    Method::DELETE,
                    "api/usertoken/SignOut",
                    &[
                        ("userId", user_id),
                        ("connectionName", connection_name),
                        ("channelId", channel_id),
                    ],
                )
                .await?;
            ensure_success(response).await?;
            Ok(())
        })
    }

    fn sign_in_link<'a>(
        &'a self,
        activity: &'a Activity,
        connection_name: &'a str,
    ) -> TokenFuture<'a, Option<String>> {
        Box::pin(async move {
            let state = sign_in_state(activity, connection_name, self.app_id.as_deref());
            let response = self
                .request(
                    Method::GET,
                    "api/botsignin/GetSignInUrl",
                    &[("state", state.as_str())],
                )
                .await?;
            let link = ensure_success(response).await?.text().await?;
            Ok(Some(link.trim().trim_matches('"').to_string()).filter(|l| !l.is_empty()))
        })
    }
}

/// Base64 token exchange state identifying the conversation to resume.
#[must_use]
pub fn sign_in_state(activity: &Activity, connection_name: &str, app_id: Option<&str>) -> String {
    let state = json!({
        "ConnectionName": connection_name,
        "ConversationReference": {
            "activityId": activity.id,
            "user": activity.from,
            "bot": activity.recipient,
            "conversation": activity.conversation,
            "channelId": activity.channel_id,
            "serviceUrl": activity.service_url,
        },
        "MsAppId": app_id,
    });
    STANDARD.encode(state.to_string())
}

/// Read the `name` claim from a JWT without verifying it.
#[must_use]
pub fn token_display_name(token: &str) -> Option<String> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Value = serde_json::from_slice(&bytes).ok()?;
    claims.get("name")?.as_str().map(str::to_string)
}

/// Outcome of the gate for one message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GateDecision {
    /// Continue with the turn.
    Allowed,
    /// The gate answered; drop the message.
    Handled,
}

/// Enforces sign-in before messages reach the backend.
pub struct SsoGate {
    config: SsoConfig,
    client: Arc<dyn UserTokenClient>,
    names: Mutex<LruCache<String, String>>,
}

impl SsoGate {
    /// Create a gate caching up to `name_capacity` user names.
    ///
    /// # Errors
    /// Returns an error if `name_capacity` is zero.
    pub fn new(
        config: SsoConfig,
        client: Arc<dyn UserTokenClient>,
        name_capacity: usize,
    ) -> BotResult<Self> {
        let capacity = NonZeroUsize::new(name_capacity).ok_or_else(|| {
            BotError::InvalidConfig("sso name cache capacity must be > 0".to_string())
        })?;
        Ok(Self {
            config,
            client,
            names: Mutex::new(LruCache::new(capacity)),
        })
    }

    /// Whether sign-in is enforced.
    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Display name seen in the user's last token.
    pub async fn user_name(&self, user_id: &str) -> Option<String> {
        self.names.lock().await.get(user_id).cloned()
    }

    /// Gate a message: handle `logout`, or require a token.
    ///
    /// # Errors
    /// Returns an error if a reply cannot be delivered or sign-out fails.
    pub async fn check(&self, activity: &Activity, sink: &dyn ActivitySink) -> BotResult<GateDecision> {
        if !self.config.enabled {
            return Ok(GateDecision::Allowed);
        }
        let (user_id, channel_id) = identity(activity);

        if activity.text.as_deref().map(str::trim) == Some("logout") {
            self.client
                .sign_out(user_id, &self.config.connection_name, channel_id)
                .await?;
            self.names.lock().await.pop(user_id);
            info!(%user_id, "user signed out");
            sink.send_text("Signed out").await?;
            return Ok(GateDecision::Handled);
        }

        if self.ensure_signed_in(activity, sink).await? {
            Ok(GateDecision::Allowed)
        } else {
            Ok(GateDecision::Handled)
        }
    }

    /// Send the sign-in prompt unless the user already has a token.
    /// Returns whether the user is signed in.
    ///
    /// # Errors
    /// Returns an error if the prompt cannot be delivered.
    pub async fn ensure_signed_in(&self, activity: &Activity, sink: &dyn ActivitySink) -> BotResult<bool> {
        let (user_id, channel_id) = identity(activity);
        let token = match self
            .client
            .get_token(user_id, &self.config.connection_name, channel_id)
            .await
        {
            Ok(token) => token,
            Err(err) => {
                warn!(%user_id, error = %err, "token lookup failed");
                None
            }
        };

        if let Some(token) = token {
            if let Some(name) = token_display_name(&token) {
                self.names.lock().await.put(user_id.to_string(), name);
            }
            return Ok(true);
        }

        let link = match self
            .client
            .sign_in_link(activity, &self.config.connection_name)
            .await
        {
            Ok(link) => link,
            Err(err) => {
                warn!(error = %err, "sign-in link unavailable");
                None
            }
        };
        sink.send(sign_in_card(
            &self.config.connection_name,
            &self.config.title,
            &self.config.prompt,
            link.as_deref(),
        ))
        .await?;
        Ok(false)
    }
}

fn identity(activity: &Activity) -> (&str, &str) {
    (
        activity.from.as_ref().map_or("", |f| f.id.as_str()),
        activity.channel_id.as_deref().unwrap_or_default(),
    )
}

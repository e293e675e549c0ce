//! Bot Framework connector REST client.

use std::time::{Duration, Instant};

use reqwest::Method;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::core::config::TransportConfig;
use crate::core::errors::{BotError, BotResult};
use crate::llm::openai::{ensure_success, send_json};
use crate::transport::activity::Activity;
use crate::transport::sink::{ActivitySink, SinkFuture};

const LOGIN_BASE: &str = "https://login.microsoftonline.com";
const MULTI_TENANT: &str = "botframework.com";
const CONNECTOR_SCOPE: &str = "https://api.botframework.com/.default";
/// Tokens are refreshed this long before they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(300);

/// Channels that render in-place activity edits.
const EDITABLE_CHANNELS: &[&str] = &["webchat", "directline", "emulator"];

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct ResourceResponse {
    id: String,
}

#[derive(Debug)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Sends and updates activities through the channel connector.
#[derive(Debug)]
pub struct ConnectorClient {
    http: reqwest::Client,
    credentials: TransportConfig,
    token_endpoint: String,
    token: Mutex<Option<CachedToken>>,
}

impl ConnectorClient {
    /// Create a client. Calls are unauthenticated when no app id is set.
    #[must_use]
    pub fn new(http: reqwest::Client, credentials: TransportConfig) -> Self {
        let tenant = credentials
            .tenant_id
            .clone()
            .unwrap_or_else(|| MULTI_TENANT.to_string());
        Self {
            http,
            credentials,
            token_endpoint: format!("{LOGIN_BASE}/{tenant}/oauth2/v2.0/token"),
            token: Mutex::new(None),
        }
    }

    /// Override the identity endpoint used for client-credentials tokens.
    #[must_use]
    pub fn with_token_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.token_endpoint = endpoint.into();
        self
    }

    /// Shared HTTP client.
    #[must_use]
    pub const fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Bot access token, fetched with client credentials and cached until near expiry.
    ///
    /// # Errors
    /// Returns an error if the identity endpoint rejects the credentials.
    pub async fn access_token(&self) -> BotResult<Option<String>> {
        let (Some(app_id), Some(password)) = (
            self.credentials.app_id.as_deref(),
            self.credentials.app_password.as_deref(),
        ) else {
            return Ok(None);
        };

        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.expires_at > Instant::now()) {
            return Ok(Some(token.value.clone()));
        }

        let request = self.http.post(&self.token_endpoint).form(&[
            ("grant_type", "client_credentials"),
            ("client_id", app_id),
            ("client_secret", password),
            ("scope", CONNECTOR_SCOPE),
        ]);
        let response: TokenResponse = send_json(request).await?;
        let lifetime = Duration::from_secs(response.expires_in).saturating_sub(EXPIRY_MARGIN);
        debug!(expires_in = response.expires_in, "connector token refreshed");
        *cached = Some(CachedToken {
            value: response.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(Some(response.access_token))
    }

    async fn authorized(&self, method: Method, url: &str) -> BotResult<reqwest::RequestBuilder> {
        let builder = self.http.request(method, url);
        Ok(match self.access_token().await? {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        })
    }

    /// Post an activity to its conversation and return the new activity id.
    ///
    /// # Errors
    /// Returns an error if the activity is not addressed or delivery fails.
    pub async fn send(&self, activity: &Activity) -> BotResult<String> {
        let mut url = conversation_url(activity)?;
        if let Some(reply_to) = &activity.reply_to_id {
            url.push('/');
            url.push_str(&urlencoding::encode(reply_to));
        }
        let request = self.authorized(Method::POST, &url).await?.json(activity);
        let response = ensure_success(request.send().await?).await?;
        let resource: ResourceResponse = response.json().await?;
        if resource.id.is_empty() {
            return Err(BotError::MalformedResponse(
                "connector returned an empty activity id".to_string(),
            ));
        }
        Ok(resource.id)
    }

    /// Replace an existing activity.
    ///
    /// # Errors
    /// Returns an error if the activity is not addressed or the update fails.
    pub async fn update(&self, activity_id: &str, activity: &Activity) -> BotResult<()> {
        let url = format!(
            "{}/{}",
            conversation_url(activity)?,
            urlencoding::encode(activity_id)
        );
        let request = self.authorized(Method::PUT, &url).await?.json(activity);
        ensure_success(request.send().await?).await?;
        Ok(())
    }
}

fn conversation_url(activity: &Activity) -> BotResult<String> {
    let service_url = activity
        .service_url
        .as_deref()
        .ok_or_else(|| BotError::MalformedResponse("activity has no serviceUrl".to_string()))?;
    let conversation = activity
        .conversation
        .as_ref()
        .ok_or_else(|| BotError::MalformedResponse("activity has no conversation".to_string()))?;
    Ok(format!(
        "{}/v3/conversations/{}/activities",
        service_url.trim_end_matches('/'),
        urlencoding::encode(&conversation.id)
    ))
}

/// Sink replying into the conversation of one inbound activity.
pub struct TurnSink<'a> {
    connector: &'a ConnectorClient,
    inbound: &'a Activity,
}

impl<'a> TurnSink<'a> {
    /// Bind replies to `inbound`.
    #[must_use]
    pub const fn new(connector: &'a ConnectorClient, inbound: &'a Activity) -> Self {
        Self { connector, inbound }
    }
}

impl ActivitySink for TurnSink<'_> {
    fn send(&self, activity: Activity) -> SinkFuture<'_, String> {
        Box::pin(async move {
            let activity = activity.reply_to(self.inbound);
            self.connector.send(&activity).await
        })
    }

    fn update(&self, activity_id: &str, activity: Activity) -> SinkFuture<'_, ()> {
        let activity_id = activity_id.to_string();
        Box::pin(async move {
            let mut activity = activity.reply_to(self.inbound);
            activity.id = Some(activity_id.clone());
            activity.reply_to_id = None;
            self.connector.update(&activity_id, &activity).await
        })
    }

    fn supports_updates(&self) -> bool {
        self.inbound
            .channel_id
            .as_deref()
            .is_some_and(|channel| EDITABLE_CHANNELS.contains(&channel))
    }
}

//! Shared HTTP plumbing for the Azure OpenAI REST API.

use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use url::Url;

use crate::core::config::OpenAiConfig;
use crate::core::errors::{BotError, BotResult};

/// Authenticated request builder for one Azure OpenAI resource.
#[derive(Clone, Debug)]
pub struct AzureOpenAi {
    http: reqwest::Client,
    endpoint: Url,
    api_key: Option<String>,
    api_version: String,
}

impl AzureOpenAi {
    /// Build from configuration.
    ///
    /// # Errors
    /// Returns an error if the endpoint is missing or is not a valid URL.
    pub fn new(http: reqwest::Client, config: &OpenAiConfig) -> BotResult<Self> {
        let endpoint = config.endpoint.as_deref().ok_or_else(|| {
            BotError::InvalidConfig("AZURE_OPENAI_API_ENDPOINT is not set".to_string())
        })?;
        Ok(Self {
            http,
            endpoint: Url::parse(endpoint)?,
            api_key: config.api_key.clone(),
            api_version: config.api_version.clone(),
        })
    }

    /// Shared HTTP client.
    #[must_use]
    pub const fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Absolute URL for an API path such as `openai/threads`.
    ///
    /// # Errors
    /// Returns an error if the path cannot be joined to the endpoint.
    pub fn url(&self, path: &str) -> BotResult<Url> {
        let mut url = self.endpoint.join(path.trim_start_matches('/'))?;
        url.query_pairs_mut()
            .append_pair("api-version", &self.api_version);
        Ok(url)
    }

    /// Start a request with the `api-key` header and version query applied.
    ///
    /// # Errors
    /// Returns an error if the URL cannot be built.
    pub fn request(&self, method: Method, path: &str) -> BotResult<RequestBuilder> {
        let builder = self.http.request(method, self.url(path)?);
        Ok(match &self.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        })
    }
}

/// Fail with [`BotError::HttpStatus`] unless the response is a success.
///
/// # Errors
/// Returns an error for non-2xx statuses, carrying the response body.
pub async fn ensure_success(response: Response) -> BotResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(BotError::HttpStatus {
        status: status.as_u16(),
        body,
    })
}

/// Send a request and decode a JSON response body.
///
/// # Errors
/// Returns an error on transport failure, non-2xx status, or invalid JSON.
pub async fn send_json<T: DeserializeOwned>(builder: RequestBuilder) -> BotResult<T> {
    let response = ensure_success(builder.send().await?).await?;
    Ok(response.json().await?)
}

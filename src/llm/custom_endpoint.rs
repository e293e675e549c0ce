//! Client for a bearer-authenticated custom inference endpoint.

use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::core::config::CustomEndpointConfig;
use crate::core::errors::{BotError, BotResult};
use crate::llm::chat_completion::ChatMessage;
use crate::llm::openai::send_json;

#[derive(Debug, Deserialize)]
struct EndpointResponse {
    #[serde(default)]
    choices: Vec<EndpointChoice>,
}

#[derive(Debug, Deserialize)]
struct EndpointChoice {
    message: EndpointMessage,
}

#[derive(Debug, Deserialize)]
struct EndpointMessage {
    content: Option<String>,
}

/// Posts `{messages}` to a fixed URL.
#[derive(Clone, Debug)]
pub struct CustomEndpointClient {
    http: reqwest::Client,
    endpoint: Url,
    api_key: Option<String>,
}

impl CustomEndpointClient {
    /// Build from configuration.
    ///
    /// # Errors
    /// Returns an error if the endpoint is missing or invalid.
    pub fn new(http: reqwest::Client, config: &CustomEndpointConfig) -> BotResult<Self> {
        let endpoint = config.endpoint.as_deref().ok_or_else(|| {
            BotError::InvalidConfig("AZURE_AI_PHI_DEPLOYMENT_ENDPOINT is not set".to_string())
        })?;
        Ok(Self {
            http,
            endpoint: Url::parse(endpoint)?,
            api_key: config.api_key.clone(),
        })
    }

    /// Request a completion and return `choices[0].message.content`.
    ///
    /// # Errors
    /// Returns [`BotError::HttpStatus`] with the body for non-2xx answers, or an
    /// error if the response has no choices.
    pub async fn complete(&self, messages: &[ChatMessage]) -> BotResult<String> {
        let mut request = self
            .http
            .post(self.endpoint.clone())
            .json(&json!({ "messages": messages }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response: EndpointResponse = send_json(request).await?;
        let choice = response.choices.into_iter().next().ok_or_else(|| {
            BotError::MalformedResponse("endpoint returned no choices".to_string())
        })?;
        Ok(choice.message.content.unwrap_or_default())
    }
}

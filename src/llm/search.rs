//! Azure AI Search client used to ground orchestrated completions.

use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::core::config::SearchConfig;
use crate::core::errors::{BotError, BotResult};
use crate::llm::citations::Citation;
use crate::llm::openai::send_json;

/// REST API version of the documents search endpoint.
const SEARCH_API_VERSION: &str = "2023-11-01";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    value: Vec<SearchDocument>,
}

#[derive(Debug, Deserialize)]
struct SearchDocument {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    filepath: Option<String>,
    #[serde(default, alias = "id")]
    chunk_id: Option<String>,
}

impl From<SearchDocument> for Citation {
    fn from(doc: SearchDocument) -> Self {
        Self {
            title: doc.title,
            url: doc.url,
            content: doc.content.unwrap_or_default(),
            filepath: doc.filepath,
            chunk_id: doc.chunk_id,
        }
    }
}

/// Full-text search over one index.
#[derive(Clone, Debug)]
pub struct SearchClient {
    http: reqwest::Client,
    url: Url,
    api_key: Option<String>,
}

impl SearchClient {
    /// Build from configuration.
    ///
    /// # Errors
    /// Returns an error if the index is empty or the endpoint is not a valid URL.
    pub fn new(http: reqwest::Client, config: &SearchConfig) -> BotResult<Self> {
        if config.index.is_empty() {
            return Err(BotError::InvalidConfig("AZURE_SEARCH_INDEX is not set".to_string()));
        }
        let base = Url::parse(&config.endpoint)?;
        let mut url = base.join(&format!("indexes/{}/docs/search", config.index))?;
        url.query_pairs_mut()
            .append_pair("api-version", SEARCH_API_VERSION);
        Ok(Self {
            http,
            url,
            api_key: config.api_key.clone(),
        })
    }

    /// Return the `top` best documents for `query`, as citations in rank order.
    ///
    /// Documents without content are dropped.
    ///
    /// # Errors
    /// Returns an error on transport failure, non-2xx status, or invalid JSON.
    pub async fn search(&self, query: &str, top: usize) -> BotResult<Vec<Citation>> {
        let mut request = self
            .http
            .post(self.url.clone())
            .json(&json!({ "search": query, "top": top }));
        if let Some(key) = &self.api_key {
            request = request.header("api-key", key);
        }
        let response: SearchResponse = send_json(request).await?;
        Ok(response
            .value
            .into_iter()
            .filter(|doc| doc.content.as_deref().is_some_and(|c| !c.trim().is_empty()))
            .map(Citation::from)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use axum::extract::{Query, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::Value;

    use super::*;
    use crate::test_support::serve;

    fn config(endpoint: String) -> SearchConfig {
        SearchConfig {
            endpoint,
            index: "handbook".to_string(),
            api_key: Some("search-key".to_string()),
        }
    }

    type Seen = Arc<Mutex<Vec<(Option<String>, Option<String>, Value)>>>;

    #[tokio::test]
    async fn test_search_maps_documents_to_citations() {
        let seen: Seen = Arc::default();
        let app = Router::new()
            .route(
                "/indexes/handbook/docs/search",
                post(
                    |State(seen): State<Seen>,
                     Query(query): Query<HashMap<String, String>>,
                     headers: HeaderMap,
                     Json(body): Json<Value>| async move {
                        let key = headers
                            .get("api-key")
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);
                        seen.lock()
                            .unwrap()
                            .push((key, query.get("api-version").cloned(), body));
                        Json(serde_json::json!({
                            "value": [
                                {"@search.score": 2.1, "title": "Leave", "content": "Ten days.", "filepath": "leave.md", "id": "c1"},
                                {"@search.score": 1.0, "title": "Empty", "content": "  "},
                                {"@search.score": 0.5, "content": "Badges at reception.", "url": "https://intranet/badges"}
                            ]
                        }))
                    },
                ),
            )
            .with_state(seen.clone());
        let base = serve(app).await;

        let client = SearchClient::new(reqwest::Client::new(), &config(base)).unwrap();
        let citations = client.search("how many days off", 3).await.unwrap();

        assert_eq!(citations.len(), 2);
        assert_eq!(citations[0].title.as_deref(), Some("Leave"));
        assert_eq!(citations[0].chunk_id.as_deref(), Some("c1"));
        assert_eq!(citations[0].filepath.as_deref(), Some("leave.md"));
        assert_eq!(citations[1].url.as_deref(), Some("https://intranet/badges"));

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].0.as_deref(), Some("search-key"));
        assert_eq!(seen[0].1.as_deref(), Some(SEARCH_API_VERSION));
        assert_eq!(seen[0].2["search"], "how many days off");
        assert_eq!(seen[0].2["top"], 3);
    }

    #[tokio::test]
    async fn test_search_error_status_carries_body() {
        let app = Router::new().route(
            "/indexes/handbook/docs/search",
            post(|| async { (StatusCode::FORBIDDEN, "bad key") }),
        );
        let base = serve(app).await;

        let client = SearchClient::new(reqwest::Client::new(), &config(base)).unwrap();
        let err = client.search("q", 1).await.unwrap_err();
        assert!(matches!(err, BotError::HttpStatus { status: 403, ref body } if body == "bad key"));
    }

    #[test]
    fn test_missing_index_is_rejected() {
        let mut config = config("https://search.example.net/".to_string());
        config.index = String::new();
        let result = SearchClient::new(reqwest::Client::new(), &config);
        assert!(matches!(result, Err(BotError::InvalidConfig(_))));
    }
}

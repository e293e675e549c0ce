//! Agent-orchestrated completion backend built on Rig.
//!
//! When a search index is configured, the latest user message is used as a
//! query and the hits are passed to the model as `doc1..docN` documents. The
//! same hits come back as the reply's citations.

use std::collections::HashMap;

use reqwest::Client as ReqwestClient;
use rig::client::CompletionClient;
use rig::completion::{CompletionModel, Document};
use rig::message::AssistantContent;
use rig::providers::ollama;
use tracing::debug;

use crate::conversation::session::ConversationSession;
use crate::conversation::turn::{ConversationHistory, ConversationTurn, TurnRole};
use crate::core::config::OrchestratorConfig;
use crate::core::errors::{BotError, BotResult};
use crate::llm::citations::{Citation, CitationFormatter};
use crate::llm::search::SearchClient;

use super::BackendReply;

/// Number of search hits handed to the model.
const GROUNDING_DOCUMENTS: usize = 5;

/// Appended to the preamble when documents are attached.
const GROUNDING_HINT: &str =
    "Answer from the attached files when they are relevant and cite them as [docN].";

/// Renders the history into a chat-history prompt and asks the model to continue it.
pub struct OrchestratedCompletion {
    model: ollama::CompletionModel,
    instructions: String,
    temperature: f64,
    formatter: CitationFormatter,
    search: Option<SearchClient>,
}

impl OrchestratedCompletion {
    /// Build the completion model from configuration, grounded on `search` when given.
    ///
    /// # Errors
    /// Returns an error if the Rig client cannot be built.
    pub fn new(
        config: &OrchestratorConfig,
        instructions: impl Into<String>,
        formatter: CitationFormatter,
        search: Option<SearchClient>,
    ) -> BotResult<Self> {
        let builder = ollama::Client::<ReqwestClient>::builder().api_key(rig::client::Nothing);
        let builder = if let Some(base_url) = &config.base_url {
            builder.base_url(base_url)
        } else {
            builder
        };
        let client = builder.build().map_err(BotError::from)?;
        let model = client.completion_model(config.model.clone());
        Ok(Self {
            model,
            instructions: instructions.into(),
            temperature: config.temperature,
            formatter,
            search,
        })
    }

    pub(super) async fn respond(&self, session: &mut ConversationSession) -> BotResult<BackendReply> {
        let citations = self.retrieve(&session.history).await?;
        let prompt = render_chat_history(&session.history);
        let preamble = if citations.is_empty() {
            self.instructions.clone()
        } else {
            format!("{}\n\n{GROUNDING_HINT}", self.instructions)
        };
        let request = self
            .model
            .completion_request(prompt)
            .preamble(preamble)
            .temperature(self.temperature)
            .documents(citations.iter().enumerate().map(to_document).collect())
            .build();

        let response = self.model.completion(request).await?;
        let text = self.formatter.rewrite(&extract_text(&response.choice));
        session.history.push(ConversationTurn::assistant(text.clone()));
        Ok(BackendReply {
            citations,
            ..BackendReply::text(text)
        })
    }

    async fn retrieve(&self, history: &ConversationHistory) -> BotResult<Vec<Citation>> {
        let Some(search) = &self.search else {
            return Ok(Vec::new());
        };
        let Some(query) = history
            .iter()
            .rev()
            .find(|t| t.role == TurnRole::User)
            .map(|t| t.content.as_str())
            .filter(|q| !q.trim().is_empty())
        else {
            return Ok(Vec::new());
        };
        let citations = search.search(query, GROUNDING_DOCUMENTS).await?;
        debug!(documents = citations.len(), "retrieved grounding documents");
        Ok(citations)
    }
}

/// Present citation `index` to the model as document `doc{index + 1}`.
fn to_document((index, citation): (usize, &Citation)) -> Document {
    let mut additional_props = HashMap::new();
    if let Some(title) = &citation.title {
        additional_props.insert("title".to_string(), title.clone());
    }
    Document {
        id: format!("doc{}", index + 1),
        text: citation.content.clone(),
        additional_props,
    }
}

/// Render user and assistant turns as `<message role="...">` blocks.
///
/// System turns are carried by the preamble and left out.
#[must_use]
pub fn render_chat_history(history: &ConversationHistory) -> String {
    let mut out = String::new();
    for turn in history.iter().filter(|t| t.role != TurnRole::System) {
        out.push_str(&format!(
            "<message role=\"{}\">{}</message>\n",
            turn.role,
            escape(&turn.content)
        ));
    }
    out
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn extract_text(choice: &rig::OneOrMany<AssistantContent>) -> String {
    let mut out = String::new();
    for content in choice.iter() {
        if let AssistantContent::Text(text) = content {
            out.push_str(&text.text);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{Value, json};

    use super::*;
    use crate::core::config::SearchConfig;
    use crate::test_support::serve;

    #[test]
    fn test_render_chat_history() {
        let mut history = ConversationHistory::with_instructions(10, "be kind");
        history.push(ConversationTurn::user("is 1 < 2?"));
        history.push(ConversationTurn::assistant("yes"));

        assert_eq!(
            render_chat_history(&history),
            "<message role=\"user\">is 1 &lt; 2?</message>\n<message role=\"assistant\">yes</message>\n"
        );
    }

    #[test]
    fn test_client_builds_with_custom_base_url() {
        let config = OrchestratorConfig {
            base_url: Some("http://127.0.0.1:11434".to_string()),
            ..OrchestratorConfig::default()
        };
        let backend =
            OrchestratedCompletion::new(&config, "rules", CitationFormatter::new().unwrap(), None);
        assert!(backend.is_ok());
    }

    type Captured = Arc<Mutex<Vec<Value>>>;

    async fn fake_services(answer: &'static str, hits: Value) -> (String, String, Captured) {
        let chats: Captured = Arc::default();
        let ollama = Router::new()
            .route(
                "/api/chat",
                post(move |State(chats): State<Captured>, Json(body): Json<Value>| async move {
                    chats.lock().unwrap().push(body);
                    Json(json!({
                        "model": "llama3.2",
                        "created_at": "2024-05-01T00:00:00Z",
                        "message": {"role": "assistant", "content": answer},
                        "done": true
                    }))
                }),
            )
            .with_state(chats.clone());
        let search = Router::new().route(
            "/indexes/handbook/docs/search",
            post(move || {
                let hits = hits.clone();
                async move { Json(hits) }
            }),
        );
        (serve(ollama).await, serve(search).await, chats)
    }

    fn backend(ollama: String, search: Option<String>) -> OrchestratedCompletion {
        let config = OrchestratorConfig {
            base_url: Some(ollama),
            ..OrchestratorConfig::default()
        };
        let search = search.map(|endpoint| {
            SearchClient::new(
                reqwest::Client::new(),
                &SearchConfig {
                    endpoint,
                    index: "handbook".to_string(),
                    api_key: None,
                },
            )
            .unwrap()
        });
        OrchestratedCompletion::new(&config, "rules", CitationFormatter::new().unwrap(), search)
            .unwrap()
    }

    #[tokio::test]
    async fn test_search_hits_become_documents_and_citations() {
        let hits = json!({"value": [
            {"title": "Leave policy", "content": "Staff get ten days of leave.", "filepath": "leave.md"}
        ]});
        let (ollama, search, chats) = fake_services("Ten days [doc1].", hits).await;
        let backend = backend(ollama, Some(search));
        let mut session = ConversationSession::new(10, "rules");
        session.history.push(ConversationTurn::user("How much leave?"));

        let reply = backend.respond(&mut session).await.unwrap();

        assert_eq!(reply.text, "Ten days ¹.");
        assert_eq!(reply.citations.len(), 1);
        assert_eq!(reply.citations[0].title.as_deref(), Some("Leave policy"));
        assert_eq!(reply.citations[0].filepath.as_deref(), Some("leave.md"));
        assert!(!reply.delivered);
        assert_eq!(session.history.last().map(|t| t.content.as_str()), Some("Ten days ¹."));

        let sent = chats.lock().unwrap()[0].to_string();
        assert!(sent.contains("doc1"));
        assert!(sent.contains("Staff get ten days of leave."));
        assert!(sent.contains("cite them as [docN]"));
    }

    #[tokio::test]
    async fn test_without_search_no_documents_are_sent() {
        let (ollama, _, chats) = fake_services("Hello.", json!({"value": []})).await;
        let backend = backend(ollama, None);
        let mut session = ConversationSession::new(10, "rules");
        session.history.push(ConversationTurn::user("hi"));

        let reply = backend.respond(&mut session).await.unwrap();

        assert_eq!(reply.text, "Hello.");
        assert!(reply.citations.is_empty());
        let sent = chats.lock().unwrap()[0].to_string();
        assert!(!sent.contains("<file id"));
        assert!(!sent.contains("[docN]"));
    }
}

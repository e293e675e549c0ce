//! Function tools the assistant can call during a run.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::conversation::session::Attachment;
use crate::conversation::turn::TurnRole;
use crate::core::errors::BotResult;
use crate::llm::chat_completion::{
    ChatCompletionClient, ChatMessage, ContentPart, ImageUrl, MessageContent,
};
use crate::llm::openai::ensure_success;

/// Boxed future type for tool calls.
pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = BotResult<String>> + Send + 'a>>;

/// Conversation data visible to a tool call.
#[derive(Clone, Copy, Debug)]
pub struct ToolContext<'a> {
    /// Files received in the conversation.
    pub attachments: &'a [Attachment],
}

impl ToolContext<'_> {
    /// Find an attachment by name, ignoring any directory prefix.
    #[must_use]
    pub fn attachment(&self, name: &str) -> Option<&Attachment> {
        let name = name.rsplit('/').next().unwrap_or(name);
        self.attachments.iter().rev().find(|a| a.name == name)
    }
}

/// A callable function tool.
pub trait Tool: Send + Sync {
    /// Function name as declared on the assistant.
    fn name(&self) -> &str;

    /// Run the tool with parsed JSON arguments.
    ///
    /// # Errors
    /// Returns an error if the tool cannot produce an output.
    fn call<'a>(&'a self, arguments: Value, context: ToolContext<'a>) -> ToolFuture<'a>;
}

/// Tools available to a run, by name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Look up a tool.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|tool| &**tool)
    }

    /// Registered tool names.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[derive(Debug, Deserialize)]
struct ImageQueryArgs {
    query: String,
    image_name: String,
}

/// Answers a question about an uploaded image with a vision-capable model.
#[derive(Clone, Debug)]
pub struct ImageQueryTool {
    http: reqwest::Client,
    chat: ChatCompletionClient,
}

impl ImageQueryTool {
    /// Tool name.
    pub const NAME: &'static str = "image_query";

    /// Create the tool.
    #[must_use]
    pub const fn new(http: reqwest::Client, chat: ChatCompletionClient) -> Self {
        Self { http, chat }
    }

    async fn answer(&self, args: ImageQueryArgs, context: ToolContext<'_>) -> BotResult<String> {
        let Some(image) = context.attachment(&args.image_name) else {
            return Ok(format!(
                "The image {} was not found in this conversation.",
                args.image_name
            ));
        };
        info!(image = %image.name, "answering image query");

        let response = ensure_success(self.http.get(&image.source_url).send().await?).await?;
        let bytes = response.bytes().await?;
        let data_url = format!("data:{};base64,{}", image.content_type, STANDARD.encode(&bytes));

        let message = ChatMessage {
            role: TurnRole::User,
            content: MessageContent::Parts(vec![
                ContentPart::Text { text: args.query },
                ContentPart::ImageUrl {
                    image_url: ImageUrl { url: data_url },
                },
            ]),
        };
        Ok(self.chat.complete(&[message]).await?.text)
    }
}

impl Tool for ImageQueryTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn call<'a>(&'a self, arguments: Value, context: ToolContext<'a>) -> ToolFuture<'a> {
        Box::pin(async move {
            let args: ImageQueryArgs = serde_json::from_value(arguments)?;
            self.answer(args, context).await
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::Router;
    use axum::extract::State;
    use axum::routing::{get, post};
    use serde_json::json;

    use super::*;
    use crate::core::config::OpenAiConfig;
    use crate::llm::openai::AzureOpenAi;
    use crate::test_support::serve;

    async fn tool_with_server(seen: Arc<Mutex<Vec<Value>>>) -> (ImageQueryTool, String) {
        let router = Router::new()
            .route("/files/cat.png", get(|| async { vec![1_u8, 2, 3] }))
            .route(
                "/openai/deployments/vision/chat/completions",
                post(
                    |State(seen): State<Arc<Mutex<Vec<Value>>>>, axum::Json(body): axum::Json<Value>| async move {
                        seen.lock().unwrap().push(body);
                        axum::Json(json!({"choices": [{"message": {"content": "a cat"}}]}))
                    },
                ),
            )
            .with_state(seen);
        let base = serve(router).await;
        let config = OpenAiConfig {
            endpoint: Some(base.clone()),
            ..OpenAiConfig::default()
        };
        let api = AzureOpenAi::new(reqwest::Client::new(), &config).unwrap();
        let chat = ChatCompletionClient::new(api, "vision", None);
        (ImageQueryTool::new(reqwest::Client::new(), chat), base)
    }

    #[tokio::test]
    async fn test_image_query_sends_data_url() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (tool, base) = tool_with_server(Arc::clone(&seen)).await;
        let attachments = vec![Attachment::new(&format!("{base}/files/cat.png"), None, None)];
        let context = ToolContext {
            attachments: &attachments,
        };

        let output = tool
            .call(json!({"query": "what is it?", "image_name": "/mnt/data/cat.png"}), context)
            .await
            .unwrap();
        assert_eq!(output, "a cat");

        let body = seen.lock().unwrap()[0].clone();
        assert_eq!(body["messages"][0]["content"][0]["text"], "what is it?");
        assert_eq!(
            body["messages"][0]["content"][1]["image_url"]["url"],
            "data:image/png;base64,AQID"
        );
    }

    #[tokio::test]
    async fn test_missing_image_is_reported_as_output() {
        let (tool, _) = tool_with_server(Arc::new(Mutex::new(Vec::new()))).await;
        let output = tool
            .call(
                json!({"query": "q", "image_name": "dog.png"}),
                ToolContext { attachments: &[] },
            )
            .await
            .unwrap();
        assert!(output.contains("dog.png"));
        assert!(output.contains("not found"));
    }

    #[test]
    fn test_registry_lookup() {
        let api = AzureOpenAi::new(
            reqwest::Client::new(),
            &OpenAiConfig {
                endpoint: Some("https://res".to_string()),
                ..OpenAiConfig::default()
            },
        )
        .unwrap();
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(ImageQueryTool::new(
            reqwest::Client::new(),
            ChatCompletionClient::new(api, "d", None),
        )));
        assert!(registry.get("image_query").is_some());
        assert!(registry.get("web_search").is_none());
        assert_eq!(registry.names(), vec!["image_query"]);
    }
}

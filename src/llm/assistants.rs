//! Assistants API client: threads, messages, streaming runs, and files.

use async_stream::try_stream;
use futures::StreamExt;
use reqwest::Method;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::core::errors::{BotError, BotResult};
use crate::llm::openai::{AzureOpenAi, ensure_success, send_json};
use crate::llm::sse::{self, SseFrame};
use crate::stream::driver::{ResubmitFuture, RunResubmitter};
use crate::stream::event::{
    EventStream, ImageReference, MessageDelta, RunRef, StreamEvent, ToolCall, ToolOutput,
};

/// Assistant tool a file can be attached to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileTool {
    /// Sandbox that can read and execute against the file.
    CodeInterpreter,
    /// Vector search over the file.
    FileSearch,
}

impl FileTool {
    /// Wire name of the tool.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CodeInterpreter => "code_interpreter",
            Self::FileSearch => "file_search",
        }
    }

    /// Parse a comma-separated tool list, ignoring unknown names.
    #[must_use]
    pub fn parse_list(value: &str) -> Vec<Self> {
        let mut tools = Vec::new();
        for name in value.split(',').map(str::trim) {
            let tool = match name {
                "code_interpreter" => Self::CodeInterpreter,
                "file_search" => Self::FileSearch,
                _ => continue,
            };
            if !tools.contains(&tool) {
                tools.push(tool);
            }
        }
        tools
    }
}

/// File reference attached to a thread message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageAttachment {
    /// Uploaded file id.
    pub file_id: String,
    /// Tools that should see the file.
    pub tools: Vec<FileTool>,
}

impl MessageAttachment {
    fn to_json(&self) -> Value {
        let tools: Vec<Value> = self
            .tools
            .iter()
            .map(|tool| json!({"type": tool.as_str()}))
            .collect();
        json!({"file_id": self.file_id, "tools": tools})
    }
}

#[derive(Debug, Deserialize)]
struct IdObject {
    id: String,
}

/// Client bound to one assistant.
#[derive(Clone, Debug)]
pub struct AssistantsClient {
    api: AzureOpenAi,
    assistant_id: String,
}

impl AssistantsClient {
    /// Create a client for `assistant_id`.
    #[must_use]
    pub fn new(api: AzureOpenAi, assistant_id: impl Into<String>) -> Self {
        Self {
            api,
            assistant_id: assistant_id.into(),
        }
    }

    /// Create an empty thread and return its id.
    ///
    /// # Errors
    /// Returns an error if the request fails.
    pub async fn create_thread(&self) -> BotResult<String> {
        let request = self
            .api
            .request(Method::POST, "openai/threads")?
            .json(&json!({}));
        let thread: IdObject = send_json(request).await?;
        Ok(thread.id)
    }

    /// Post a user message to a thread.
    ///
    /// # Errors
    /// Returns an error if the request fails.
    pub async fn create_message(
        &self,
        thread_id: &str,
        content: &str,
        attachments: &[MessageAttachment],
    ) -> BotResult<String> {
        let mut body = json!({"role": "user", "content": content});
        if !attachments.is_empty() {
            body["attachments"] = attachments.iter().map(MessageAttachment::to_json).collect();
        }
        let request = self
            .api
            .request(Method::POST, &format!("openai/threads/{thread_id}/messages"))?
            .json(&body);
        let message: IdObject = send_json(request).await?;
        Ok(message.id)
    }

    /// Start a streaming run on a thread.
    ///
    /// # Errors
    /// Returns an error if the run cannot be created.
    pub async fn create_run_stream(
        &self,
        thread_id: &str,
        instructions: Option<&str>,
    ) -> BotResult<EventStream> {
        let mut body = json!({"assistant_id": self.assistant_id, "stream": true});
        if let Some(instructions) = instructions.filter(|i| !i.is_empty()) {
            body["instructions"] = json!(instructions);
        }
        let request = self
            .api
            .request(Method::POST, &format!("openai/threads/{thread_id}/runs"))?
            .json(&body);
        open_event_stream(request).await
    }

    /// Submit tool outputs to a paused run and continue streaming.
    ///
    /// # Errors
    /// Returns an error if the submission is rejected.
    pub async fn submit_tool_outputs_stream(
        &self,
        run: &RunRef,
        outputs: &[ToolOutput],
    ) -> BotResult<EventStream> {
        let path = format!(
            "openai/threads/{}/runs/{}/submit_tool_outputs",
            run.thread_id, run.run_id
        );
        let request = self
            .api
            .request(Method::POST, &path)?
            .json(&json!({"tool_outputs": outputs, "stream": true}));
        open_event_stream(request).await
    }

    /// Upload a file for use by assistants and return its id.
    ///
    /// # Errors
    /// Returns an error if the upload fails.
    pub async fn upload_file(
        &self,
        name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> BotResult<String> {
        let part = Part::bytes(bytes)
            .file_name(name.to_string())
            .mime_str(content_type)?;
        let form = Form::new().text("purpose", "assistants").part("file", part);
        let request = self
            .api
            .request(Method::POST, "openai/files")?
            .multipart(form);
        let file: IdObject = send_json(request).await?;
        Ok(file.id)
    }

    /// Fetch the content of a stored file.
    ///
    /// # Errors
    /// Returns an error if the file does not exist or the request fails.
    pub async fn file_content(&self, file_id: &str) -> BotResult<reqwest::Response> {
        let request = self
            .api
            .request(Method::GET, &format!("openai/files/{file_id}/content"))?;
        ensure_success(request.send().await?).await
    }

    /// Download arbitrary content (attachments) with the shared HTTP client.
    ///
    /// # Errors
    /// Returns an error if the download fails.
    pub async fn download(&self, url: &str) -> BotResult<Vec<u8>> {
        let response = ensure_success(self.api.http().get(url).send().await?).await?;
        Ok(response.bytes().await?.to_vec())
    }
}

impl RunResubmitter for AssistantsClient {
    fn resubmit<'a>(&'a self, run: &'a RunRef, outputs: Vec<ToolOutput>) -> ResubmitFuture<'a> {
        Box::pin(async move { self.submit_tool_outputs_stream(run, &outputs).await })
    }
}

async fn open_event_stream(request: reqwest::RequestBuilder) -> BotResult<EventStream> {
    let response = ensure_success(request.send().await?).await?;
    let mut frames = Box::pin(sse::frames(response));
    let events = try_stream! {
        while let Some(frame) = frames.next().await {
            let frame = frame?;
            if frame.event.as_deref() == Some("done") || frame.is_done_marker() {
                break;
            }
            for event in map_frame(&frame)? {
                yield event;
            }
        }
    };
    Ok(Box::pin(events))
}

/// Translate one assistants SSE frame into run events. Unrelated frames map to nothing.
///
/// # Errors
/// Returns an error if a relevant frame carries invalid JSON.
pub fn map_frame(frame: &SseFrame) -> BotResult<Vec<StreamEvent>> {
    let Some(name) = frame.event.as_deref() else {
        return Ok(Vec::new());
    };
    let events = match name {
        "thread.run.created" => {
            let data: Value = serde_json::from_str(&frame.data)?;
            vec![StreamEvent::RunCreated(RunRef {
                thread_id: string_field(&data, "thread_id")?,
                run_id: string_field(&data, "id")?,
            })]
        }
        "thread.run.failed" => {
            let data: Value = serde_json::from_str(&frame.data)?;
            let message = data
                .pointer("/last_error/message")
                .and_then(Value::as_str)
                .unwrap_or("The run failed.")
                .to_string();
            vec![StreamEvent::RunFailed { message }]
        }
        "error" => {
            let message = serde_json::from_str::<Value>(&frame.data)
                .ok()
                .and_then(|data| {
                    data.get("message")
                        .or_else(|| data.pointer("/error/message"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or_else(|| frame.data.clone());
            vec![StreamEvent::RunFailed { message }]
        }
        "thread.message.delta" => {
            let data: Value = serde_json::from_str(&frame.data)?;
            delta_events(&data)
        }
        "thread.run.requires_action" => {
            let data: Value = serde_json::from_str(&frame.data)?;
            vec![StreamEvent::RequiresAction(tool_calls(&data))]
        }
        _ => Vec::new(),
    };
    Ok(events)
}

fn string_field(data: &Value, field: &str) -> BotResult<String> {
    data.get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| BotError::MalformedResponse(format!("run event without {field}")))
}

fn delta_events(data: &Value) -> Vec<StreamEvent> {
    let Some(blocks) = data.pointer("/delta/content").and_then(Value::as_array) else {
        return Vec::new();
    };
    blocks
        .iter()
        .filter_map(|block| {
            let delta = match block.get("type").and_then(Value::as_str)? {
                "text" => MessageDelta::Text(
                    block.pointer("/text/value").and_then(Value::as_str)?.to_string(),
                ),
                "image_file" => MessageDelta::Image(ImageReference::File(
                    block
                        .pointer("/image_file/file_id")
                        .and_then(Value::as_str)?
                        .to_string(),
                )),
                "image_url" => MessageDelta::Image(ImageReference::Url(
                    block.pointer("/image_url/url").and_then(Value::as_str)?.to_string(),
                )),
                _ => return None,
            };
            Some(StreamEvent::MessageDelta(delta))
        })
        .collect()
}

fn tool_calls(data: &Value) -> Vec<ToolCall> {
    data.pointer("/required_action/submit_tool_outputs/tool_calls")
        .and_then(Value::as_array)
        .map(|calls| {
            calls
                .iter()
                .filter_map(|call| {
                    Some(ToolCall {
                        id: call.get("id")?.as_str()?.to_string(),
                        name: call.pointer("/function/name")?.as_str()?.to_string(),
                        arguments: call
                            .pointer("/function/arguments")
                            .and_then(Value::as_str)
                            .unwrap_or("{}")
                            .to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

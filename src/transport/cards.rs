//! Card and quick-reply builders.

use serde_json::{Value, json};

use crate::llm::assistants::FileTool;
use crate::llm::citations::Citation;
use crate::llm::mime::{supports_code_interpreter, supports_file_search};
use crate::transport::activity::{Activity, ActivityAttachment, CardAction, SuggestedActions};

const ADAPTIVE_CARD: &str = "application/vnd.microsoft.card.adaptive";
const OAUTH_CARD: &str = "application/vnd.microsoft.card.oauth";

/// Collapsible list of citations.
#[must_use]
pub fn citations_card(citations: &[Citation]) -> Activity {
    let body: Vec<Value> = citations
        .iter()
        .enumerate()
        .map(|(i, citation)| {
            let n = i + 1;
            let title = citation
                .title
                .as_deref()
                .or(citation.filepath.as_deref())
                .unwrap_or("Source");
            let heading = citation
                .url
                .as_deref()
                .map_or_else(|| format!("{n}: {title}"), |url| format!("[{n}: {title}]({url})"));
            json!({
                "type": "Container",
                "separator": true,
                "spacing": "Medium",
                "selectAction": {
                    "type": "Action.ToggleVisibility",
                    "targetElements": [format!("cardContent{n}")]
                },
                "items": [
                    {"type": "TextBlock", "text": heading, "wrap": true, "size": "Medium"},
                    {
                        "type": "Container",
                        "id": format!("cardContent{n}"),
                        "isVisible": false,
                        "items": [
                            {"type": "TextBlock", "text": citation.content, "isSubtle": true, "wrap": true}
                        ]
                    }
                ]
            })
        })
        .collect();

    Activity::message("Citations").with_attachment(ActivityAttachment {
        content_type: Some(ADAPTIVE_CARD.to_string()),
        content: Some(json!({
            "type": "AdaptiveCard",
            "$schema": "http://adaptivecards.io/schemas/adaptive-card.json",
            "version": "1.3",
            "body": body,
            "fallbackText": "This card requires Adaptive Cards v1.2 support to be rendered properly."
        })),
        ..ActivityAttachment::default()
    })
}

/// Upload follow-up value for a file and tool set.
#[must_use]
pub fn upload_command(tools: &[FileTool], file_name: &str) -> String {
    let tools: Vec<&str> = tools.iter().map(|t| t.as_str()).collect();
    format!("#UPLOAD_FILE#{}#{file_name}", tools.join(","))
}

/// Quick replies offering to attach an uploaded file to eligible tools.
///
/// Returns `None` when no tool accepts the content type.
#[must_use]
pub fn file_tool_suggestions(file_name: &str, content_type: &str) -> Option<Activity> {
    let mut actions = Vec::new();
    let code = supports_code_interpreter(content_type);
    let search = supports_file_search(content_type);
    if code {
        actions.push(im_back("Code Interpreter", upload_command(&[FileTool::CodeInterpreter], file_name)));
    }
    if search {
        actions.push(im_back("File Search", upload_command(&[FileTool::FileSearch], file_name)));
    }
    if code && search {
        actions.push(im_back(
            "Both",
            upload_command(&[FileTool::CodeInterpreter, FileTool::FileSearch], file_name),
        ));
    }
    if actions.is_empty() {
        return None;
    }
    let mut activity = Activity::message("Add to a tool? (ignore if not needed)");
    activity.suggested_actions = Some(SuggestedActions { actions });
    Some(activity)
}

fn im_back(title: &str, value: String) -> CardAction {
    CardAction {
        kind: "imBack".to_string(),
        title: title.to_string(),
        value,
    }
}

/// Sign-in prompt for an OAuth connection.
#[must_use]
pub fn sign_in_card(connection_name: &str, title: &str, prompt: &str, sign_in_link: Option<&str>) -> Activity {
    let mut button = json!({"type": "signin", "title": title});
    if let Some(link) = sign_in_link {
        button["value"] = json!(link);
    }
    Activity::message("").with_attachment(ActivityAttachment {
        content_type: Some(OAUTH_CARD.to_string()),
        content: Some(json!({
            "text": prompt,
            "connectionName": connection_name,
            "buttons": [button]
        })),
        ..ActivityAttachment::default()
    })
}

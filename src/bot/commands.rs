//! Text commands recognised before a message reaches the backend.

use crate::llm::assistants::FileTool;

/// A parsed user command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Reset the conversation.
    Clear,
    /// Attach a received file to assistant tools.
    Upload {
        /// Target tools.
        tools: Vec<FileTool>,
        /// File name as received.
        file_name: String,
    },
}

impl Command {
    /// Parse `text`, returning `None` for ordinary messages.
    ///
    /// Upload commands come as `#UPLOAD_FILE#<tools>#<name>` from suggestion
    /// buttons, or `:UPLOAD_FILE:<tools>:<name>` when typed.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.eq_ignore_ascii_case("clear") {
            return Some(Self::Clear);
        }
        parse_upload(text, '#').or_else(|| parse_upload(text, ':'))
    }
}

fn parse_upload(text: &str, sep: char) -> Option<Command> {
    let rest = text.strip_prefix(sep)?.strip_prefix("UPLOAD_FILE")?.strip_prefix(sep)?;
    let (tools, file_name) = rest.split_once(sep)?;
    let tools = FileTool::parse_list(tools);
    if tools.is_empty() || file_name.is_empty() {
        return None;
    }
    Some(Command::Upload {
        tools,
        file_name: file_name.to_string(),
    })
}

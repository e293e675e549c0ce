//! Citation extraction and `[docN]` marker rewriting.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// A grounding source returned alongside a completion.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    /// Document title.
    #[serde(default)]
    pub title: Option<String>,
    /// Document URL.
    #[serde(default)]
    pub url: Option<String>,
    /// Quoted chunk.
    pub content: String,
    /// Path of the source file in the index.
    #[serde(default)]
    pub filepath: Option<String>,
    /// Chunk identifier.
    #[serde(default)]
    pub chunk_id: Option<String>,
}

/// Rewrites `[docN]` markers as superscript digits.
#[derive(Clone, Debug)]
pub struct CitationFormatter {
    pattern: Regex,
}

impl CitationFormatter {
    /// Compile the marker pattern.
    ///
    /// # Errors
    /// Returns an error if the pattern fails to compile.
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(r"\[doc(\d+)\]")?,
        })
    }

    /// Replace every `[docN]` marker with the superscript form of `N`.
    #[must_use]
    pub fn rewrite(&self, text: &str) -> String {
        self.pattern
            .replace_all(text, |caps: &regex::Captures<'_>| superscript(&caps[1]))
            .into_owned()
    }
}

fn superscript(digits: &str) -> String {
    digits
        .chars()
        .map(|c| match c {
            '0' => '⁰',
            '1' => '¹',
            '2' => '²',
            '3' => '³',
            '4' => '⁴',
            '5' => '⁵',
            '6' => '⁶',
            '7' => '⁷',
            '8' => '⁸',
            '9' => '⁹',
            other => other,
        })
        .collect()
}

/// Read citations from a chat-completion message `context` object.
///
/// Missing or malformed context yields no citations.
#[must_use]
pub fn citations_from_context(context: Option<&serde_json::Value>) -> Vec<Citation> {
    context
        .and_then(|ctx| ctx.get("citations"))
        .and_then(|value| serde_json::from_value(value.clone()).ok())
        .unwrap_or_default()
}

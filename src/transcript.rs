//! Rendering of raw session-log deltas into readable transcripts.
//!
//! The summarization service receives plain `role: text` lines, not raw
//! JSONL. Tool invocations collapse to `[tool: name]` markers and long
//! messages are truncated; the service needs the shape of the session, not
//! every byte of it. Lines that fail to parse are skipped; a transcript
//! delta from a live writer routinely contains record shapes we don't know.

use serde::Deserialize;

use crate::discover::Tool;

/// Longest message text carried into the rendered transcript.
const MAX_MESSAGE_CHARS: usize = 500;

/// Render a whole-record delta to transcript lines for the given tool.
///
/// Returns an empty string when no line carried conversational content
/// (e.g. a delta of nothing but file-history snapshots).
pub fn render(tool: Tool, delta: &str) -> String {
    let lines = delta
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| match tool {
            Tool::Claude => render_claude_line(l),
            Tool::Codex => render_codex_line(l),
        })
        .collect::<Vec<_>>();

    lines.join("\n")
}

// -- Claude Code record shape -----------------------------------------------

#[derive(Deserialize)]
struct ClaudeLine {
    #[serde(default)]
    message: Option<ClaudeMessage>,
}

#[derive(Deserialize)]
struct ClaudeMessage {
    #[serde(default)]
    role: String,
    #[serde(default)]
    content: Content,
}

/// Message content is either a bare string or a list of typed items.
#[derive(Deserialize)]
#[serde(untagged)]
enum Content {
    Text(String),
    Items(Vec<ContentItem>),
}

impl Default for Content {
    fn default() -> Self {
        Self::Items(Vec::new())
    }
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ContentItem {
    #[serde(rename = "text")]
    Text {
        #[serde(default)]
        text: String,
    },
    #[serde(rename = "tool_use")]
    ToolUse {
        #[serde(default)]
        name: String,
    },
    #[serde(rename = "tool_result")]
    ToolResult {},
    #[serde(other)]
    Unknown,
}

fn render_claude_line(line: &str) -> Option<String> {
    let parsed: ClaudeLine = serde_json::from_str(line).ok()?;
    let message = parsed.message?;

    let text = match message.content {
        Content::Text(text) => text,
        Content::Items(items) => {
            let parts: Vec<String> = items
                .into_iter()
                .filter_map(|item| match item {
                    ContentItem::Text { text } if !text.is_empty() => Some(text),
                    ContentItem::ToolUse { name } => Some(format!("[tool: {name}]")),
                    ContentItem::ToolResult {} => Some("[tool result]".to_string()),
                    _ => None,
                })
                .collect();
            parts.join(" ")
        }
    };

    if text.is_empty() || message.role.is_empty() {
        return None;
    }
    Some(format!("{}: {}", message.role, truncate(&text)))
}

// -- Codex record shape -----------------------------------------------------

#[derive(Deserialize)]
struct CodexLine {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    payload: Option<CodexPayload>,
}

#[derive(Deserialize)]
struct CodexPayload {
    #[serde(default)]
    role: String,
    #[serde(default)]
    content: Vec<CodexItem>,
}

#[derive(Deserialize)]
struct CodexItem {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: String,
}

fn render_codex_line(line: &str) -> Option<String> {
    let parsed: CodexLine = serde_json::from_str(line).ok()?;
    if parsed.kind != "response_item" {
        return None;
    }
    let payload = parsed.payload?;

    let parts: Vec<&str> = payload
        .content
        .iter()
        .filter(|item| matches!(item.kind.as_str(), "input_text" | "text"))
        .filter(|item| !item.text.is_empty())
        .map(|item| item.text.as_str())
        .collect();

    let text = parts.join(" ");
    if text.is_empty() || payload.role.is_empty() {
        return None;
    }
    Some(format!("{}: {}", payload.role, truncate(&text)))
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_MESSAGE_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(MAX_MESSAGE_CHARS).collect();
    format!("{cut}…")
}

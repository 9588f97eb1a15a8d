//! Wire protocol for client-server communication.

use std::sync::LazyLock;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use indexmap::IndexMap;
use regex::Regex;
use relay_core::{CommandResult, ConversationId, Mode, TerminalTarget};
use serde::{Deserialize, Serialize};

/// Shown when a command produced no visible output.
pub const NO_OUTPUT: &str = "(no visible output)";

static CODE_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"```(\w+)?\n([\s\S]*?)```").unwrap_or_else(|e| panic!("invalid code block pattern: {e}"))
});

/// Message from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Run text in the given mode, or the conversation's default mode.
    Command {
        conversation_id: ConversationId,
        text: String,
        #[serde(default)]
        mode: Option<Mode>,
    },
    /// Bind a terminal pane (`session:window.pane`).
    Bind {
        conversation_id: ConversationId,
        target: TerminalTarget,
    },
    Unbind { conversation_id: ConversationId },
    SetMode { conversation_id: ConversationId, mode: Mode },
    /// Restore cwd and env to their defaults.
    Reset { conversation_id: ConversationId },
    /// Redacted environment listing.
    Env { conversation_id: ConversationId },
    Cwd { conversation_id: ConversationId },
    /// Forget the conversation entirely.
    Remove { conversation_id: ConversationId },
    /// Ping for keepalive.
    Ping,
}

impl ClientMessage {
    #[must_use]
    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            Self::Command { conversation_id, .. }
            | Self::Bind { conversation_id, .. }
            | Self::Unbind { conversation_id }
            | Self::SetMode { conversation_id, .. }
            | Self::Reset { conversation_id }
            | Self::Env { conversation_id }
            | Self::Cwd { conversation_id }
            | Self::Remove { conversation_id } => Some(conversation_id),
            Self::Ping => None,
        }
    }
}

/// Full output offered as a file when it does not fit in one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    /// Base64 encoded UTF-8 text.
    pub data: String,
}

impl Attachment {
    #[must_use]
    pub fn text(filename: impl Into<String>, text: &str) -> Self {
        Self {
            filename: filename.into(),
            data: BASE64.encode(text.as_bytes()),
        }
    }

    /// Decode the attachment body.
    #[must_use]
    pub fn decode(&self) -> Option<Vec<u8>> {
        BASE64.decode(&self.data).ok()
    }
}

/// Message from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Outcome of a `command`.
    Result {
        conversation_id: ConversationId,
        result: CommandResult,
        /// Display text split to the output budget.
        chunks: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attachment: Option<Attachment>,
    },
    /// Current binding after `bind`/`unbind`.
    Binding {
        conversation_id: ConversationId,
        target: Option<TerminalTarget>,
    },
    ModeChanged { conversation_id: ConversationId, mode: Mode },
    Env {
        conversation_id: ConversationId,
        vars: IndexMap<String, String>,
    },
    Cwd { conversation_id: ConversationId, cwd: String },
    /// Informational acknowledgement (`reset`, `remove`).
    Ack { conversation_id: ConversationId, message: String },
    /// Error message.
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conversation_id: Option<ConversationId>,
        message: String,
    },
    /// Pong response.
    Pong,
}

impl ServerMessage {
    /// Build a `Result` message, splitting display text into chunks of at
    /// most `max_chars` and attaching the full text when it is longer.
    #[must_use]
    pub fn result(conversation_id: impl Into<ConversationId>, result: CommandResult, max_chars: usize) -> Self {
        let text = result.display_text();
        let text = if text.trim().is_empty() { NO_OUTPUT.to_string() } else { text };
        let attachment = (text.chars().count() > max_chars).then(|| {
            let filename = if result.captured_pane_text.is_some() { "term.txt" } else { "output.txt" };
            Attachment::text(filename, &text)
        });
        Self::Result {
            conversation_id: conversation_id.into(),
            chunks: chunk_text(&text, max_chars),
            result,
            attachment,
        }
    }
}

/// A fenced code block found in inbound text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    /// Lowercased info string, if any.
    pub lang: Option<String>,
    pub code: String,
}

/// First fenced code block in `text`.
#[must_use]
pub fn extract_code_block(text: &str) -> Option<CodeBlock> {
    let caps = CODE_BLOCK_RE.captures(text)?;
    let lang = caps
        .get(1)
        .map(|m| m.as_str().trim().to_lowercase())
        .filter(|l| !l.is_empty());
    let code = caps.get(2).map_or_else(String::new, |m| m.as_str().to_string());
    Some(CodeBlock { lang, code })
}

/// How inbound text should be executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Run `text` in `mode`, or the conversation default when `None`.
    Run { mode: Option<Mode>, text: String },
    /// Refuse with a message.
    Reject(String),
}

/// Decide mode and text for an inbound command.
///
/// A ` ```bash `/` ```sh ` block forces shell mode and runs only the block.
/// Python blocks are refused. Anything else runs as typed.
#[must_use]
pub fn route_text(text: &str, mode: Option<Mode>) -> Route {
    if let Some(block) = extract_code_block(text) {
        match block.lang.as_deref() {
            Some("bash" | "sh" | "shell" | "zsh") => {
                return Route::Run {
                    mode: Some(Mode::Shell),
                    text: block.code,
                };
            }
            Some("py" | "python") => {
                return Route::Reject("Python blocks are not executed. Use python with a shell heredoc.".into());
            }
            _ => {}
        }
    }
    match text.trim() {
        "" | "/" => Route::Reject("Nothing to run.".into()),
        trimmed => Route::Run {
            mode,
            text: strip_inline_code(trimmed).to_string(),
        },
    }
}

/// `` `cmd` `` to `cmd`. Fenced blocks are left alone.
fn strip_inline_code(text: &str) -> &str {
    if text.starts_with("```") {
        return text;
    }
    text.strip_prefix('`')
        .and_then(|t| t.strip_suffix('`'))
        .map_or(text, str::trim)
}

/// Split `text` into pieces of at most `limit` characters.
#[must_use]
pub fn chunk_text(text: &str, limit: usize) -> Vec<String> {
    if limit == 0 || text.chars().count() <= limit {
        return vec![text.to_string()];
    }
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(limit).map(|c| c.iter().collect()).collect()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_code_block_forces_shell() {
        let text = "please run\n```bash\nls -la\npwd\n```\nthanks";
        assert_eq!(
            route_text(text, Some(Mode::Term)),
            Route::Run {
                mode: Some(Mode::Shell),
                text: "ls -la\npwd\n".into()
            }
        );
        assert!(matches!(route_text("```python\nprint(1)\n```", None), Route::Reject(_)));
    }

    #[test]
    fn test_plain_text_routing() {
        assert_eq!(
            route_text("  `git status`  ", None),
            Route::Run {
                mode: None,
                text: "git status".into()
            }
        );
        assert!(matches!(route_text("   ", None), Route::Reject(_)));
        assert!(matches!(route_text("/", None), Route::Reject(_)));
        // Unknown language: the whole message is sent as typed.
        assert!(matches!(
            route_text("```rust\nfn main() {}\n```", Some(Mode::Term)),
            Route::Run { mode: Some(Mode::Term), .. }
        ));
    }

    #[test]
    fn test_extract_code_block_lang() {
        let block = extract_code_block("```SH\necho hi\n```").unwrap();
        assert_eq!(block.lang.as_deref(), Some("sh"));
        assert_eq!(block.code, "echo hi\n");
        assert_eq!(extract_code_block("```\nx\n```").unwrap().lang, None);
        assert_eq!(extract_code_block("no fences"), None);
    }

    #[test]
    fn test_chunk_text() {
        assert_eq!(chunk_text("abcdefg", 3), vec!["abc", "def", "g"]);
        assert_eq!(chunk_text("ééé", 2), vec!["éé", "é"]);
        assert_eq!(chunk_text("short", 10), vec!["short"]);
    }

    #[test]
    fn test_long_result_gets_attachment() {
        let result = CommandResult::message("x".repeat(25), 3);
        let ServerMessage::Result { chunks, attachment, .. } = ServerMessage::result("c1", result, 10) else {
            panic!("Wrong message type");
        };
        assert_eq!(chunks.len(), 3);
        let attachment = attachment.unwrap();
        assert_eq!(attachment.filename, "output.txt");
        assert_eq!(attachment.decode().unwrap(), "x".repeat(25).into_bytes());
    }

    #[test]
    fn test_empty_result_placeholder() {
        let msg = ServerMessage::result("c1", CommandResult::message("", 0), 100);
        let ServerMessage::Result { chunks, attachment, .. } = msg else {
            panic!("Wrong message type");
        };
        assert_eq!(chunks, vec![NO_OUTPUT]);
        assert_eq!(attachment, None);
    }

    #[test]
    fn test_message_serialization() {
        let json = r#"{"type":"bind","conversation_id":"c1","target":"codex-demo:0.1"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Bind {
                conversation_id: "c1".into(),
                target: TerminalTarget::new("codex-demo", 0, 1),
            }
        );
        assert_eq!(msg.conversation_id(), Some("c1"));

        let cmd: ClientMessage =
            serde_json::from_str(r#"{"type":"command","conversation_id":"c1","text":"ls"}"#).unwrap();
        assert!(matches!(cmd, ClientMessage::Command { mode: None, .. }));

        let pong = serde_json::to_string(&ServerMessage::Pong).unwrap();
        assert_eq!(pong, r#"{"type":"pong"}"#);
    }
}

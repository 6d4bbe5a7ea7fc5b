//! Session → exchange extraction.
//!
//! Walks a chat session's message list and pairs each eligible user
//! message with the text of the next assistant message. Tool results and
//! injected system context are not user prompts and are skipped.

use serde::{Deserialize, Serialize};

/// Prompt and response are capped at this many characters.
pub const MAX_EXCHANGE_CHARS: usize = 2000;

/// Wrapper some clients put around the real user text; the suffix after
/// the last occurrence is the prompt.
const USER_MESSAGE_MARKER: &str = "\nUser message: ";

/// A raw chat session as submitted for indexing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub messages: Vec<SessionMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMessage {
    pub role: String,
    /// Either a plain string or a sequence of content blocks.
    #[serde(default)]
    pub content: serde_json::Value,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// One user-prompt/assistant-response pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exchange {
    /// `{sessionId}-{messageIndex}`
    pub id: String,
    pub session_id: String,
    pub project: String,
    pub user_prompt: String,
    pub assistant_response: String,
    pub timestamp: String,
    pub message_index: usize,
}

impl Exchange {
    /// The text that gets embedded for this exchange.
    pub fn embedding_text(&self) -> String {
        format!(
            "[{}] {}\n\nResponse: {}",
            self.project, self.user_prompt, self.assistant_response
        )
    }
}

/// Extract every exchange from a session. `now` backstops missing
/// timestamps (message timestamp, then session creation, then `now`).
pub fn extract_exchanges(session: &Session, now: &str) -> Vec<Exchange> {
    let mut exchanges = Vec::new();

    for (index, message) in session.messages.iter().enumerate() {
        if message.role != "user" {
            continue;
        }
        let Some(content) = message.content.as_str() else {
            continue;
        };
        if !is_eligible_user_text(content) {
            continue;
        }

        let prompt = match content.rfind(USER_MESSAGE_MARKER) {
            Some(pos) => &content[pos + USER_MESSAGE_MARKER.len()..],
            None => content,
        };

        let Some(response) = next_assistant_text(&session.messages[index + 1..]) else {
            continue;
        };

        let timestamp = message
            .timestamp
            .clone()
            .or_else(|| session.created_at.clone())
            .unwrap_or_else(|| now.to_string());

        exchanges.push(Exchange {
            id: format!("{}-{}", session.session_id, index),
            session_id: session.session_id.clone(),
            project: session.project.clone(),
            user_prompt: truncate(prompt),
            assistant_response: truncate(&response),
            timestamp,
            message_index: index,
        });
    }

    exchanges
}

/// A user message counts as a prompt only when it is neither a tool
/// result nor injected system context, and carries at least 5 chars.
fn is_eligible_user_text(content: &str) -> bool {
    let is_tool_result = content.contains("<tool_result>")
        || content.contains("tool_use_id")
        || content.starts_with("{\"type\":\"tool_result\"");
    let is_system_context = content.starts_with("<current_time>")
        || content.starts_with("<system-reminder>")
        || content.starts_with("# Agent Context")
        || content.contains("<state_files>")
        || content.contains("<context_status>");
    !is_tool_result && !is_system_context && content.chars().count() >= 5
}

/// Text of the first assistant message in `rest`. Block-sequence content
/// yields the first `text` block.
fn next_assistant_text(rest: &[SessionMessage]) -> Option<String> {
    let assistant = rest.iter().find(|m| m.role == "assistant")?;
    match &assistant.content {
        serde_json::Value::String(text) => Some(text.clone()),
        serde_json::Value::Array(blocks) => blocks
            .iter()
            .find(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
            .and_then(|b| b.get("text").and_then(|t| t.as_str()))
            .map(str::to_string),
        _ => None,
    }
}

fn truncate(text: &str) -> String {
    crate::embedding::truncate_chars(text, MAX_EXCHANGE_CHARS).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user(text: &str) -> SessionMessage {
        SessionMessage {
            role: "user".into(),
            content: json!(text),
            timestamp: None,
        }
    }

    fn assistant(text: &str) -> SessionMessage {
        SessionMessage {
            role: "assistant".into(),
            content: json!(text),
            timestamp: None,
        }
    }

    fn session(messages: Vec<SessionMessage>) -> Session {
        Session {
            session_id: "s1".into(),
            project: "proj".into(),
            created_at: Some("2026-08-01T00:00:00Z".into()),
            messages,
        }
    }

    #[test]
    fn pairs_user_with_next_assistant() {
        let s = session(vec![
            user("How do I rename a branch?"),
            assistant("Use git branch -m."),
            user("And push it?"),
            assistant("Push with -u to reset upstream."),
        ]);
        let exchanges = extract_exchanges(&s, "2026-08-02T00:00:00Z");

        assert_eq!(exchanges.len(), 2);
        assert_eq!(exchanges[0].id, "s1-0");
        assert_eq!(exchanges[0].user_prompt, "How do I rename a branch?");
        assert_eq!(exchanges[0].assistant_response, "Use git branch -m.");
        assert_eq!(exchanges[1].id, "s1-2");
        assert_eq!(exchanges[1].message_index, 2);
    }

    #[test]
    fn tool_results_are_not_prompts() {
        let s = session(vec![
            user("<tool_result>stuff</tool_result>"),
            assistant("ok"),
            user("{\"type\":\"tool_result\",\"content\":\"x\"}"),
            assistant("ok"),
            user("something with tool_use_id inside"),
            assistant("ok"),
        ]);
        assert!(extract_exchanges(&s, "now").is_empty());
    }

    #[test]
    fn system_context_is_not_a_prompt() {
        let s = session(vec![
            user("<current_time>12:00</current_time>"),
            assistant("ok"),
            user("<system-reminder>remember</system-reminder>"),
            assistant("ok"),
            user("# Agent Context\nstuff"),
            assistant("ok"),
            user("here are my <state_files> for you"),
            assistant("ok"),
            user("hi"),
            assistant("too short above"),
        ]);
        assert!(extract_exchanges(&s, "now").is_empty());
    }

    #[test]
    fn marker_takes_suffix_after_last_occurrence() {
        let s = session(vec![
            user("context stuff\nUser message: quoted \nUser message: the real one"),
            assistant("answer"),
        ]);
        let exchanges = extract_exchanges(&s, "now");
        assert_eq!(exchanges[0].user_prompt, "the real one");
    }

    #[test]
    fn assistant_block_content_uses_first_text_block() {
        let s = session(vec![
            user("What is the plan?"),
            SessionMessage {
                role: "assistant".into(),
                content: json!([
                    {"type": "tool_use", "name": "search"},
                    {"type": "text", "text": "First text block"},
                    {"type": "text", "text": "Second text block"},
                ]),
                timestamp: None,
            },
        ]);
        let exchanges = extract_exchanges(&s, "now");
        assert_eq!(exchanges[0].assistant_response, "First text block");
    }

    #[test]
    fn long_texts_are_capped_at_2000_chars() {
        let long = "x".repeat(5000);
        let s = session(vec![user(&long), assistant(&long)]);
        let exchanges = extract_exchanges(&s, "now");
        assert_eq!(exchanges[0].user_prompt.chars().count(), 2000);
        assert_eq!(exchanges[0].assistant_response.chars().count(), 2000);
    }

    #[test]
    fn timestamp_falls_back_to_session_then_now() {
        let mut with_ts = user("Question with timestamp?");
        with_ts.timestamp = Some("2026-07-30T10:00:00Z".into());
        let s = session(vec![
            with_ts,
            assistant("a"),
            user("Question without timestamp?"),
            assistant("b"),
        ]);
        let exchanges = extract_exchanges(&s, "2026-08-02T00:00:00Z");
        assert_eq!(exchanges[0].timestamp, "2026-07-30T10:00:00Z");
        assert_eq!(exchanges[1].timestamp, "2026-08-01T00:00:00Z");

        let mut bare = s.clone();
        bare.created_at = None;
        let exchanges = extract_exchanges(&bare, "2026-08-02T00:00:00Z");
        assert_eq!(exchanges[1].timestamp, "2026-08-02T00:00:00Z");
    }

    #[test]
    fn user_without_assistant_reply_is_dropped() {
        let s = session(vec![user("Anyone there at all?")]);
        assert!(extract_exchanges(&s, "now").is_empty());
    }
}

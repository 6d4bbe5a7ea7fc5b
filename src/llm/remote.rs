//! HTTP chat-completion client speaking the Anthropic messages shape.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use super::{ChatMessage, ChatModel, ChatOutcome, ModelTier, Role, ToolCall, ToolDef};
use crate::config::LlmConfig;

const API_VERSION: &str = "2023-06-01";

pub struct RemoteChatModel {
    client: Client,
    endpoint: String,
    api_key: String,
    primary_model: String,
    fast_model: String,
    max_tokens: u32,
}

impl RemoteChatModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            bail!("llm api_key is required");
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build LLM HTTP client")?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            primary_model: config.primary_model.clone(),
            fast_model: config.fast_model.clone(),
            max_tokens: config.max_tokens.max(1),
        })
    }

    fn model_id(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Primary => &self.primary_model,
            ModelTier::Fast => &self.fast_model,
        }
    }
}

#[async_trait]
impl ChatModel for RemoteChatModel {
    async fn complete(
        &self,
        tier: ModelTier,
        system: &str,
        messages: &[ChatMessage],
        tools: &[ToolDef],
    ) -> Result<ChatOutcome> {
        let request = MessagesRequest::build(
            self.model_id(tier),
            self.max_tokens,
            system,
            messages,
            tools,
        )?;
        tracing::debug!(model = %request.model, messages = request.messages.len(), "LLM request");

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await
            .context("LLM request failed")?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            bail!("LLM endpoint returned {status}: {body}");
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .context("failed to parse LLM response")?;
        normalize(parsed)
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<MessageBody>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolBody<'a>>,
}

impl<'a> MessagesRequest<'a> {
    fn build(
        model: &'a str,
        max_tokens: u32,
        system: &'a str,
        messages: &[ChatMessage],
        tools: &'a [ToolDef],
    ) -> Result<Self> {
        let mut bodies = Vec::with_capacity(messages.len());
        for message in messages {
            let mut content = Vec::new();
            match message.role {
                Role::User | Role::Assistant => {
                    if !message.content.is_empty() {
                        content.push(ContentBlock::Text {
                            text: message.content.clone(),
                        });
                    }
                    for call in &message.tool_calls {
                        content.push(ContentBlock::ToolUse {
                            id: call.id.clone(),
                            name: call.name.clone(),
                            input: call.arguments.clone(),
                        });
                    }
                    if content.is_empty() {
                        bail!("message with empty content and no tool calls");
                    }
                }
                Role::Tool => {
                    let tool_use_id = message
                        .tool_call_id
                        .clone()
                        .context("tool message is missing its call id")?;
                    content.push(ContentBlock::ToolResult {
                        tool_use_id,
                        content: message.content.clone(),
                    });
                }
            }
            bodies.push(MessageBody {
                role: match message.role {
                    Role::Assistant => "assistant",
                    Role::User | Role::Tool => "user",
                },
                content,
            });
        }
        if bodies.is_empty() {
            bail!("at least one message is required");
        }

        Ok(Self {
            model,
            max_tokens,
            system: (!system.is_empty()).then_some(system),
            messages: bodies,
            tools: tools.iter().map(ToolBody::from).collect(),
        })
    }
}

#[derive(Serialize)]
struct MessageBody {
    role: &'static str,
    content: Vec<ContentBlock>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

#[derive(Serialize)]
struct ToolBody<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a Value,
}

impl<'a> From<&'a ToolDef> for ToolBody<'a> {
    fn from(def: &'a ToolDef) -> Self {
        Self {
            name: &def.name,
            description: &def.description,
            input_schema: &def.input_schema,
        }
    }
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ResponseBlock>,
}

#[derive(Deserialize)]
struct ResponseBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    input: Option<Value>,
}

fn normalize(response: MessagesResponse) -> Result<ChatOutcome> {
    let mut text_chunks = Vec::new();
    let mut tool_calls = Vec::new();
    for block in response.content {
        match block.kind.as_str() {
            "text" => {
                if let Some(text) = block.text {
                    if !text.is_empty() {
                        text_chunks.push(text);
                    }
                }
            }
            "tool_use" => {
                let id = block.id.context("tool_use block missing id")?;
                let name = block.name.context("tool_use block missing name")?;
                let arguments = block.input.context("tool_use block missing input")?;
                tool_calls.push(ToolCall {
                    id,
                    name,
                    arguments,
                });
            }
            _ => {}
        }
    }
    Ok(ChatOutcome {
        text: text_chunks.join("\n"),
        tool_calls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_shape_carries_tools_and_blocks() {
        let tools = vec![ToolDef {
            name: "readFile".into(),
            description: "Read a file".into(),
            input_schema: json!({"type": "object", "properties": {"path": {"type": "string"}}}),
        }];
        let messages = vec![
            ChatMessage::user("scan the files"),
            ChatMessage::assistant(
                "",
                vec![ToolCall {
                    id: "call_1".into(),
                    name: "readFile".into(),
                    arguments: json!({"path": "memory/a.md"}),
                }],
            ),
            ChatMessage::tool_result("call_1", "file contents"),
        ];

        let request =
            MessagesRequest::build("model-x", 1024, "be brief", &messages, &tools).unwrap();
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["system"], json!("be brief"));
        assert_eq!(value["messages"][0]["role"], json!("user"));
        assert_eq!(value["messages"][1]["content"][0]["type"], json!("tool_use"));
        // Tool results travel as user-role tool_result blocks
        assert_eq!(value["messages"][2]["role"], json!("user"));
        assert_eq!(
            value["messages"][2]["content"][0]["tool_use_id"],
            json!("call_1")
        );
        assert_eq!(value["tools"][0]["name"], json!("readFile"));
    }

    #[test]
    fn normalize_splits_text_and_tool_calls() {
        let response = MessagesResponse {
            content: vec![
                ResponseBlock {
                    kind: "text".into(),
                    text: Some("thinking...".into()),
                    id: None,
                    name: None,
                    input: None,
                },
                ResponseBlock {
                    kind: "tool_use".into(),
                    text: None,
                    id: Some("c1".into()),
                    name: Some("listFiles".into()),
                    input: Some(json!({"path": "memory/"})),
                },
            ],
        };
        let outcome = normalize(response).unwrap();
        assert_eq!(outcome.text, "thinking...");
        assert_eq!(outcome.tool_calls.len(), 1);
        assert_eq!(outcome.tool_calls[0].name, "listFiles");
    }

    #[test]
    fn normalize_rejects_malformed_tool_use() {
        let response = MessagesResponse {
            content: vec![ResponseBlock {
                kind: "tool_use".into(),
                text: None,
                id: Some("c1".into()),
                name: None,
                input: None,
            }],
        };
        assert!(normalize(response).is_err());
    }
}

//! Chat completion service types and client.
//!
//! [`ChatCompletion`] is the seam between the conversation loop and the
//! model. [`OpenAiChatClient`] implements it against the OpenAI and Azure
//! OpenAI chat-completions API, including function calling:
//!
//! - tool definitions go out as `tools` with `tool_choice: "auto"`
//! - the model answers either with text or with `tool_calls`
//! - tool results come back as `role: "tool"` messages keyed by call id

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::ChatConfig;
use crate::endpoint::{self, ServiceEndpoint};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A function call requested by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// JSON-encoded arguments, exactly as the model produced them.
    pub arguments: String,
}

/// One message of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    /// The assistant turn that requested `calls`.
    pub fn assistant_tool_calls(content: Option<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            tool_calls: calls,
            tool_call_id: None,
        }
    }

    /// The result of executing the tool call `call_id`.
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }

    /// Wire representation for the chat-completions API.
    fn to_wire(&self) -> Value {
        let mut msg = json!({
            "role": self.role,
            "content": self.content,
        });
        if !self.tool_calls.is_empty() {
            msg["tool_calls"] = self
                .tool_calls
                .iter()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": { "name": call.name, "arguments": call.arguments },
                    })
                })
                .collect();
        }
        if let Some(id) = &self.tool_call_id {
            msg["tool_call_id"] = json!(id);
        }
        msg
    }
}

/// A function the model may call, described by a JSON Schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Sampling settings sent with every request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutionSettings {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl From<&ChatConfig> for ExecutionSettings {
    fn from(config: &ChatConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            top_p: config.top_p,
        }
    }
}

pub struct ChatRequest<'a> {
    pub messages: &'a [ChatMessage],
    /// Tools offered for this call. Empty means the model must answer in text.
    pub tools: &'a [ToolDefinition],
    pub settings: ExecutionSettings,
}

/// The model's answer: text, tool calls, or both.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatReply {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

#[async_trait]
pub trait ChatCompletion: Send + Sync {
    async fn complete(&self, request: ChatRequest<'_>) -> Result<ChatReply>;
}

/// Ordered conversation history.
#[derive(Debug, Clone, Default)]
pub struct ChatHistory {
    messages: Vec<ChatMessage>,
}

impl ChatHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Chat client for the OpenAI / Azure OpenAI chat-completions endpoint.
pub struct OpenAiChatClient {
    endpoint: ServiceEndpoint,
    /// Model name, or the deployment name on Azure.
    model: String,
    client: reqwest::Client,
}

impl OpenAiChatClient {
    pub fn new(config: &ChatConfig) -> Result<Self> {
        let endpoint = ServiceEndpoint::from_env(
            &config.provider,
            config.endpoint.as_deref(),
            &config.api_version,
        )?;
        Self::with_endpoint(endpoint, config)
    }

    pub fn with_endpoint(endpoint: ServiceEndpoint, config: &ChatConfig) -> Result<Self> {
        Ok(Self {
            endpoint,
            model: config.model.clone(),
            client: endpoint::http_client(config.timeout_secs)?,
        })
    }

    fn request_body(&self, request: &ChatRequest<'_>) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": request.messages.iter().map(ChatMessage::to_wire).collect::<Vec<_>>(),
            "max_tokens": request.settings.max_tokens,
            "temperature": request.settings.temperature,
            "top_p": request.settings.top_p,
        });
        if !request.tools.is_empty() {
            body["tools"] = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.parameters,
                        },
                    })
                })
                .collect();
            body["tool_choice"] = json!("auto");
        }
        body
    }
}

#[async_trait]
impl ChatCompletion for OpenAiChatClient {
    async fn complete(&self, request: ChatRequest<'_>) -> Result<ChatReply> {
        let body = self.request_body(&request);
        let http = self
            .client
            .post(self.endpoint.url(&self.model, "chat/completions"))
            .json(&body);
        let response = self.endpoint.authorize(http).send().await?;
        let json = endpoint::json_or_error(response, "Chat").await?;
        parse_reply(&json)
    }
}

/// Extract the first choice of a chat-completions response.
fn parse_reply(json: &Value) -> Result<ChatReply> {
    let message = json
        .pointer("/choices/0/message")
        .ok_or_else(|| anyhow!("Invalid chat response: missing choices[0].message"))?;

    let content = message
        .get("content")
        .and_then(|c| c.as_str())
        .map(str::to_string);

    let mut tool_calls = Vec::new();
    if let Some(calls) = message.get("tool_calls").and_then(|c| c.as_array()) {
        for call in calls {
            let id = call["id"]
                .as_str()
                .ok_or_else(|| anyhow!("Invalid chat response: tool call without id"))?;
            let name = call["function"]["name"]
                .as_str()
                .ok_or_else(|| anyhow!("Invalid chat response: tool call without name"))?;
            tool_calls.push(ToolCall {
                id: id.to_string(),
                name: name.to_string(),
                arguments: call["function"]["arguments"]
                    .as_str()
                    .unwrap_or("{}")
                    .to_string(),
            });
        }
    }

    Ok(ChatReply {
        content,
        tool_calls,
    })
}

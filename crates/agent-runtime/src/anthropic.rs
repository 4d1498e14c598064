//! Anthropic Messages Provider
//!
//! Translates canonical messages to the content-block format:
//! - system messages move to the top-level `system` field
//! - tool results become `tool_result` blocks inside a user turn
//! - assistant tool calls become `tool_use` blocks
//!
//! The API requires user/assistant alternation, so consecutive user-side
//! turns (several tool results, or a tool result followed by user text) are
//! merged into one message.

use agent_core::{
    error::{AgentError, Result},
    message::{Message, MessageContent, Role, ToolCall},
    provider::{GenerationOptions, LlmProvider, Output},
    tool::ToolDefinition,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::http::{self, HeaderAuth};

pub const ANTHROPIC_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5";

/// How multiple text blocks in one reply collapse into the message text
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TextBlockPolicy {
    /// Join every text block with a newline
    #[default]
    Concatenate,
    /// Keep only the last text block
    LastWins,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,

    #[serde(default)]
    stop_reason: Option<String>,

    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

/// Build the Messages API request body
pub fn to_request(
    messages: &[Message],
    tools: &[ToolDefinition],
    options: &GenerationOptions,
) -> Value {
    let system: Vec<String> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .filter_map(Message::text)
        .collect();

    let mut converted: Vec<Value> = Vec::new();
    for message in messages.iter().filter(|m| m.role != Role::System) {
        let (role, blocks) = convert_message(message);
        if blocks.is_empty() {
            continue;
        }

        match converted.last_mut() {
            Some(last) if last["role"] == role => {
                if let Some(content) = last["content"].as_array_mut() {
                    content.extend(blocks);
                }
            }
            _ => converted.push(json!({"role": role, "content": blocks})),
        }
    }

    let mut body = json!({
        "model": options.model,
        "max_tokens": options.max_tokens,
        "messages": converted,
    });
    if !system.is_empty() {
        body["system"] = json!(system.join("\n\n"));
    }
    if !tools.is_empty() {
        body["tools"] = json!(
            tools
                .iter()
                .map(|t| json!({
                    "name": t.function.name,
                    "description": t.function.description,
                    "input_schema": t.function.parameters,
                }))
                .collect::<Vec<_>>()
        );
    }
    if let Some(temperature) = options.temperature {
        body["temperature"] = json!(temperature);
    }
    body
}

fn convert_message(message: &Message) -> (&'static str, Vec<Value>) {
    match message.role {
        Role::Tool => {
            let block = json!({
                "type": "tool_result",
                "tool_use_id": message.tool_call_id.clone().unwrap_or_default(),
                "content": message.text().unwrap_or_default(),
            });
            ("user", vec![block])
        }
        Role::Assistant => {
            let mut blocks = text_block(message);
            blocks.extend(message.tool_calls.iter().map(tool_use_block));
            ("assistant", blocks)
        }
        Role::User | Role::System => ("user", text_block(message)),
    }
}

fn text_block(message: &Message) -> Vec<Value> {
    message
        .text()
        .filter(|t| !t.is_empty())
        .map(|text| vec![json!({"type": "text", "text": text})])
        .unwrap_or_default()
}

fn tool_use_block(call: &ToolCall) -> Value {
    let input = serde_json::from_str::<Value>(call.arguments())
        .ok()
        .filter(Value::is_object)
        .unwrap_or_else(|| json!({}));
    json!({
        "type": "tool_use",
        "id": call.id,
        "name": call.name(),
        "input": input,
    })
}

/// Demultiplex a Messages API reply into the canonical output
fn from_response(response: MessagesResponse, policy: TextBlockPolicy) -> Result<Output> {
    if let Some(error) = response.error {
        return Err(AgentError::Provider(error.message));
    }
    if response.content.is_empty() {
        return Ok(Output::empty());
    }

    let mut texts: Vec<String> = Vec::new();
    let mut calls: Vec<ToolCall> = Vec::new();
    for block in response.content {
        match block {
            ContentBlock::Text { text } => texts.push(text),
            ContentBlock::ToolUse { id, name, input } => {
                let input = if input.is_null() { json!({}) } else { input };
                calls.push(ToolCall::new(id, name, input.to_string()));
            }
            ContentBlock::Other => {}
        }
    }

    let text = match policy {
        TextBlockPolicy::Concatenate => (!texts.is_empty()).then(|| texts.join("\n")),
        TextBlockPolicy::LastWins => texts.pop(),
    };

    let mut message = Message::assistant_tool_calls(calls);
    if let Some(text) = text {
        message.content = Some(MessageContent::Text(text));
    }

    let finish_reason = response.stop_reason.map(|reason| {
        match reason.as_str() {
            "tool_use" => "tool_calls",
            "end_turn" | "stop_sequence" => "stop",
            "max_tokens" => "length",
            other => other,
        }
        .to_string()
    });

    Ok(Output::from_message(message, finish_reason))
}

/// Anthropic Messages API provider
pub struct AnthropicProvider {
    name: String,
    endpoint: String,
    auth: HeaderAuth,
    options: GenerationOptions,
    policy: TextBlockPolicy,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>, options: GenerationOptions) -> Result<Self> {
        let auth = HeaderAuth::new()
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION);
        Ok(Self {
            name: "anthropic".into(),
            endpoint: ANTHROPIC_ENDPOINT.into(),
            auth,
            options,
            policy: TextBlockPolicy::default(),
            client: http::client(http::DEFAULT_TIMEOUT)?,
        })
    }

    /// Rename (used for log lines and audit records)
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Point at a different Messages endpoint (proxies, tests)
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_text_policy(mut self, policy: TextBlockPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, messages: &[Message], tools: &[ToolDefinition]) -> Result<Output> {
        let body = to_request(messages, tools, &self.options);
        tracing::debug!(
            model = %self.options.model,
            messages = messages.len(),
            tools = tools.len(),
            "messages request"
        );

        let response: MessagesResponse =
            http::post_json(&self.client, &self.endpoint, &self.auth, &body)
                .await?
                .json()?;
        from_response(response, self.policy)
    }
}

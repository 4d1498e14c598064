//! Chat-Completions Provider
//!
//! Implementation of `LlmProvider` for the flat chat-completion wire format:
//! OpenAI, NVIDIA and any OpenAI-compatible server (Ollama, vLLM, LM Studio).
//! Canonical messages already serialize in this shape, so they pass through.

use agent_core::{
    error::Result,
    message::Message,
    provider::{GenerationOptions, LlmProvider, Output},
    tool::ToolDefinition,
};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::http::{self, BearerAuth, NoAuth, RequestAuth};

pub const OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
pub const NVIDIA_ENDPOINT: &str = "https://integrate.api.nvidia.com/v1/chat/completions";

/// Path appended to an OpenAI-compatible base URL
const COMPAT_PATH: &str = "/v1/chat/completions";

/// Request body shared by every chat-completion backend
pub(crate) fn request_body(
    messages: &[Message],
    tools: &[ToolDefinition],
    options: &GenerationOptions,
) -> Value {
    let mut body = json!({
        "model": options.model,
        "messages": messages,
    });
    if !tools.is_empty() {
        body["tools"] = json!(tools);
    }
    if let Some(temperature) = options.temperature {
        body["temperature"] = json!(temperature);
    }
    body
}

/// Flat chat-completion provider
pub struct ChatCompletionsProvider {
    name: String,
    endpoint: String,
    auth: Box<dyn RequestAuth>,
    options: GenerationOptions,
    client: reqwest::Client,
}

impl ChatCompletionsProvider {
    /// Provider for an explicit endpoint
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        auth: Box<dyn RequestAuth>,
        options: GenerationOptions,
    ) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            endpoint: endpoint.into(),
            auth,
            options,
            client: http::client(http::DEFAULT_TIMEOUT)?,
        })
    }

    /// api.openai.com
    pub fn openai(api_key: impl Into<String>, options: GenerationOptions) -> Result<Self> {
        Self::new(
            "openai",
            OPENAI_ENDPOINT,
            Box::new(BearerAuth(api_key.into())),
            options,
        )
    }

    /// NVIDIA integrate API
    pub fn nvidia(api_key: impl Into<String>, options: GenerationOptions) -> Result<Self> {
        Self::new(
            "nvidia",
            NVIDIA_ENDPOINT,
            Box::new(BearerAuth(api_key.into())),
            options,
        )
    }

    /// Any OpenAI-compatible server at `base_url`; the key is optional
    pub fn compatible(
        base_url: &str,
        api_key: Option<String>,
        options: GenerationOptions,
    ) -> Result<Self> {
        let endpoint = format!("{}{}", base_url.trim_end_matches('/'), COMPAT_PATH);
        let auth: Box<dyn RequestAuth> = match api_key.filter(|k| !k.is_empty()) {
            Some(key) => Box::new(BearerAuth(key)),
            None => Box::new(NoAuth),
        };
        Self::new("compat", endpoint, auth, options)
    }

    /// Rename (used for log lines and default agent names)
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn options(&self) -> &GenerationOptions {
        &self.options
    }
}

#[async_trait]
impl LlmProvider for ChatCompletionsProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, messages: &[Message], tools: &[ToolDefinition]) -> Result<Output> {
        let body = request_body(messages, tools, &self.options);
        tracing::debug!(
            provider = %self.name,
            model = %self.options.model,
            messages = messages.len(),
            tools = tools.len(),
            "chat completion request"
        );

        let output: Output = http::post_json(&self.client, &self.endpoint, self.auth.as_ref(), &body)
            .await?
            .json()?;
        output.into_result()
    }
}

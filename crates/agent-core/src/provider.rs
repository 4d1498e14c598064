//! LLM Provider Strategy Pattern
//!
//! Defines a common interface for all LLM backends (chat-completion APIs,
//! content-block APIs, token-refreshing gateways) so the orchestration loop
//! works with any of them without code changes.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_core::provider::LlmProvider;
//!
//! let output = provider.send(&messages, &tools.definitions()).await?;
//! if let Some(choice) = output.first_choice() {
//!     println!("{:?}", choice.message.text());
//! }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};
use crate::message::Message;
use crate::tool::ToolDefinition;

/// Configuration for LLM generation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Model identifier (e.g., "gpt-4.1", "claude-sonnet-4-5")
    pub model: String,

    /// Maximum tokens to generate (required by content-block backends)
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Temperature for sampling; backend default when absent
    #[serde(default)]
    pub temperature: Option<f32>,
}

fn default_max_tokens() -> u32 {
    8192
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: "gpt-4.1".into(),
            max_tokens: default_max_tokens(),
            temperature: None,
        }
    }
}

impl GenerationOptions {
    pub fn for_model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }
}

/// One candidate reply
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Choice {
    pub message: Message,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Error payload reported inside an otherwise successful response
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderErrorBody {
    #[serde(default)]
    pub message: String,

    #[serde(rename = "type", default)]
    pub kind: Option<String>,

    /// Numeric or string depending on the backend
    #[serde(default)]
    pub code: Option<serde_json::Value>,
}

/// Normalized response of a single `send`
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Output {
    #[serde(default)]
    pub choices: Vec<Choice>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ProviderErrorBody>,
}

impl Output {
    /// Wrap a single assistant message
    pub fn from_message(message: Message, finish_reason: Option<String>) -> Self {
        Self {
            choices: vec![Choice {
                message,
                finish_reason,
            }],
            error: None,
        }
    }

    /// Output with zero choices
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn first_choice(&self) -> Option<&Choice> {
        self.choices.first()
    }

    /// Turn an embedded error payload into an `Err`
    pub fn into_result(self) -> Result<Self> {
        match self.error {
            Some(err) => Err(AgentError::Provider(err.message)),
            None => Ok(self),
        }
    }
}

/// Strategy trait for LLM providers
///
/// Implement this trait to add support for new LLM backends.
/// The orchestrator works exclusively through this interface.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Short backend name used in logs
    fn name(&self) -> &str;

    /// Send the conversation and the tool catalog; an empty `tools` slice
    /// means no tools are offered for this call.
    async fn send(&self, messages: &[Message], tools: &[ToolDefinition]) -> Result<Output>;
}

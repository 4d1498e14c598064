//! # agent-runtime
//!
//! Concrete backends and tools for the skillrun agent.
//!
//! ## Providers
//!
//! - **Chat completions**: OpenAI, NVIDIA and OpenAI-compatible servers (Ollama)
//! - **Anthropic**: Messages API with content-block translation
//! - **Copilot**: chat completions behind a refreshing session token
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_runtime::{config, tools};
//!
//! let agents = config::load_registry(&cwd).await?;
//! let orchestrator = Orchestrator::builder()
//!     .agents(agents)
//!     .tools(Arc::new(tools::builtin_registry(&cwd)))
//!     .build()?;
//! ```

pub mod anthropic;
pub mod config;
pub mod copilot;
pub mod exclude;
pub mod http;
pub mod openai;
pub mod tools;

pub use anthropic::{AnthropicProvider, TextBlockPolicy};
pub use config::{AgentBinding, AgentsConfig, ProviderKind};
pub use copilot::{CopilotProvider, Credential};
pub use openai::ChatCompletionsProvider;
pub use tools::builtin_registry;

// Re-export core types for convenience
pub use agent_core::{AgentError, LlmProvider, Message, Result, Role, Tool, ToolRegistry};

//! # agent-core
//!
//! Provider-agnostic agent orchestration: canonical messages, the tool-calling
//! loop with human confirmation, skill and agent routing, and session memory.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          Orchestrator                            │
//! │  ┌──────────────┐  ┌──────────────┐  ┌────────────────────────┐  │
//! │  │  Selector    │  │  Tool loop   │──│  LlmProvider (Strategy)│  │
//! │  │ skill/agent  │──│  + dedup     │  └────────────────────────┘  │
//! │  └──────────────┘  │  + confirm   │──┌────────────────────────┐  │
//! │                    └──────┬───────┘  │  ToolExecutor          │  │
//! │  ┌──────────────┐         │          └────────────────────────┘  │
//! │  │ SkillScanner │   ┌─────┴──────┐   ┌────────────────────────┐  │
//! │  └──────────────┘   │  Summary   │───│  SessionStore          │  │
//! │                     └────────────┘   └────────────────────────┘  │
//! └───────────────────────────┬──────────────────────────────────────┘
//!                             │ Event (mpsc) / Confirmation (oneshot)
//!                             ▼
//!                      presentation layer
//! ```
//!
//! The `LlmProvider` trait enables swapping between chat-completion APIs,
//! content-block APIs or token-refreshing gateways without changing the loop.

pub mod error;
pub mod event;
pub mod message;
pub mod orchestrator;
pub mod prompt;
pub mod provider;
pub mod selector;
pub mod session;
pub mod skill;
pub mod summary;
pub mod tool;

pub use error::{AgentError, Result};
pub use event::{Confirmation, ConfirmReply, Event, EventSender};
pub use message::{Message, MessageContent, Role, ToolCall};
pub use orchestrator::{Orchestrator, OrchestratorBuilder, OrchestratorConfig, RunContext, RunOptions, RunOutcome};
pub use prompt::PromptTemplates;
pub use provider::{Choice, GenerationOptions, LlmProvider, Output};
pub use selector::{AgentEntry, AgentRegistry};
pub use session::{FileSessionStore, MemorySessionStore, Session, SessionId, SessionStore};
pub use skill::{Skill, SkillCatalog, SkillScanner};
pub use tool::{Tool, ToolDefinition, ToolExecutor, ToolRegistry};

//! Tool System
//!
//! The tool boundary seen by the orchestration loop is [`ToolExecutor`]:
//! a catalog of definitions plus `execute(name, args_text) -> text`.
//! [`ToolRegistry`] is the standard executor, dispatching to registered [`Tool`]s.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{AgentError, Result};

/// Function part of a tool catalog entry
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,

    /// Human-readable description (shown to LLM)
    pub description: String,

    /// JSON Schema of the arguments object
    pub parameters: serde_json::Value,
}

/// Tool catalog entry, `{type: "function", function: {...}}` on the wire
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub kind: String,

    pub function: FunctionDefinition,
}

impl ToolDefinition {
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            kind: "function".into(),
            function: FunctionDefinition {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }
}

/// The boundary the orchestrator executes tools through
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Catalog offered to the model
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Run a named tool with the model's raw argument text
    async fn execute(&self, name: &str, arguments: &str) -> Result<String>;
}

/// Tool trait - implement to add new capabilities
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool's catalog entry
    fn definition(&self) -> ToolDefinition;

    /// Execute the tool with parsed arguments
    async fn execute(&self, arguments: serde_json::Value) -> Result<String>;
}

/// Registry for available tools
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Register a new tool
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        let definition = tool.definition();
        self.tools.insert(definition.function.name, Arc::new(tool));
    }

    /// Register a shared tool
    pub fn register_boxed(&mut self, tool: Arc<dyn Tool>) {
        let definition = tool.definition();
        self.tools.insert(definition.function.name, tool);
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Get tool names
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    async fn execute(&self, name: &str, arguments: &str) -> Result<String> {
        let tool = self
            .get(name)
            .ok_or_else(|| AgentError::ToolNotFound(name.to_string()))?;

        let arguments = arguments.trim();
        let parsed = if arguments.is_empty() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            serde_json::from_str(arguments).map_err(|e| {
                AgentError::ToolExecution(format!("invalid arguments for {}: {}", name, e))
            })?
        };

        tool.execute(parsed).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::function(
                "echo",
                "Echo the text argument",
                serde_json::json!({
                    "type": "object",
                    "properties": {"text": {"type": "string"}},
                    "required": ["text"]
                }),
            )
        }

        async fn execute(&self, arguments: serde_json::Value) -> Result<String> {
            arguments
                .get("text")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .ok_or_else(|| AgentError::ToolExecution("missing text".into()))
        }
    }

    #[test]
    fn test_tool_registry() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);

        assert_eq!(registry.len(), 1);
        assert!(registry.get("echo").is_some());
        assert!(registry.get("unknown").is_none());
        assert_eq!(registry.definitions()[0].kind, "function");
    }

    #[tokio::test]
    async fn test_execute_dispatches_and_reports_errors() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);

        let out = registry.execute("echo", r#"{"text": "hi"}"#).await.unwrap();
        assert_eq!(out, "hi");

        let missing = registry.execute("nope", "{}").await;
        assert!(matches!(missing, Err(AgentError::ToolNotFound(_))));

        let malformed = registry.execute("echo", "{not json").await;
        assert!(matches!(malformed, Err(AgentError::ToolExecution(_))));
    }
}

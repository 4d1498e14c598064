//! Built-in Tools
//!
//! Filesystem and arithmetic tools offered to every run. Relative paths
//! resolve against the run's working directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use agent_core::{
    error::{AgentError, Result},
    tool::{Tool, ToolDefinition, ToolRegistry},
};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::exclude::Excludes;

/// Longest file content returned to the model
const MAX_READ_BYTES: usize = 64 * 1024;

/// Most entries `list_files` reports
const MAX_LIST_ENTRIES: usize = 500;

/// Registry holding every built-in tool, rooted at `work_dir`
pub fn builtin_registry(work_dir: impl Into<PathBuf>) -> ToolRegistry {
    let work_dir = work_dir.into();
    let excludes = Arc::new(Excludes::load(&work_dir));
    tracing::debug!(rules = excludes.len(), "file tool excludes loaded");

    let mut registry = ToolRegistry::new();
    registry.register(ReadFileTool::new(&work_dir, Arc::clone(&excludes)));
    registry.register(ListFilesTool::new(&work_dir, excludes));
    registry.register(WriteFileTool::new(&work_dir));
    registry.register(CalculatorTool);
    registry
}

fn resolve(work_dir: &Path, path: &str) -> PathBuf {
    let path = Path::new(path.trim());
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        work_dir.join(path)
    }
}

/// Exclude rules see paths inside the working directory relative to it
fn is_excluded(excludes: &Excludes, work_dir: &Path, path: &Path) -> bool {
    excludes.is_excluded(path.strip_prefix(work_dir).unwrap_or(path))
}

fn string_arg<'a>(arguments: &'a Value, name: &str) -> Result<&'a str> {
    arguments
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| AgentError::ToolExecution(format!("missing argument: {}", name)))
}

fn io_error(path: &Path, err: std::io::Error) -> AgentError {
    AgentError::ToolExecution(format!("{}: {}", path.display(), err))
}

/// Read a UTF-8 text file
pub struct ReadFileTool {
    work_dir: PathBuf,
    excludes: Arc<Excludes>,
}

impl ReadFileTool {
    pub fn new(work_dir: &Path, excludes: Arc<Excludes>) -> Self {
        Self {
            work_dir: work_dir.to_path_buf(),
            excludes,
        }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(
            "read_file",
            "Read the contents of a text file",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "File path, absolute or relative to the working directory"}
                },
                "required": ["path"]
            }),
        )
    }

    async fn execute(&self, arguments: Value) -> Result<String> {
        let path = resolve(&self.work_dir, string_arg(&arguments, "path")?);
        if is_excluded(&self.excludes, &self.work_dir, &path) {
            return Err(AgentError::ToolExecution(format!(
                "path is excluded: {}",
                path.display()
            )));
        }
        let mut content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| io_error(&path, e))?;

        if content.len() > MAX_READ_BYTES {
            let mut cut = MAX_READ_BYTES;
            while !content.is_char_boundary(cut) {
                cut -= 1;
            }
            content.truncate(cut);
            content.push_str("\n... (truncated)");
        }
        Ok(content)
    }
}

/// List directory entries, optionally recursively
pub struct ListFilesTool {
    work_dir: PathBuf,
    excludes: Arc<Excludes>,
}

impl ListFilesTool {
    pub fn new(work_dir: &Path, excludes: Arc<Excludes>) -> Self {
        Self {
            work_dir: work_dir.to_path_buf(),
            excludes,
        }
    }
}

#[async_trait]
impl Tool for ListFilesTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(
            "list_files",
            "List files in a directory; directories end with '/'",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Directory path (default: working directory)"},
                    "recursive": {"type": "boolean", "description": "Descend into subdirectories"}
                }
            }),
        )
    }

    async fn execute(&self, arguments: Value) -> Result<String> {
        let root = resolve(
            &self.work_dir,
            arguments.get("path").and_then(Value::as_str).unwrap_or("."),
        );
        let recursive = arguments
            .get("recursive")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let mut entries: Vec<String> = Vec::new();
        let mut pending = vec![root.clone()];

        while let Some(dir) = pending.pop() {
            let mut reader = tokio::fs::read_dir(&dir)
                .await
                .map_err(|e| io_error(&dir, e))?;

            while let Some(entry) = reader.next_entry().await.map_err(|e| io_error(&dir, e))? {
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.starts_with('.') {
                    continue;
                }
                let path = entry.path();
                if is_excluded(&self.excludes, &self.work_dir, &path) {
                    continue;
                }
                let relative = path
                    .strip_prefix(&root)
                    .unwrap_or(&path)
                    .to_string_lossy()
                    .into_owned();

                let is_dir = entry.file_type().await.is_ok_and(|t| t.is_dir());
                if is_dir {
                    entries.push(format!("{}/", relative));
                    if recursive {
                        pending.push(path);
                    }
                } else {
                    entries.push(relative);
                }
            }
        }

        entries.sort();
        let total = entries.len();
        entries.truncate(MAX_LIST_ENTRIES);
        if total > MAX_LIST_ENTRIES {
            entries.push(format!("... ({} more)", total - MAX_LIST_ENTRIES));
        }
        if entries.is_empty() {
            return Ok("(empty)".into());
        }
        Ok(entries.join("\n"))
    }
}

/// Create or overwrite a file
pub struct WriteFileTool {
    work_dir: PathBuf,
}

impl WriteFileTool {
    pub fn new(work_dir: &Path) -> Self {
        Self {
            work_dir: work_dir.to_path_buf(),
        }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(
            "write_file",
            "Write text to a file, creating parent directories as needed",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "File path, absolute or relative to the working directory"},
                    "content": {"type": "string", "description": "Full file content"}
                },
                "required": ["path", "content"]
            }),
        )
    }

    async fn execute(&self, arguments: Value) -> Result<String> {
        let path = resolve(&self.work_dir, string_arg(&arguments, "path")?);
        let content = string_arg(&arguments, "content")?;
        if content.is_empty() {
            return Err(AgentError::ToolExecution(
                "refusing to write empty content".into(),
            ));
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, e))?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| io_error(&path, e))?;

        tracing::info!(path = %path.display(), bytes = content.len(), "file written");
        Ok(format!("wrote {} bytes to {}", content.len(), path.display()))
    }
}

/// Calculator tool - evaluates mathematical expressions
pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(
            "calculate",
            "Evaluate a mathematical expression with + - * / ^ and parentheses",
            json!({
                "type": "object",
                "properties": {
                    "expression": {"type": "string", "description": "Expression to evaluate (e.g., '2 + 2', '(1 + 2) * 3')"}
                },
                "required": ["expression"]
            }),
        )
    }

    async fn execute(&self, arguments: Value) -> Result<String> {
        let expr = string_arg(&arguments, "expression")?;
        let result = evaluate_expression(expr).map_err(AgentError::ToolExecution)?;
        Ok(format!("{} = {}", expr.trim(), result))
    }
}

/// Recursive-descent evaluator
///
/// ```text
/// expr   := term (('+' | '-') term)*
/// term   := power (('*' | '/') power)*
/// power  := unary ('^' power)?
/// unary  := '-' unary | atom
/// atom   := number | '(' expr ')'
/// ```
fn evaluate_expression(expr: &str) -> std::result::Result<f64, String> {
    let chars: Vec<char> = expr.chars().filter(|c| !c.is_whitespace()).collect();
    let mut parser = ExprParser { chars, pos: 0 };
    let value = parser.expr()?;
    if parser.pos != parser.chars.len() {
        return Err(format!("unexpected '{}'", parser.chars[parser.pos]));
    }
    Ok(value)
}

struct ExprParser {
    chars: Vec<char>,
    pos: usize,
}

impl ExprParser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn expr(&mut self) -> std::result::Result<f64, String> {
        let mut value = self.term()?;
        while let Some(op @ ('+' | '-')) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            value = if op == '+' { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    fn term(&mut self) -> std::result::Result<f64, String> {
        let mut value = self.power()?;
        while let Some(op @ ('*' | '/')) = self.peek() {
            self.pos += 1;
            let rhs = self.power()?;
            if op == '/' {
                if rhs == 0.0 {
                    return Err("Division by zero".into());
                }
                value /= rhs;
            } else {
                value *= rhs;
            }
        }
        Ok(value)
    }

    fn power(&mut self) -> std::result::Result<f64, String> {
        let base = self.unary()?;
        if self.peek() == Some('^') {
            self.pos += 1;
            let exponent = self.power()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn unary(&mut self) -> std::result::Result<f64, String> {
        if self.peek() == Some('-') {
            self.pos += 1;
            return Ok(-self.unary()?);
        }
        self.atom()
    }

    fn atom(&mut self) -> std::result::Result<f64, String> {
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                let value = self.expr()?;
                if self.peek() != Some(')') {
                    return Err("missing ')'".into());
                }
                self.pos += 1;
                Ok(value)
            }
            Some(c) if c.is_ascii_digit() || c == '.' => {
                let start = self.pos;
                while self
                    .peek()
                    .is_some_and(|c| c.is_ascii_digit() || c == '.')
                {
                    self.pos += 1;
                }
                let literal: String = self.chars[start..self.pos].iter().collect();
                literal
                    .parse::<f64>()
                    .map_err(|e| format!("Parse error: {}", e))
            }
            Some(c) => Err(format!("unexpected '{}'", c)),
            None => Err("unexpected end of expression".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::tool::ToolExecutor;

    #[test]
    fn test_calculator() {
        assert!((evaluate_expression("2 + 2").unwrap() - 4.0).abs() < f64::EPSILON);
        assert!((evaluate_expression("10 * 5").unwrap() - 50.0).abs() < f64::EPSILON);
        assert!((evaluate_expression("(2 + 3) * 4").unwrap() - 20.0).abs() < f64::EPSILON);
        assert!((evaluate_expression("2 ^ 8").unwrap() - 256.0).abs() < f64::EPSILON);
        assert!((evaluate_expression("10 - 2 - 3").unwrap() - 5.0).abs() < f64::EPSILON);
        assert!((evaluate_expression("-(1 - 4) * 2").unwrap() - 6.0).abs() < f64::EPSILON);
        assert!(evaluate_expression("1 / 0").is_err());
        assert!(evaluate_expression("(1 + 2").is_err());
        assert!(evaluate_expression("2 +").is_err());
    }

    #[tokio::test]
    async fn test_registry_has_builtins() {
        let registry = builtin_registry("/tmp");
        let mut names: Vec<String> = registry
            .definitions()
            .into_iter()
            .map(|d| d.function.name)
            .collect();
        names.sort();
        assert_eq!(names, ["calculate", "list_files", "read_file", "write_file"]);

        let out = registry
            .execute("calculate", r#"{"expression": "6 * 7"}"#)
            .await
            .unwrap();
        assert_eq!(out, "6 * 7 = 42");
    }

    #[tokio::test]
    async fn test_write_then_read_relative() {
        let dir = tempfile::tempdir().unwrap();
        let registry = builtin_registry(dir.path());

        registry
            .execute("write_file", r#"{"path": "notes/todo.md", "content": "buy milk"}"#)
            .await
            .unwrap();
        assert!(dir.path().join("notes/todo.md").exists());

        let content = registry
            .execute("read_file", r#"{"path": "notes/todo.md"}"#)
            .await
            .unwrap();
        assert_eq!(content, "buy milk");
    }

    #[tokio::test]
    async fn test_write_refuses_empty_content() {
        let dir = tempfile::tempdir().unwrap();
        let registry = builtin_registry(dir.path());
        let result = registry
            .execute("write_file", r#"{"path": "a.txt", "content": ""}"#)
            .await;
        assert!(matches!(result, Err(AgentError::ToolExecution(_))));
        assert!(!dir.path().join("a.txt").exists());
    }

    #[tokio::test]
    async fn test_list_files_skips_hidden() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "x").unwrap();
        std::fs::write(dir.path().join("src/nested/lib.rs"), "x").unwrap();
        std::fs::write(dir.path().join(".env"), "x").unwrap();

        let tool = ListFilesTool::new(dir.path(), Arc::new(Excludes::default()));
        let flat = tool.execute(json!({})).await.unwrap();
        assert_eq!(flat, "Cargo.toml\nsrc/");

        let deep = tool.execute(json!({"recursive": true})).await.unwrap();
        assert_eq!(deep, "Cargo.toml\nsrc/\nsrc/nested/\nsrc/nested/lib.rs");
    }

    #[tokio::test]
    async fn test_read_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ReadFileTool::new(dir.path(), Arc::new(Excludes::default()));
        let result = tool.execute(json!({"path": "nope.txt"})).await;
        assert!(matches!(result, Err(AgentError::ToolExecution(_))));
    }

    #[tokio::test]
    async fn test_secrets_and_ignored_paths_are_hidden() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "OPENAI_API_KEY=sk-secret").unwrap();
        std::fs::write(dir.path().join(".gitignore"), "build/\n").unwrap();
        std::fs::write(dir.path().join("server.key"), "-----BEGIN-----").unwrap();
        std::fs::create_dir_all(dir.path().join("build")).unwrap();
        std::fs::write(dir.path().join("build/out.txt"), "x").unwrap();
        std::fs::write(dir.path().join("main.rs"), "fn main() {}").unwrap();
        let registry = builtin_registry(dir.path());

        for path in [".env", "server.key", "build/out.txt"] {
            let args = json!({ "path": path }).to_string();
            let result = registry.execute("read_file", &args).await;
            match result {
                Err(AgentError::ToolExecution(msg)) => assert!(msg.contains("excluded"), "{}", msg),
                other => panic!("{} was readable: {:?}", path, other),
            }
        }

        let absolute = json!({ "path": dir.path().join(".env") }).to_string();
        assert!(registry.execute("read_file", &absolute).await.is_err());

        let listing = registry
            .execute("list_files", r#"{"recursive": true}"#)
            .await
            .unwrap();
        assert_eq!(listing, "main.rs");
    }
}

//! Agent Configuration
//!
//! Agent bindings come from `config.json`, looked up in `<cwd>/.skillrun/`
//! and then `~/.config/skillrun/`:
//!
//! ```json
//! {
//!   "models": [
//!     {"name": "claude", "description": "Long-form reasoning", "provider": "anthropic"},
//!     {"name": "local", "description": "Quick local answers", "provider": "compat",
//!      "model": "llama3.2", "base_url": "http://localhost:11434"}
//!   ],
//!   "default_model": "claude"
//! }
//! ```
//!
//! Without a config file, bindings are derived from the environment.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use agent_core::{
    error::{AgentError, Result},
    provider::{GenerationOptions, LlmProvider},
    selector::{AgentEntry, AgentRegistry},
};
use serde::{Deserialize, Serialize};

use crate::anthropic::{self, AnthropicProvider};
use crate::copilot::CopilotProvider;
use crate::openai::ChatCompletionsProvider;

pub const CONFIG_FILE: &str = "config.json";

/// Application directory name under `<cwd>` (dotted) and `~/.config`
pub const APP_DIR: &str = "skillrun";

const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";

/// Backend family of a binding
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Openai,
    Anthropic,
    Copilot,
    Nvidia,
    /// Any OpenAI-compatible server (Ollama, vLLM, LM Studio)
    Compat,
}

impl ProviderKind {
    fn default_model(self) -> &'static str {
        match self {
            ProviderKind::Openai | ProviderKind::Copilot => "gpt-4.1",
            ProviderKind::Anthropic => anthropic::DEFAULT_MODEL,
            ProviderKind::Nvidia => "meta/llama-3.3-70b-instruct",
            ProviderKind::Compat => "llama3.2",
        }
    }

    fn default_key_env(self) -> Option<&'static str> {
        match self {
            ProviderKind::Openai => Some("OPENAI_API_KEY"),
            ProviderKind::Anthropic => Some("ANTHROPIC_API_KEY"),
            ProviderKind::Nvidia => Some("NVIDIA_API_KEY"),
            ProviderKind::Copilot | ProviderKind::Compat => None,
        }
    }
}

/// One named agent: a provider kind plus model settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentBinding {
    pub name: String,

    #[serde(default)]
    pub description: String,

    pub provider: ProviderKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Environment variable holding the API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl AgentBinding {
    pub fn new(name: impl Into<String>, provider: ProviderKind) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            provider,
            model: None,
            base_url: None,
            api_key_env: None,
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn generation_options(&self) -> GenerationOptions {
        let mut options = GenerationOptions::for_model(
            self.model
                .clone()
                .unwrap_or_else(|| self.provider.default_model().to_string()),
        );
        if let Some(max_tokens) = self.max_tokens {
            options.max_tokens = max_tokens;
        }
        options.temperature = self.temperature;
        options
    }

    fn api_key(&self, env: &dyn Fn(&str) -> Option<String>) -> Option<String> {
        self.api_key_env
            .as_deref()
            .or_else(|| self.provider.default_key_env())
            .and_then(env)
            .filter(|k| !k.is_empty())
    }

    fn require_key(&self, env: &dyn Fn(&str) -> Option<String>) -> Result<String> {
        self.api_key(env).ok_or_else(|| {
            let var = self
                .api_key_env
                .as_deref()
                .or_else(|| self.provider.default_key_env())
                .unwrap_or("api_key_env");
            AgentError::Config(format!("agent '{}' needs {} to be set", self.name, var))
        })
    }

    /// Instantiate the provider for this binding
    pub async fn build(
        &self,
        config_dir: &Path,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Arc<dyn LlmProvider>> {
        let options = self.generation_options();
        let provider: Arc<dyn LlmProvider> = match self.provider {
            ProviderKind::Openai => Arc::new(
                ChatCompletionsProvider::openai(self.require_key(env)?, options)?
                    .with_name(&self.name),
            ),
            ProviderKind::Nvidia => Arc::new(
                ChatCompletionsProvider::nvidia(self.require_key(env)?, options)?
                    .with_name(&self.name),
            ),
            ProviderKind::Compat => {
                let base_url = self
                    .base_url
                    .clone()
                    .or_else(|| env("OLLAMA_HOST"))
                    .unwrap_or_else(|| DEFAULT_OLLAMA_HOST.into());
                Arc::new(
                    ChatCompletionsProvider::compatible(&base_url, self.api_key(env), options)?
                        .with_name(&self.name),
                )
            }
            ProviderKind::Anthropic => {
                let provider =
                    AnthropicProvider::new(self.require_key(env)?, options)?.with_name(&self.name);
                match &self.base_url {
                    Some(url) => Arc::new(provider.with_endpoint(url)),
                    None => Arc::new(provider),
                }
            }
            ProviderKind::Copilot => {
                Arc::new(
                    CopilotProvider::from_config_dir(config_dir, options)
                        .await?
                        .with_name(&self.name),
                )
            }
        };
        Ok(provider)
    }
}

/// Parsed `config.json`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentsConfig {
    #[serde(default)]
    pub models: Vec<AgentBinding>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl AgentsConfig {
    /// First directory holding a readable config with at least one model
    pub async fn load(dirs: &[PathBuf]) -> Option<(Self, PathBuf)> {
        for dir in dirs {
            let path = dir.join(CONFIG_FILE);
            let Ok(raw) = tokio::fs::read_to_string(&path).await else {
                continue;
            };
            match serde_json::from_str::<Self>(&raw) {
                Ok(config) if !config.models.is_empty() => {
                    tracing::debug!(path = %path.display(), models = config.models.len(), "agent config loaded");
                    return Some((config, dir.clone()));
                }
                Ok(_) => tracing::warn!(path = %path.display(), "agent config has no models"),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "invalid agent config"),
            }
        }
        None
    }

    /// Bindings derived from well-known environment variables
    pub fn from_env(env: &dyn Fn(&str) -> Option<String>) -> Self {
        let set = |key: &str| env(key).is_some_and(|v| !v.is_empty());
        let mut models = Vec::new();

        if set("ANTHROPIC_API_KEY") {
            let mut binding = AgentBinding::new("claude", ProviderKind::Anthropic);
            binding.description = "Anthropic Claude".into();
            binding.model = env("ANTHROPIC_MODEL");
            models.push(binding);
        }
        if set("OPENAI_API_KEY") {
            let mut binding = AgentBinding::new("openai", ProviderKind::Openai);
            binding.description = "OpenAI chat model".into();
            binding.model = env("OPENAI_MODEL");
            models.push(binding);
        }
        if set("NVIDIA_API_KEY") {
            let mut binding = AgentBinding::new("nvidia", ProviderKind::Nvidia);
            binding.description = "NVIDIA hosted model".into();
            binding.model = env("NVIDIA_MODEL");
            models.push(binding);
        }
        if set("OLLAMA_HOST") || models.is_empty() {
            let mut binding = AgentBinding::new("ollama", ProviderKind::Compat);
            binding.description = "Local Ollama model".into();
            binding.model = env("OLLAMA_MODEL");
            models.push(binding);
        }

        Self {
            models,
            default_model: None,
        }
    }

    /// Build every binding into a registry; bindings that fail are skipped
    pub async fn build_registry(
        &self,
        config_dir: &Path,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> Result<AgentRegistry> {
        let mut registry = AgentRegistry::new();
        for binding in &self.models {
            match binding.build(config_dir, env).await {
                Ok(provider) => registry.register(
                    AgentEntry::new(&binding.name, &binding.description),
                    provider,
                ),
                Err(e) => {
                    tracing::warn!(agent = %binding.name, error = %e, "skipping agent");
                }
            }
        }

        if registry.is_empty() {
            return Err(AgentError::Config(
                "no usable agent; add a config.json or set OPENAI_API_KEY / ANTHROPIC_API_KEY / OLLAMA_HOST".into(),
            ));
        }
        if let Some(default) = self.default_model.as_deref().filter(|d| !d.is_empty()) {
            if let Err(e) = registry.set_default(default) {
                tracing::warn!(error = %e, "default agent not available");
            }
        }
        Ok(registry)
    }
}

/// `~/.config/skillrun`
pub fn home_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".config").join(APP_DIR))
}

/// Config lookup order: project directory first, then the home config
pub fn config_dirs(cwd: &Path) -> Vec<PathBuf> {
    let mut dirs = vec![cwd.join(format!(".{}", APP_DIR))];
    dirs.extend(home_config_dir());
    dirs
}

/// Agent registry for `cwd` from config files, falling back to the environment
pub async fn load_registry(cwd: &Path) -> Result<AgentRegistry> {
    let env = |key: &str| std::env::var(key).ok();
    let dirs = config_dirs(cwd);
    let home = home_config_dir().unwrap_or_else(|| cwd.join(format!(".{}", APP_DIR)));

    match AgentsConfig::load(&dirs).await {
        Some((config, _dir)) => config.build_registry(&home, &env).await,
        None => {
            tracing::debug!("no agent config found, using environment");
            AgentsConfig::from_env(&env).build_registry(&home, &env).await
        }
    }
}

//! Skill & Agent Selection
//!
//! Both selectors make one tool-less call: the selector prompt as system
//! message, a JSON catalog plus the request as user message. The reply must be
//! exactly one catalog key (after trimming quotes and whitespace) or `NONE`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{AgentError, Result};
use crate::message::Message;
use crate::prompt::PromptTemplates;
use crate::provider::LlmProvider;
use crate::skill::{Skill, SkillCatalog};

/// Literal answer meaning "nothing fits"
pub const NO_MATCH: &str = "NONE";

/// Catalog entry for a configured backend binding
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentEntry {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl AgentEntry {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Configured agents. The first entry is the default and the fallback when
/// selection finds no match.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    entries: Vec<AgentEntry>,
    providers: HashMap<String, Arc<dyn LlmProvider>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a binding; a later binding with the same name replaces the provider
    pub fn register(&mut self, entry: AgentEntry, provider: Arc<dyn LlmProvider>) {
        if !self.entries.iter().any(|e| e.name == entry.name) {
            self.entries.push(entry.clone());
        }
        self.providers.insert(entry.name, provider);
    }

    /// Make `name` the default by moving it to the front
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        let idx = self
            .entries
            .iter()
            .position(|e| e.name == name)
            .ok_or_else(|| AgentError::Config(format!("unknown default agent: {}", name)))?;
        let entry = self.entries.remove(idx);
        self.entries.insert(0, entry);
        Ok(())
    }

    pub fn entries(&self) -> &[AgentEntry] {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn LlmProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn default_entry(&self) -> Option<&AgentEntry> {
        self.entries.first()
    }

    pub fn fallback(&self) -> Option<Arc<dyn LlmProvider>> {
        self.default_entry().and_then(|e| self.get(&e.name))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("entries", &self.entries)
            .finish()
    }
}

/// Normalize a selector reply and accept it only if `is_key` knows it
pub fn parse_selection(raw: &str, is_key: impl Fn(&str) -> bool) -> Option<String> {
    let answer = raw
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`' || c.is_whitespace());
    if answer.is_empty() || answer == NO_MATCH || !is_key(answer) {
        return None;
    }
    Some(answer.to_string())
}

async fn ask(provider: &dyn LlmProvider, system: &str, user: String) -> Result<Option<String>> {
    let messages = [Message::system(system.trim()), Message::user(user)];
    let output = provider.send(&messages, &[]).await?.into_result()?;
    Ok(output.first_choice().and_then(|c| c.message.text()))
}

/// Ask `provider` which skill fits `input`. An empty catalog costs no call.
pub async fn select_skill<'a>(
    provider: &dyn LlmProvider,
    prompts: &PromptTemplates,
    catalog: &'a SkillCatalog,
    input: &str,
) -> Result<Option<&'a Skill>> {
    if catalog.is_empty() {
        return Ok(None);
    }

    let descriptions = catalog.descriptions();
    let user = format!(
        "Available skills: {}\nUser request: {}",
        serde_json::to_string(&descriptions)?,
        input.trim()
    );

    let Some(reply) = ask(provider, &prompts.skill_selector, user).await? else {
        return Ok(None);
    };
    let chosen = parse_selection(&reply, |key| catalog.get(key).is_some());
    tracing::debug!(reply = %reply.trim(), chosen = ?chosen, "skill selection");
    Ok(chosen.and_then(|name| catalog.get(&name)))
}

/// Ask `provider` which agent fits `input`. Returns the chosen entry name;
/// `None` means the caller should use the registry's fallback.
pub async fn select_agent(
    provider: &dyn LlmProvider,
    prompts: &PromptTemplates,
    registry: &AgentRegistry,
    input: &str,
) -> Result<Option<String>> {
    if registry.len() < 2 {
        return Ok(None);
    }

    let user = format!(
        "Available agents:\n{}\nUser request: {}",
        serde_json::to_string(registry.entries())?,
        input.trim()
    );

    let Some(reply) = ask(provider, &prompts.agent_selector, user).await? else {
        return Ok(None);
    };
    let chosen = parse_selection(&reply, |key| registry.get(key).is_some());
    tracing::debug!(reply = %reply.trim(), chosen = ?chosen, "agent selection");
    Ok(chosen)
}

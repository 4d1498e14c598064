//! Orchestration Loop
//!
//! Drives one run: pick a skill, pick an agent, then iterate model calls and
//! tool executions until the model answers in plain text.
//!
//! ```text
//! SELECT_SKILL → SELECT_AGENT → ITERATE(0..N) → FINALIZE | FORCE_SUMMARIZE → DONE
//! ```
//!
//! Tool calls within a turn run strictly one after another. Every await on the
//! network, a tool or a confirmation races the run's cancellation token.

use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{AgentError, Result};
use crate::event::{self, Confirmation, Event, EventSender};
use crate::message::{Message, ToolCall};
use crate::prompt::PromptTemplates;
use crate::provider::{LlmProvider, Output};
use crate::selector::{self, AgentEntry, AgentRegistry};
use crate::session::{MemorySessionStore, Session, SessionId, SessionStore};
use crate::skill::{Skill, SkillCatalog};
use crate::summary;
use crate::tool::{ToolDefinition, ToolExecutor, ToolRegistry};

/// Result text for a tool the user declined
pub const SKIPPED_RESULT: &str = "Skipped by user";

/// Result text for a tool that failed
pub const FAILED_RESULT: &str = "no data";

/// Model-artifact delimiter that sometimes leaks into tool names
const TOOL_NAME_ARTIFACT: &str = "<|";

/// Loop configuration
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Directory tools and relative paths resolve against
    pub work_dir: PathBuf,

    /// Round-trip bound without a skill
    pub max_tool_iterations: usize,

    /// Round-trip bound when a skill matched
    pub max_skill_iterations: usize,

    /// Consecutive empty responses tolerated before giving up
    pub max_empty_responses: usize,

    /// Token budget for prior history replayed into the context
    pub history_token_budget: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("."),
            max_tool_iterations: 16,
            max_skill_iterations: 128,
            max_empty_responses: 3,
            history_token_budget: 8_000,
        }
    }
}

/// Per-run switches
#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    /// Continue an existing session; a fresh id is generated otherwise
    pub session: Option<SessionId>,

    /// Use this skill instead of asking the model
    pub skill: Option<String>,

    /// Use this agent instead of asking the model
    pub agent: Option<String>,

    /// Run tools without asking for confirmation
    pub allow_all: bool,
}

/// Channels shared between the run and its presentation layer
#[derive(Clone, Debug)]
pub struct RunContext {
    pub events: EventSender,
    pub cancel: CancellationToken,
}

impl RunContext {
    pub fn new(events: EventSender, cancel: CancellationToken) -> Self {
        Self { events, cancel }
    }

    async fn emit(&self, event: Event) {
        self.events.emit(event).await;
    }

    /// Await `fut` unless the run is cancelled first
    async fn guard<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AgentError::Cancelled("run cancelled".into())),
            result = fut => result,
        }
    }
}

/// Outcome of a completed run
#[derive(Clone, Debug)]
pub struct RunOutcome {
    /// Text shown to the user (summary block removed)
    pub text: String,

    /// Final state of the session
    pub session: Session,

    pub skill: Option<String>,
    pub agent: String,

    /// Adapter calls made by the tool loop, forced summary included
    pub model_calls: usize,
}

/// The orchestrator: agents, skills, tools and persistence for many runs
pub struct Orchestrator {
    agents: AgentRegistry,
    skills: SkillCatalog,
    tools: Arc<dyn ToolExecutor>,
    store: Arc<dyn SessionStore>,
    prompts: PromptTemplates,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    pub fn agents(&self) -> &AgentRegistry {
        &self.agents
    }

    pub fn skills(&self) -> &SkillCatalog {
        &self.skills
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Full run: selection, then the tool loop. Failures after setup are
    /// reported as an `Error` event before being returned.
    pub async fn run(&self, input: &str, options: RunOptions, ctx: &RunContext) -> Result<RunOutcome> {
        let result = self.run_inner(input.trim(), options, ctx).await;
        if let Err(e) = &result {
            ctx.emit(Event::Error(e.to_string())).await;
        }
        result
    }

    async fn run_inner(&self, input: &str, options: RunOptions, ctx: &RunContext) -> Result<RunOutcome> {
        let router = self
            .agents
            .fallback()
            .ok_or_else(|| AgentError::Config("no agents configured".into()))?;

        ctx.emit(Event::SkillSelect).await;
        let skill = match options.skill.as_deref() {
            Some(name) => Some(
                self.skills
                    .get(name)
                    .cloned()
                    .ok_or_else(|| AgentError::Skill(format!("skill not found: {}", name)))?,
            ),
            None => {
                let selected = ctx
                    .guard(selector::select_skill(
                        router.as_ref(),
                        &self.prompts,
                        &self.skills,
                        input,
                    ))
                    .await;
                recover_selection(selected, "skill")?.cloned()
            }
        };
        let skill_label = skill.as_ref().map_or("none", |s| s.name.as_str()).to_string();
        ctx.emit(Event::SkillResult(skill_label)).await;

        ctx.emit(Event::AgentSelect).await;
        let agent_name = match options.agent.clone() {
            Some(name) => {
                if self.agents.get(&name).is_none() {
                    return Err(AgentError::Config(format!("agent not found: {}", name)));
                }
                name
            }
            None => {
                let selected = ctx
                    .guard(selector::select_agent(
                        router.as_ref(),
                        &self.prompts,
                        &self.agents,
                        input,
                    ))
                    .await;
                match recover_selection(selected, "agent")? {
                    Some(name) => name,
                    None => self
                        .agents
                        .default_entry()
                        .map(|e| e.name.clone())
                        .ok_or_else(|| AgentError::Config("no agents configured".into()))?,
                }
            }
        };
        ctx.emit(Event::AgentResult(agent_name.clone())).await;

        let provider = self
            .agents
            .get(&agent_name)
            .ok_or_else(|| AgentError::Config(format!("agent not found: {}", agent_name)))?;

        let session = options.session.unwrap_or_default();
        let mut outcome = self
            .execute_inner(provider.as_ref(), skill.as_ref(), input, session, options.allow_all, ctx)
            .await?;
        outcome.agent = agent_name;
        Ok(outcome)
    }

    /// Run the tool loop with an already chosen provider and skill
    pub async fn execute(
        &self,
        provider: &dyn LlmProvider,
        skill: Option<&Skill>,
        input: &str,
        session: SessionId,
        allow_all: bool,
        ctx: &RunContext,
    ) -> Result<RunOutcome> {
        let result = self
            .execute_inner(provider, skill, input.trim(), session, allow_all, ctx)
            .await;
        if let Err(e) = &result {
            ctx.emit(Event::Error(e.to_string())).await;
        }
        result
    }

    async fn execute_inner(
        &self,
        provider: &dyn LlmProvider,
        skill: Option<&Skill>,
        input: &str,
        session_id: SessionId,
        allow_all: bool,
        ctx: &RunContext,
    ) -> Result<RunOutcome> {
        // a skill without instructions behaves like no skill
        let skill = skill.filter(|s| !s.body.trim().is_empty());

        let prior = self.store.load_history(&session_id).await.unwrap_or_else(|e| {
            tracing::warn!(session = %session_id, error = %e, "failed to load history");
            Vec::new()
        });
        let summary = self.store.load_summary(&session_id).await.unwrap_or_else(|e| {
            tracing::warn!(session = %session_id, error = %e, "failed to load summary");
            None
        });

        let system = self
            .prompts
            .render_system(&self.config.work_dir, skill, summary.as_ref());
        let mut session = Session::start(
            session_id,
            system,
            prior,
            input,
            self.config.history_token_budget,
        );

        let limit = if skill.is_some() {
            self.config.max_skill_iterations
        } else {
            self.config.max_tool_iterations
        };
        let definitions = self.tools.definitions();

        let mut run = RunState {
            skill: skill.map(|s| s.name.clone()),
            agent: provider.name().to_string(),
            allow_all,
            cache: HashMap::new(),
            empty_responses: 0,
            model_calls: 0,
        };

        tracing::info!(
            session = %session.id,
            provider = provider.name(),
            skill = ?run.skill,
            limit,
            "starting run"
        );

        for iteration in 0..limit {
            let output = self
                .send(provider, &session.messages, &definitions, &mut run, ctx)
                .await?;

            let Some(choice) = output.choices.into_iter().next() else {
                run.empty_responses += 1;
                tracing::warn!(iteration, count = run.empty_responses, "empty response");
                if run.empty_responses >= self.config.max_empty_responses {
                    let apology = self.prompts.apology.clone();
                    return self.finalize(session, &apology, run, ctx).await;
                }
                continue;
            };
            run.empty_responses = 0;

            if choice.message.has_tool_calls() {
                self.handle_tool_calls(&mut session, choice.message, &mut run, ctx)
                    .await?;
                continue;
            }

            let text = choice
                .message
                .text()
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| self.prompts.apology.clone());
            return self.finalize(session, &text, run, ctx).await;
        }

        tracing::warn!(limit, "iteration limit reached; forcing a summary");
        self.force_summarize(provider, session, run, ctx).await
    }

    async fn send(
        &self,
        provider: &dyn LlmProvider,
        messages: &[Message],
        tools: &[ToolDefinition],
        run: &mut RunState,
        ctx: &RunContext,
    ) -> Result<Output> {
        run.model_calls += 1;
        let output = ctx.guard(provider.send(messages, tools)).await?;
        output.into_result()
    }

    /// Process one assistant turn's tool calls in order
    async fn handle_tool_calls(
        &self,
        session: &mut Session,
        message: Message,
        run: &mut RunState,
        ctx: &RunContext,
    ) -> Result<()> {
        let calls = message.tool_calls.clone();
        session.messages.push(message);

        for call in &calls {
            self.handle_tool_call(session, call, run, ctx).await?;
        }
        Ok(())
    }

    async fn handle_tool_call(
        &self,
        session: &mut Session,
        call: &ToolCall,
        run: &mut RunState,
        ctx: &RunContext,
    ) -> Result<()> {
        let id = call.id.trim().to_string();
        let name = normalize_tool_name(call.name()).to_string();
        let args = call.arguments().trim().to_string();
        let key = format!("{}|{}", name, args);

        if let Some(cached) = run.cache.get(&key) {
            tracing::debug!(tool = %name, "reusing cached tool result");
            session.messages.push(Message::tool(cached.clone(), id.clone()));
            ctx.emit(Event::ToolResult {
                name,
                id,
                result: cached.clone(),
            })
            .await;
            return Ok(());
        }

        ctx.emit(Event::ToolCall {
            name: name.clone(),
            args: args.clone(),
            id: id.clone(),
        })
        .await;

        if !run.allow_all {
            match self.confirm(&name, &args, &id, ctx).await? {
                Confirmation::Approve => {}
                Confirmation::Skip => {
                    ctx.emit(Event::ToolSkipped {
                        name: name.clone(),
                        id: id.clone(),
                    })
                    .await;
                    session.record_tool(&name, &id, &args, SKIPPED_RESULT);
                    session.messages.push(Message::tool(SKIPPED_RESULT, id));
                    return Ok(());
                }
                Confirmation::Abort => {
                    tracing::info!(tool = %name, "run stopped by user");
                    ctx.cancel.cancel();
                    return Err(AgentError::Cancelled("stopped by user".into()));
                }
            }
        }

        ctx.emit(Event::ToolCallStart {
            name: name.clone(),
            id: id.clone(),
        })
        .await;

        let result = match ctx.guard(self.tools.execute(&name, &args)).await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() && ctx.cancel.is_cancelled() => return Err(e),
            Err(e) => {
                tracing::warn!(tool = %name, error = %e, "tool failed");
                FAILED_RESULT.to_string()
            }
        };

        if !result.is_empty() {
            ctx.emit(Event::ToolCallText {
                name: name.clone(),
                id: id.clone(),
                text: result.clone(),
            })
            .await;
        }
        ctx.emit(Event::ToolCallEnd {
            name: name.clone(),
            id: id.clone(),
        })
        .await;

        let content = format!("[{}] {}", name, result).trim().to_string();
        run.cache.insert(key, content.clone());

        ctx.emit(Event::ToolResult {
            name: name.clone(),
            id: id.clone(),
            result,
        })
        .await;
        session.record_tool(&name, &id, &args, content.clone());
        session.messages.push(Message::tool(content, id));
        Ok(())
    }

    /// Suspend until the presentation layer answers. A dropped reply counts as abort.
    async fn confirm(&self, name: &str, args: &str, id: &str, ctx: &RunContext) -> Result<Confirmation> {
        let (reply, answer) = event::confirmation();
        ctx.emit(Event::ToolConfirm {
            name: name.to_string(),
            args: args.to_string(),
            id: id.to_string(),
            reply,
        })
        .await;

        // an answer already given wins over a cancellation racing it
        tokio::select! {
            biased;
            answer = answer => Ok(answer.unwrap_or(Confirmation::Abort)),
            _ = ctx.cancel.cancelled() => Err(AgentError::Cancelled("run cancelled".into())),
        }
    }

    /// One extra tool-less call asking for an answer from what was gathered
    async fn force_summarize(
        &self,
        provider: &dyn LlmProvider,
        session: Session,
        mut run: RunState,
        ctx: &RunContext,
    ) -> Result<RunOutcome> {
        let mut messages = session.messages.clone();
        messages.push(Message::user(self.prompts.summarize.clone()));

        let text = match self.send(provider, &messages, &[], &mut run, ctx).await {
            Ok(output) => output
                .first_choice()
                .and_then(|c| c.message.text())
                .filter(|t| !t.trim().is_empty()),
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "forced summary failed");
                None
            }
        };

        let text = text.unwrap_or_else(|| self.prompts.apology.clone());
        self.finalize(session, &text, run, ctx).await
    }

    /// Terminal step shared by every successful path
    async fn finalize(
        &self,
        mut session: Session,
        text: &str,
        run: RunState,
        ctx: &RunContext,
    ) -> Result<RunOutcome> {
        let extraction = summary::extract(text);
        if let Some(latest) = &extraction.summary {
            self.persist_summary(&session.id, latest).await;
        }

        let cleaned = if extraction.text.trim().is_empty() {
            self.prompts.apology.clone()
        } else {
            extraction.text
        };

        let stamped = Message::assistant(format!("ts:{}\n{}", Utc::now().timestamp(), cleaned));
        session.messages.push(stamped.clone());
        session.histories.push(stamped);

        if let Err(e) = self
            .store
            .save_history(&session.id, &session.compacted_history())
            .await
        {
            tracing::warn!(session = %session.id, error = %e, "failed to write history");
        }

        ctx.emit(Event::Text(cleaned.clone())).await;
        ctx.emit(Event::Done).await;

        if !session.tools.is_empty() {
            if let Err(e) = self.store.save_tool_audit(&session.id, &session.tools).await {
                tracing::warn!(session = %session.id, error = %e, "failed to write tool audit");
            }
        }

        tracing::info!(session = %session.id, calls = run.model_calls, "run complete");
        Ok(RunOutcome {
            text: cleaned,
            session,
            skill: run.skill,
            agent: run.agent,
            model_calls: run.model_calls,
        })
    }

    async fn persist_summary(&self, id: &SessionId, latest: &serde_json::Value) {
        let previous = match self.store.load_summary(id).await {
            Ok(previous) => previous,
            Err(e) => {
                tracing::warn!(session = %id, error = %e, "failed to read summary");
                None
            }
        };
        let merged = summary::merge(previous.as_ref(), latest);
        if let Err(e) = self.store.save_summary(id, &merged).await {
            tracing::warn!(session = %id, error = %e, "failed to write summary");
        }
    }
}

/// Mutable bookkeeping owned by one run
struct RunState {
    skill: Option<String>,
    agent: String,
    allow_all: bool,
    /// `name|args` → result text
    cache: HashMap<String, String>,
    empty_responses: usize,
    model_calls: usize,
}

/// Selector failures degrade to "no match"; cancellation does not
fn recover_selection<T>(result: Result<Option<T>>, what: &str) -> Result<Option<T>> {
    match result {
        Ok(choice) => Ok(choice),
        Err(e) if e.is_cancelled() => Err(e),
        Err(e) => {
            tracing::warn!(error = %e, "{} selection failed; continuing without a match", what);
            Ok(None)
        }
    }
}

/// Trim a tool name and cut it at a leaked model delimiter
pub fn normalize_tool_name(raw: &str) -> &str {
    let name = raw.trim();
    match name.find(TOOL_NAME_ARTIFACT) {
        Some(idx) => &name[..idx],
        None => name,
    }
}

/// Builder for [`Orchestrator`]
pub struct OrchestratorBuilder {
    agents: AgentRegistry,
    skills: SkillCatalog,
    tools: Option<Arc<dyn ToolExecutor>>,
    store: Option<Arc<dyn SessionStore>>,
    prompts: PromptTemplates,
    config: OrchestratorConfig,
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            agents: AgentRegistry::new(),
            skills: SkillCatalog::default(),
            tools: None,
            store: None,
            prompts: PromptTemplates::default(),
            config: OrchestratorConfig::default(),
        }
    }

    /// Single-agent setup
    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        let entry = AgentEntry::new(provider.name().to_string(), "default agent");
        self.agents.register(entry, provider);
        self
    }

    pub fn agents(mut self, agents: AgentRegistry) -> Self {
        self.agents = agents;
        self
    }

    pub fn skills(mut self, skills: SkillCatalog) -> Self {
        self.skills = skills;
        self
    }

    pub fn tools(mut self, tools: Arc<dyn ToolExecutor>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn prompts(mut self, prompts: PromptTemplates) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.work_dir = dir.into();
        self
    }

    pub fn max_tool_iterations(mut self, max: usize) -> Self {
        self.config.max_tool_iterations = max;
        self
    }

    pub fn max_skill_iterations(mut self, max: usize) -> Self {
        self.config.max_skill_iterations = max;
        self
    }

    pub fn build(self) -> Result<Orchestrator> {
        if self.agents.is_empty() {
            return Err(AgentError::Config("Provider is required".into()));
        }

        Ok(Orchestrator {
            agents: self.agents,
            skills: self.skills,
            tools: self.tools.unwrap_or_else(|| Arc::new(ToolRegistry::new())),
            store: self
                .store
                .unwrap_or_else(|| Arc::new(MemorySessionStore::new())),
            prompts: self.prompts,
            config: self.config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_tool_name() {
        assert_eq!(normalize_tool_name(" list_files "), "list_files");
        assert_eq!(normalize_tool_name("read_file<|channel|>commentary"), "read_file");
        assert_eq!(normalize_tool_name("calculate"), "calculate");
    }

    #[test]
    fn test_builder_requires_provider() {
        assert!(matches!(
            Orchestrator::builder().build(),
            Err(AgentError::Config(_))
        ));
    }

    #[test]
    fn test_default_limits() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_tool_iterations, 16);
        assert_eq!(config.max_skill_iterations, 128);
        assert_eq!(config.max_empty_responses, 3);
    }
}

//! End-to-end runs of the orchestration loop against scripted providers.

use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use agent_core::event::{self, Confirmation, Event};
use agent_core::summary::{SUMMARY_END, SUMMARY_START};
use agent_core::{
    AgentError, LlmProvider, Message, Orchestrator, Output, PromptTemplates, Result, Role,
    RunContext, RunOptions, RunOutcome, SessionId, SessionStore, Skill, SkillCatalog,
    ToolCall, ToolDefinition, ToolExecutor,
};
use agent_core::session::MemorySessionStore;

const APOLOGY: &str = "Sorry, nothing found.";

/// Replays canned outputs in order and records every request
struct ScriptedProvider {
    replies: Mutex<VecDeque<Output>>,
    requests: Mutex<Vec<(Vec<Message>, usize)>>,
}

impl ScriptedProvider {
    fn new(replies: Vec<Output>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn request(&self, idx: usize) -> (Vec<Message>, usize) {
        self.requests.lock().unwrap()[idx].clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(&self, messages: &[Message], tools: &[ToolDefinition]) -> Result<Output> {
        self.requests
            .lock()
            .unwrap()
            .push((messages.to_vec(), tools.len()));
        Ok(self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(Output::empty))
    }
}

/// What [`EndlessToolCaller`] answers once tools are withheld
#[derive(Clone, Copy)]
enum SummaryReply {
    Text(&'static str),
    Blank,
    Fails,
}

/// Always asks for another tool call with fresh arguments
struct EndlessToolCaller {
    calls: AtomicUsize,
    summary: SummaryReply,
}

impl EndlessToolCaller {
    fn new(summary: SummaryReply) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            summary,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for EndlessToolCaller {
    fn name(&self) -> &str {
        "endless"
    }

    async fn send(&self, _messages: &[Message], tools: &[ToolDefinition]) -> Result<Output> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if tools.is_empty() {
            return match self.summary {
                SummaryReply::Text(reply) => Ok(text(reply)),
                SummaryReply::Blank => Ok(text("   ")),
                SummaryReply::Fails => Err(AgentError::Provider("503: unavailable".into())),
            };
        }
        Ok(tool_calls(vec![ToolCall::new(
            format!("call_{}", n),
            "list_files",
            format!(r#"{{"path": "/tmp/{}"}}"#, n),
        )]))
    }
}

/// Never answers; signals once the request is in flight
struct StalledProvider {
    started: Arc<Notify>,
}

#[async_trait]
impl LlmProvider for StalledProvider {
    fn name(&self) -> &str {
        "stalled"
    }

    async fn send(&self, _messages: &[Message], _tools: &[ToolDefinition]) -> Result<Output> {
        self.started.notify_one();
        std::future::pending().await
    }
}

/// Tool that never finishes; signals once it started
struct StalledTools {
    started: Arc<Notify>,
}

#[async_trait]
impl ToolExecutor for StalledTools {
    fn definitions(&self) -> Vec<ToolDefinition> {
        FakeTools::new().definitions()
    }

    async fn execute(&self, _name: &str, _arguments: &str) -> Result<String> {
        self.started.notify_one();
        std::future::pending().await
    }
}

/// Counts executions; `fail` makes every call error
struct FakeTools {
    executed: AtomicUsize,
    fail: bool,
}

impl FakeTools {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            executed: AtomicUsize::new(0),
            fail: false,
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            executed: AtomicUsize::new(0),
            fail: true,
        })
    }

    fn executed(&self) -> usize {
        self.executed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolExecutor for FakeTools {
    fn definitions(&self) -> Vec<ToolDefinition> {
        vec![ToolDefinition::function(
            "list_files",
            "List files",
            json!({"type": "object", "properties": {"path": {"type": "string"}}}),
        )]
    }

    async fn execute(&self, name: &str, _arguments: &str) -> Result<String> {
        self.executed.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(AgentError::ToolExecution("disk on fire".into()));
        }
        assert_eq!(name, "list_files");
        Ok("a.txt\nb.txt".into())
    }
}

fn text(content: &str) -> Output {
    Output::from_message(Message::assistant(content), Some("stop".into()))
}

fn tool_calls(calls: Vec<ToolCall>) -> Output {
    Output::from_message(Message::assistant_tool_calls(calls), Some("tool_calls".into()))
}

fn prompts() -> PromptTemplates {
    PromptTemplates {
        apology: APOLOGY.into(),
        ..Default::default()
    }
}

fn label(event: &Event) -> String {
    match event {
        Event::SkillSelect => "SkillSelect".into(),
        Event::SkillResult(s) => format!("SkillResult:{}", s),
        Event::AgentSelect => "AgentSelect".into(),
        Event::AgentResult(s) => format!("AgentResult:{}", s),
        Event::Text(s) => format!("Text:{}", s),
        Event::ToolCall { name, .. } => format!("ToolCall:{}", name),
        Event::ToolConfirm { name, .. } => format!("ToolConfirm:{}", name),
        Event::ToolSkipped { name, .. } => format!("ToolSkipped:{}", name),
        Event::ToolCallStart { name, .. } => format!("ToolCallStart:{}", name),
        Event::ToolCallText { name, .. } => format!("ToolCallText:{}", name),
        Event::ToolCallEnd { name, .. } => format!("ToolCallEnd:{}", name),
        Event::ToolResult { name, result, .. } => format!("ToolResult:{}:{}", name, result),
        Event::Error(e) => format!("Error:{}", e),
        Event::Done => "Done".into(),
    }
}

/// Run with a presentation task answering every confirmation with `answer`
async fn run_with(
    orchestrator: &Orchestrator,
    input: &str,
    options: RunOptions,
    answer: Confirmation,
) -> (Result<RunOutcome>, Vec<String>, CancellationToken) {
    let (events, mut rx) = event::channel(16);
    let cancel = CancellationToken::new();
    let ctx = RunContext::new(events, cancel.clone());

    let consumer = tokio::spawn(async move {
        let mut seen = Vec::new();
        while let Some(event) = rx.recv().await {
            seen.push(label(&event));
            if let Event::ToolConfirm { reply, .. } = event {
                reply.answer(answer);
            }
        }
        seen
    });

    let result = orchestrator.run(input, options, &ctx).await;
    drop(ctx);
    let seen = consumer.await.unwrap();
    (result, seen, cancel)
}

fn allow_all() -> RunOptions {
    RunOptions {
        allow_all: true,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_scenario_a_tool_then_answer() {
    let provider = ScriptedProvider::new(vec![
        tool_calls(vec![ToolCall::new("call_1", "list_files", r#"{"path": "/tmp"}"#)]),
        text("There are two files."),
    ]);
    let tools = FakeTools::new();
    let orchestrator = Orchestrator::builder()
        .provider(provider.clone())
        .tools(tools.clone())
        .prompts(prompts())
        .build()
        .unwrap();

    let (result, events, _) =
        run_with(&orchestrator, "list files in /tmp", allow_all(), Confirmation::Approve).await;
    let outcome = result.unwrap();

    assert_eq!(provider.calls(), 2);
    assert_eq!(tools.executed(), 1);
    assert_eq!(outcome.text, "There are two files.");
    assert!(!events.iter().any(|e| e.starts_with("ToolConfirm")));
    assert!(events.contains(&"ToolCall:list_files".to_string()));
    assert_eq!(
        &events[events.len() - 2..],
        &["Text:There are two files.".to_string(), "Done".to_string()]
    );

    // second request carries the assistant tool turn and the tool result
    let (messages, tool_count) = provider.request(1);
    assert_eq!(tool_count, 1);
    let result = messages.last().unwrap();
    assert_eq!(result.role, Role::Tool);
    assert_eq!(result.tool_call_id.as_deref(), Some("call_1"));
    assert_eq!(result.text().as_deref(), Some("[list_files] a.txt\nb.txt"));
}

#[tokio::test]
async fn test_scenario_b_empty_responses_end_with_apology() {
    let provider = ScriptedProvider::new(Vec::new());
    let orchestrator = Orchestrator::builder()
        .provider(provider.clone())
        .tools(FakeTools::new())
        .prompts(prompts())
        .build()
        .unwrap();

    let (result, events, _) = run_with(&orchestrator, "hello", allow_all(), Confirmation::Approve).await;
    let outcome = result.unwrap();

    assert_eq!(provider.calls(), 3);
    assert_eq!(outcome.text, APOLOGY);
    let texts: Vec<_> = events.iter().filter(|e| e.starts_with("Text:")).collect();
    assert_eq!(texts, vec![&format!("Text:{}", APOLOGY)]);
    assert_eq!(events.last().map(String::as_str), Some("Done"));
}

#[tokio::test]
async fn test_scenario_c_summary_is_persisted_and_hidden() {
    let answer = format!(
        "All done.\n{}{{\"confirmed_needs\":[\"x\"]}}{}",
        SUMMARY_START, SUMMARY_END
    );
    let provider = ScriptedProvider::new(vec![text(&answer)]);
    let store = Arc::new(MemorySessionStore::new());
    let orchestrator = Orchestrator::builder()
        .provider(provider)
        .store(store.clone())
        .prompts(prompts())
        .build()
        .unwrap();

    let session = SessionId::from_string("c");
    let options = RunOptions {
        session: Some(session.clone()),
        allow_all: true,
        ..Default::default()
    };
    let (result, events, _) = run_with(&orchestrator, "do it", options, Confirmation::Approve).await;

    assert_eq!(result.unwrap().text, "All done.");
    assert!(events.contains(&"Text:All done.".to_string()));
    assert!(!events.iter().any(|e| e.contains(SUMMARY_START)));
    assert_eq!(
        store.load_summary(&session).await.unwrap(),
        Some(json!({"confirmed_needs": ["x"]}))
    );
}

#[tokio::test]
async fn test_scenario_d_summaries_merge_across_runs() {
    let wrap = |need: &str| {
        text(&format!(
            "ok\n{}{{\"confirmed_needs\":[\"{}\"]}}{}",
            SUMMARY_START, need, SUMMARY_END
        ))
    };
    let provider = ScriptedProvider::new(vec![wrap("a"), wrap("b")]);
    let store = Arc::new(MemorySessionStore::new());
    let orchestrator = Orchestrator::builder()
        .provider(provider.clone())
        .store(store.clone())
        .prompts(prompts())
        .build()
        .unwrap();

    let session = SessionId::from_string("d");
    for input in ["first", "second"] {
        let options = RunOptions {
            session: Some(session.clone()),
            allow_all: true,
            ..Default::default()
        };
        run_with(&orchestrator, input, options, Confirmation::Approve)
            .await
            .0
            .unwrap();
    }

    assert_eq!(
        store.load_summary(&session).await.unwrap(),
        Some(json!({"confirmed_needs": ["b", "a"]}))
    );

    // the second run saw the first run's summary and history
    let (messages, _) = provider.request(1);
    assert!(messages[0].text().unwrap().contains("\"a\""));
    assert_eq!(messages[1], Message::user("first"));
}

#[tokio::test]
async fn test_history_grows_by_one_answer_per_run() {
    let provider = ScriptedProvider::new(vec![
        tool_calls(vec![ToolCall::new("c1", "list_files", "{}")]),
        text("first answer"),
        text("second answer"),
    ]);
    let store = Arc::new(MemorySessionStore::new());
    let orchestrator = Orchestrator::builder()
        .provider(provider)
        .tools(FakeTools::new())
        .store(store.clone())
        .prompts(prompts())
        .build()
        .unwrap();
    let session = SessionId::from_string("h");

    for (input, expected) in [("one", 2), ("two", 4)] {
        let options = RunOptions {
            session: Some(session.clone()),
            allow_all: true,
            ..Default::default()
        };
        let outcome = run_with(&orchestrator, input, options, Confirmation::Approve)
            .await
            .0
            .unwrap();
        // setup appended the user turn; finalize appends exactly one answer
        assert_eq!(outcome.session.histories.len(), expected);

        let persisted = store.load_history(&session).await.unwrap();
        assert_eq!(persisted.len(), expected);
        for message in &persisted {
            assert!(matches!(message.role, Role::User | Role::Assistant));
            assert!(message.tool_calls.is_empty());
        }
        let last = persisted.last().unwrap().text().unwrap();
        assert!(last.starts_with("ts:"));
    }

    assert_eq!(store.audits(&session).await.len(), 1);
}

#[tokio::test]
async fn test_iteration_bound_then_forced_summary() {
    let provider = EndlessToolCaller::new(SummaryReply::Text("Forced summary."));
    let tools = FakeTools::new();
    let orchestrator = Orchestrator::builder()
        .provider(provider.clone())
        .tools(tools.clone())
        .prompts(prompts())
        .max_tool_iterations(4)
        .build()
        .unwrap();

    let (result, events, _) = run_with(&orchestrator, "loop", allow_all(), Confirmation::Approve).await;
    let outcome = result.unwrap();

    assert_eq!(provider.calls(), 5);
    assert_eq!(outcome.model_calls, 5);
    assert_eq!(tools.executed(), 4);
    assert_eq!(outcome.text, "Forced summary.");
    assert_eq!(events.last().map(String::as_str), Some("Done"));
}

#[tokio::test]
async fn test_identical_calls_execute_once() {
    let args = r#"{"path": "/tmp"}"#;
    let provider = ScriptedProvider::new(vec![
        tool_calls(vec![
            ToolCall::new("c1", "list_files", args),
            ToolCall::new("c2", "list_files<|channel|>", format!("  {}  ", args)),
        ]),
        text("done"),
    ]);
    let tools = FakeTools::new();
    let orchestrator = Orchestrator::builder()
        .provider(provider.clone())
        .tools(tools.clone())
        .prompts(prompts())
        .build()
        .unwrap();

    run_with(&orchestrator, "twice", allow_all(), Confirmation::Approve)
        .await
        .0
        .unwrap();

    assert_eq!(tools.executed(), 1);
    let (messages, _) = provider.request(1);
    let results: Vec<_> = messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .map(|m| (m.tool_call_id.clone(), m.text()))
        .collect();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].1, results[1].1);
    assert_eq!(results[1].0.as_deref(), Some("c2"));
}

#[tokio::test]
async fn test_tool_failure_becomes_no_data() {
    let provider = ScriptedProvider::new(vec![
        tool_calls(vec![ToolCall::new("c1", "list_files", "{}")]),
        text("could not list"),
    ]);
    let orchestrator = Orchestrator::builder()
        .provider(provider.clone())
        .tools(FakeTools::failing())
        .prompts(prompts())
        .build()
        .unwrap();

    let (result, _, _) = run_with(&orchestrator, "ls", allow_all(), Confirmation::Approve).await;
    assert!(result.is_ok());

    let (messages, _) = provider.request(1);
    assert_eq!(
        messages.last().unwrap().text().as_deref(),
        Some("[list_files] no data")
    );
}

#[tokio::test]
async fn test_skip_keeps_running_without_executing() {
    let provider = ScriptedProvider::new(vec![
        tool_calls(vec![ToolCall::new("c1", "list_files", "{}")]),
        text("skipped it"),
    ]);
    let tools = FakeTools::new();
    let orchestrator = Orchestrator::builder()
        .provider(provider.clone())
        .tools(tools.clone())
        .prompts(prompts())
        .build()
        .unwrap();

    let (result, events, _) =
        run_with(&orchestrator, "ls", RunOptions::default(), Confirmation::Skip).await;
    let outcome = result.unwrap();

    assert_eq!(tools.executed(), 0);
    assert!(events.contains(&"ToolConfirm:list_files".to_string()));
    assert!(events.contains(&"ToolSkipped:list_files".to_string()));
    let (messages, _) = provider.request(1);
    assert_eq!(
        messages.last().unwrap().text().as_deref(),
        Some("Skipped by user")
    );
    assert_eq!(outcome.session.tools.len(), 1);
}

#[tokio::test]
async fn test_abort_cancels_the_run() {
    let provider = ScriptedProvider::new(vec![
        tool_calls(vec![ToolCall::new("c1", "list_files", "{}")]),
        text("never sent"),
    ]);
    let tools = FakeTools::new();
    let orchestrator = Orchestrator::builder()
        .provider(provider.clone())
        .tools(tools.clone())
        .prompts(prompts())
        .build()
        .unwrap();

    let (result, events, cancel) =
        run_with(&orchestrator, "ls", RunOptions::default(), Confirmation::Abort).await;

    assert!(matches!(result, Err(AgentError::Cancelled(_))));
    assert!(cancel.is_cancelled());
    assert_eq!(tools.executed(), 0);
    assert_eq!(provider.calls(), 1);
    assert!(events.last().unwrap().starts_with("Error:"));
    assert!(!events.contains(&"Done".to_string()));
}

#[tokio::test]
async fn test_matched_skill_shapes_the_system_prompt() {
    let tmp = tempfile::TempDir::new().unwrap();
    let mut catalog = SkillCatalog::default();
    catalog.insert(Skill::parse(
        tmp.path(),
        "release",
        "---\nname: release\ndescription: Cut a release\n---\nBump the version, then tag it.",
    ));

    let provider = ScriptedProvider::new(vec![text("\"release\""), text("Tagged v1.2.0.")]);
    let orchestrator = Orchestrator::builder()
        .provider(provider.clone())
        .skills(catalog)
        .prompts(prompts())
        .work_dir(tmp.path())
        .build()
        .unwrap();

    let (result, events, _) =
        run_with(&orchestrator, "ship it", allow_all(), Confirmation::Approve).await;
    let outcome = result.unwrap();

    assert_eq!(outcome.skill.as_deref(), Some("release"));
    assert_eq!(outcome.agent, "scripted");
    assert_eq!(&events[..2], &["SkillSelect".to_string(), "SkillResult:release".to_string()]);

    // selection call offers no tools; the run's system prompt carries the skill
    let (selection, tool_count) = provider.request(0);
    assert_eq!(tool_count, 0);
    assert!(selection[1].text().unwrap().starts_with("Available skills: "));
    let (messages, _) = provider.request(1);
    assert!(messages[0].text().unwrap().contains("Bump the version, then tag it."));
}

#[tokio::test]
async fn test_cancel_before_run_reports_error() {
    let provider = ScriptedProvider::new(vec![text("hi")]);
    let orchestrator = Orchestrator::builder()
        .provider(provider.clone())
        .prompts(prompts())
        .build()
        .unwrap();

    let (events, mut rx) = event::channel(16);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let ctx = RunContext::new(events, cancel);

    let result = orchestrator.run("hi", allow_all(), &ctx).await;
    assert!(matches!(result, Err(AgentError::Cancelled(_))));
    assert_eq!(provider.calls(), 0);

    drop(ctx);
    let mut last = None;
    while let Some(event) = rx.recv().await {
        last = Some(label(&event));
    }
    assert!(last.unwrap().starts_with("Error:"));
}

#[tokio::test]
async fn test_failed_forced_summary_falls_back_to_apology() {
    for reply in [SummaryReply::Blank, SummaryReply::Fails] {
        let provider = EndlessToolCaller::new(reply);
        let orchestrator = Orchestrator::builder()
            .provider(provider.clone())
            .tools(FakeTools::new())
            .prompts(prompts())
            .max_tool_iterations(2)
            .build()
            .unwrap();

        let (result, events, _) =
            run_with(&orchestrator, "loop", allow_all(), Confirmation::Approve).await;
        let outcome = result.unwrap();

        assert_eq!(provider.calls(), 3);
        assert_eq!(outcome.text, APOLOGY);
        assert_eq!(
            &events[events.len() - 2..],
            &[format!("Text:{}", APOLOGY), "Done".to_string()]
        );
    }
}

/// Run `orchestrator`, cancelling as soon as `started` fires
async fn run_cancelled_when(
    orchestrator: &Orchestrator,
    started: Arc<Notify>,
) -> (Result<RunOutcome>, Vec<String>) {
    let (events, mut rx) = event::channel(16);
    let cancel = CancellationToken::new();
    let ctx = RunContext::new(events, cancel.clone());

    let consumer = tokio::spawn(async move {
        let mut seen = Vec::new();
        while let Some(event) = rx.recv().await {
            seen.push(label(&event));
        }
        seen
    });

    let run = orchestrator.run("ls", allow_all(), &ctx);
    let trigger = async {
        started.notified().await;
        cancel.cancel();
    };
    let (result, ()) = tokio::time::timeout(Duration::from_secs(5), async { tokio::join!(run, trigger) })
        .await
        .expect("cancellation did not interrupt the run");

    drop(ctx);
    (result, consumer.await.unwrap())
}

#[tokio::test]
async fn test_cancel_interrupts_model_call_in_flight() {
    let started = Arc::new(Notify::new());
    let orchestrator = Orchestrator::builder()
        .provider(Arc::new(StalledProvider {
            started: started.clone(),
        }))
        .tools(FakeTools::new())
        .prompts(prompts())
        .build()
        .unwrap();

    let (result, events) = run_cancelled_when(&orchestrator, started).await;

    assert!(matches!(result, Err(AgentError::Cancelled(_))));
    assert!(events.last().unwrap().starts_with("Error:"));
    assert!(!events.contains(&"Done".to_string()));
}

#[tokio::test]
async fn test_cancel_interrupts_tool_in_flight() {
    let started = Arc::new(Notify::new());
    let provider = ScriptedProvider::new(vec![
        tool_calls(vec![ToolCall::new("c1", "list_files", "{}")]),
        text("never sent"),
    ]);
    let orchestrator = Orchestrator::builder()
        .provider(provider.clone())
        .tools(Arc::new(StalledTools {
            started: started.clone(),
        }))
        .prompts(prompts())
        .build()
        .unwrap();

    let (result, events) = run_cancelled_when(&orchestrator, started).await;

    assert!(matches!(result, Err(AgentError::Cancelled(_))));
    assert_eq!(provider.calls(), 1);
    assert!(events.contains(&"ToolCallStart:list_files".to_string()));
    assert!(!events.iter().any(|e| e.starts_with("ToolResult")));
    assert!(events.last().unwrap().starts_with("Error:"));
}

#[tokio::test]
async fn test_skill_runs_get_the_larger_iteration_bound() {
    let tmp = tempfile::TempDir::new().unwrap();
    let mut catalog = SkillCatalog::default();
    catalog.insert(Skill::parse(
        tmp.path(),
        "crawl",
        "---\nname: crawl\ndescription: Walk a tree\n---\nList every directory.",
    ));

    let provider = EndlessToolCaller::new(SummaryReply::Text("Walked it."));
    let tools = FakeTools::new();
    let orchestrator = Orchestrator::builder()
        .provider(provider.clone())
        .tools(tools.clone())
        .skills(catalog)
        .prompts(prompts())
        .max_tool_iterations(4)
        .build()
        .unwrap();

    let options = RunOptions {
        skill: Some("crawl".into()),
        allow_all: true,
        ..Default::default()
    };
    let (result, _, _) = run_with(&orchestrator, "walk", options, Confirmation::Approve).await;
    let outcome = result.unwrap();

    assert_eq!(outcome.skill.as_deref(), Some("crawl"));
    assert_eq!(orchestrator.config().max_skill_iterations, 128);
    assert_eq!(tools.executed(), 128);
    assert_eq!(provider.calls(), 129);
    assert_eq!(outcome.text, "Walked it.");
}

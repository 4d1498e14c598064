//! skillrun CLI
//!
//! Discovers skills, picks an agent and runs the tool loop in the terminal,
//! asking before each tool runs unless `--allow` is given.

mod render;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent_core::{
    event, AgentError, FileSessionStore, Orchestrator, RunContext, RunOptions, SessionId, SkillCatalog,
    SkillScanner,
};
use agent_runtime::{builtin_registry, config};

/// Event queue depth between the run and the terminal
const EVENT_CAPACITY: usize = 16;

#[derive(Parser)]
#[command(name = "skillrun", version)]
#[command(about = "Run agent skills with tool calling from the terminal", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List discovered skills
    List,
    /// Run a named skill
    Run {
        /// Skill name as shown by `list`
        skill: String,
        /// Request for the agent
        input: String,
        #[command(flatten)]
        opts: RunArgs,
    },
    /// Let the model pick the skill and the agent
    Ask {
        /// Request for the agent
        input: String,
        #[command(flatten)]
        opts: RunArgs,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Run tools without asking
    #[arg(long)]
    allow: bool,

    /// Use this agent instead of asking the model
    #[arg(long)]
    agent: Option<String>,

    /// Continue an existing session
    #[arg(long)]
    session: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize tracing; stdout is reserved for the conversation
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match dispatch(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            render::print_error("Error", &describe(&e));
            ExitCode::FAILURE
        }
    }
}

/// Agent errors get their user-facing wording; anything else keeps its context chain
fn describe(err: &anyhow::Error) -> String {
    match err.downcast_ref::<AgentError>() {
        Some(agent_err) => agent_err.user_message(),
        None => format!("{:#}", err),
    }
}

async fn dispatch(command: Commands) -> anyhow::Result<()> {
    let cwd = std::env::current_dir().context("failed to resolve working directory")?;

    match command {
        Commands::List => {
            let catalog = SkillScanner::with_default_roots(&cwd).scan().await;
            list_skills(&catalog);
            Ok(())
        }
        Commands::Run { skill, input, opts } => run(&cwd, &input, Some(skill), opts).await,
        Commands::Ask { input, opts } => run(&cwd, &input, None, opts).await,
    }
}

fn list_skills(catalog: &SkillCatalog) {
    if catalog.is_empty() {
        println!("No skills found");
        println!("\nScanned paths:");
        for root in catalog.roots() {
            println!("  - {}", root.display());
        }
        return;
    }

    println!("Found {} skill(s):\n", catalog.len());
    for skill in catalog.iter() {
        println!("• {}", skill.name);
        if !skill.description.is_empty() {
            println!("  {}", skill.description);
        }
        println!("  Path: {}\n", skill.path.display());
    }
}

/// Sessions live next to the agent config
fn sessions_root(cwd: &Path) -> PathBuf {
    config::home_config_dir()
        .unwrap_or_else(|| cwd.join(format!(".{}", config::APP_DIR)))
        .join("sessions")
}

async fn run(cwd: &Path, input: &str, skill: Option<String>, opts: RunArgs) -> anyhow::Result<()> {
    if input.trim().is_empty() {
        anyhow::bail!("input must not be empty");
    }

    let skills = SkillScanner::with_default_roots(cwd).scan().await;
    if let Some(name) = skill.as_deref() {
        if skills.get(name).is_none() {
            anyhow::bail!("skill not found: {} (see `skillrun list`)", name);
        }
    }

    let agents = config::load_registry(cwd).await?;
    tracing::info!(agents = agents.len(), skills = skills.len(), "setup complete");

    let orchestrator = Orchestrator::builder()
        .agents(agents)
        .skills(skills)
        .tools(Arc::new(builtin_registry(cwd)))
        .store(Arc::new(FileSessionStore::new(sessions_root(cwd))))
        .work_dir(cwd)
        .build()?;

    let (events, rx) = event::channel(EVENT_CAPACITY);
    let cancel = CancellationToken::new();

    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_token.cancel();
        }
    });

    let renderer = tokio::spawn(render::consume(rx, render::Prompter::stdin(), cancel.clone()));

    let options = RunOptions {
        session: opts.session.map(SessionId::from_string),
        skill,
        agent: opts.agent,
        allow_all: opts.allow,
    };
    let ctx = RunContext::new(events, cancel);
    let result = orchestrator.run(input, options, &ctx).await;

    // closing the queue lets the renderer drain and exit
    drop(ctx);
    renderer.await.context("renderer task failed")?;

    let outcome = result?;
    render::print_hint(&format!(
        "session {} · agent {} · {} model call(s)",
        outcome.session.id, outcome.agent, outcome.model_calls
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_errors_ask_for_login() {
        let err = anyhow::Error::from(AgentError::Auth("token refresh failed, please login again".into()));
        assert_eq!(
            describe(&err),
            "Authentication failed: token refresh failed. Please log in again."
        );
    }

    #[test]
    fn test_setup_errors_keep_context() {
        let err = anyhow::anyhow!("no such directory").context("failed to resolve working directory");
        assert_eq!(
            describe(&err),
            "failed to resolve working directory: no such directory"
        );
    }
}

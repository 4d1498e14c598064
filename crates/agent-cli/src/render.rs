//! Terminal presentation of run events.
//!
//! The answer goes to stdout; progress markers and confirmation prompts go
//! to stderr so the answer can be piped.

use std::io::{BufRead, Write};

use agent_core::event::{ConfirmReply, Confirmation, Event};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const COLOR_OK: &str = "\x1b[32m";
const COLOR_WARN: &str = "\x1b[33m";
const COLOR_ERROR: &str = "\x1b[31m";
const COLOR_CONFIRM: &str = "\x1b[34m";
const COLOR_HINT: &str = "\x1b[90m";
const COLOR_RESET: &str = "\x1b[0m";

/// Longest tool argument or result preview
const PREVIEW_CHARS: usize = 160;

/// Reads answer lines on a plain thread so a pending read never holds up
/// runtime shutdown after Ctrl-C. The thread starts on the first prompt.
pub struct Prompter {
    source: Option<Box<dyn BufRead + Send>>,
    lines: Option<mpsc::Receiver<String>>,
}

impl Prompter {
    pub fn stdin() -> Self {
        Self::from_reader(std::io::BufReader::new(std::io::stdin()))
    }

    pub fn from_reader(reader: impl BufRead + Send + 'static) -> Self {
        Self {
            source: Some(Box::new(reader)),
            lines: None,
        }
    }

    /// Next line, or `None` once the input is closed or unreadable
    async fn next_line(&mut self) -> Option<String> {
        if let Some(source) = self.source.take() {
            self.lines = Some(spawn_reader(source));
        }
        self.lines.as_mut()?.recv().await
    }
}

fn spawn_reader(source: Box<dyn BufRead + Send>) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(1);
    let spawned = std::thread::Builder::new()
        .name("stdin-reader".into())
        .spawn(move || {
            for line in source.lines() {
                let Ok(line) = line else { break };
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        tracing::warn!(error = %e, "failed to start input reader");
    }
    rx
}

/// Drain events until the run closes the queue
pub async fn consume(mut rx: mpsc::Receiver<Event>, mut prompter: Prompter, cancel: CancellationToken) {
    while let Some(event) = rx.recv().await {
        match event {
            Event::SkillSelect => print_hint("selecting skill..."),
            Event::SkillResult(name) => print_line("[*]", "Skill", &name, COLOR_OK),
            Event::AgentSelect => print_hint("selecting agent..."),
            Event::AgentResult(name) => print_line("[*]", "Agent", &name, COLOR_OK),
            Event::ToolCall { name, args, .. } => {
                print_line("[*]", &format!("Tool: {}", name), &preview(&args), COLOR_HINT);
                if name == "write_file" {
                    print_write_content(&args);
                }
            }
            Event::ToolConfirm { name, reply, .. } => {
                confirm(&name, reply, &mut prompter, &cancel).await;
            }
            Event::ToolSkipped { name, .. } => print_line("[~]", "Skipped", &name, COLOR_WARN),
            Event::ToolCallStart { .. } | Event::ToolCallEnd { .. } => {}
            Event::ToolCallText { text, .. } => print_hint(&preview(&text)),
            Event::ToolResult { .. } => {}
            Event::Text(text) => {
                println!("\n{}", text.trim());
                let _ = std::io::stdout().flush();
            }
            // printed once by the caller from the returned error
            Event::Error(message) => tracing::debug!(%message, "run failed"),
            Event::Done => println!(),
        }
    }
}

async fn confirm(name: &str, reply: ConfirmReply, prompter: &mut Prompter, cancel: &CancellationToken) {
    eprint!(
        "[?] Run {}{}{}? {}[Y]es / [s]kip / s[t]op{} ",
        COLOR_CONFIRM, name, COLOR_RESET, COLOR_HINT, COLOR_RESET
    );
    let _ = std::io::stderr().flush();

    let answer = tokio::select! {
        _ = cancel.cancelled() => Confirmation::Abort,
        // closed or unreadable input cannot approve anything
        line = prompter.next_line() => line.map_or(Confirmation::Abort, |l| parse_answer(&l)),
    };

    // the run cancels its own token on abort
    reply.answer(answer);
}

/// Map a typed reply to a confirmation; empty input means yes
fn parse_answer(line: &str) -> Confirmation {
    match line.trim().to_lowercase().as_str() {
        "" | "y" | "yes" => Confirmation::Approve,
        "t" | "stop" | "q" | "quit" => Confirmation::Abort,
        _ => Confirmation::Skip,
    }
}

fn print_write_content(args: &str) {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(args) else {
        return;
    };
    if let Some(content) = value.get("content").and_then(|c| c.as_str()) {
        print_hint("──────────────────────────────────────────────────");
        for line in content.trim().lines() {
            print_hint(line);
        }
    }
}

fn preview(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= PREVIEW_CHARS {
        return flat;
    }
    let cut: String = flat.chars().take(PREVIEW_CHARS - 3).collect();
    format!("{}...", cut)
}

fn print_line(marker: &str, action: &str, text: &str, color: &str) {
    eprintln!("{} {}: {}{}{}", marker, action.trim(), color, text.trim(), COLOR_RESET);
}

pub fn print_error(action: &str, text: &str) {
    print_line("[!]", action, text, COLOR_ERROR);
}

pub fn print_hint(text: &str) {
    eprintln!("{}{}{}", COLOR_HINT, text.trim(), COLOR_RESET);
}

//! Run Events
//!
//! Progress and confirmation channel between the orchestration task (single
//! producer) and the presentation task (single consumer).

use tokio::sync::{mpsc, oneshot};

/// Answer to a tool confirmation request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Confirmation {
    /// Run the tool
    Approve,
    /// Do not run it; the model is told the user skipped it
    Skip,
    /// Stop the whole run
    Abort,
}

/// Reply half of a confirmation rendezvous. Answering consumes it, so each
/// request is answered at most once.
#[derive(Debug)]
pub struct ConfirmReply(oneshot::Sender<Confirmation>);

impl ConfirmReply {
    pub fn answer(self, confirmation: Confirmation) {
        // receiver gone means the run already ended
        let _ = self.0.send(confirmation);
    }
}

/// Create a confirmation rendezvous
pub fn confirmation() -> (ConfirmReply, oneshot::Receiver<Confirmation>) {
    let (tx, rx) = oneshot::channel();
    (ConfirmReply(tx), rx)
}

/// Everything the presentation layer can observe during a run
#[derive(Debug)]
pub enum Event {
    SkillSelect,
    SkillResult(String),
    AgentSelect,
    AgentResult(String),
    Text(String),
    ToolCall {
        name: String,
        args: String,
        id: String,
    },
    ToolConfirm {
        name: String,
        args: String,
        id: String,
        reply: ConfirmReply,
    },
    ToolSkipped {
        name: String,
        id: String,
    },
    ToolCallStart {
        name: String,
        id: String,
    },
    ToolCallText {
        name: String,
        id: String,
        text: String,
    },
    ToolCallEnd {
        name: String,
        id: String,
    },
    ToolResult {
        name: String,
        id: String,
        result: String,
    },
    Error(String),
    Done,
}

/// Producer side of the event queue
#[derive(Clone, Debug)]
pub struct EventSender {
    tx: mpsc::Sender<Event>,
}

impl EventSender {
    /// Deliver an event. A closed queue is not an error: the run keeps going
    /// without a presentation layer.
    pub async fn emit(&self, event: Event) {
        if self.tx.send(event).await.is_err() {
            tracing::debug!("event receiver dropped");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Bounded single-producer/single-consumer event queue
pub fn channel(capacity: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender { tx }, rx)
}

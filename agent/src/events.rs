//! Progress events for generations and workflow runs
//!
//! Orchestrators and workflows report what they are doing through an
//! [`EventSink`]. A sink built from an [`EventSender`] forwards events over an
//! unbounded tokio channel; the default sink drops them.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// Orchestrator received a prompt
    GenerationStart { message: String },

    /// Planner asked for `tool_calls` calls on iteration `number`
    Iteration { number: usize, tool_calls: usize },

    ToolStart { name: String, arguments: Value },

    ToolComplete {
        name: String,
        #[serde(with = "serde_millis")]
        duration: Duration,
        is_error: bool,
    },

    StepStart { index: usize, id: String },

    StepComplete {
        index: usize,
        id: String,
        #[serde(with = "serde_millis")]
        duration: Duration,
    },

    /// Workflow state changed (`running`, `completed`, `failed`)
    WorkflowStatus {
        workflow: String,
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step_index: Option<usize>,
    },

    /// Orchestrator produced its final text
    GenerationComplete {
        content: String,
        iterations: usize,
        #[serde(with = "serde_millis")]
        total_duration: Duration,
    },

    Error { message: String },
}

/// Durations travel as whole milliseconds
mod serde_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

pub type EventSender = mpsc::UnboundedSender<RunEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<RunEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Where a component reports its progress
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<EventSender>,
}

impl EventSink {
    pub fn new(tx: EventSender) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sink that drops everything
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.tx.is_some()
    }

    /// Forward `event`; a closed receiver is not an error
    pub fn send(&self, event: RunEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn generation_start(&self, prompt: &str) {
        self.send(RunEvent::GenerationStart {
            message: prompt.to_owned(),
        });
    }

    pub fn iteration(&self, number: usize, tool_calls: usize) {
        self.send(RunEvent::Iteration { number, tool_calls });
    }

    pub fn tool_start(&self, name: &str, arguments: &Value) {
        self.send(RunEvent::ToolStart {
            name: name.to_owned(),
            arguments: arguments.clone(),
        });
    }

    pub fn tool_complete(&self, name: &str, duration: Duration, is_error: bool) {
        self.send(RunEvent::ToolComplete {
            name: name.to_owned(),
            duration,
            is_error,
        });
    }

    pub fn step_start(&self, index: usize, id: &str) {
        self.send(RunEvent::StepStart { index, id: id.to_owned() });
    }

    pub fn step_complete(&self, index: usize, id: &str, duration: Duration) {
        self.send(RunEvent::StepComplete {
            index,
            id: id.to_owned(),
            duration,
        });
    }

    pub fn workflow_status(&self, workflow: &str, status: &str, step_index: Option<usize>) {
        self.send(RunEvent::WorkflowStatus {
            workflow: workflow.to_owned(),
            status: status.to_owned(),
            step_index,
        });
    }

    pub fn generation_complete(&self, content: &str, iterations: usize, total_duration: Duration) {
        self.send(RunEvent::GenerationComplete {
            content: content.to_owned(),
            iterations,
            total_duration,
        });
    }

    pub fn error(&self, message: &str) {
        self.send(RunEvent::Error {
            message: message.to_owned(),
        });
    }
}

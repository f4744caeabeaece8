use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Progress notifications produced while a task advances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    TurnCompleted {
        turn: usize,
        content: Option<String>,
    },
    ToolInvoked {
        tool_call_id: String,
        tool_name: String,
        arguments: Value,
    },
    ToolDeferred {
        tool_call_id: String,
        tool_name: String,
        deadline: DateTime<Utc>,
    },
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        success: bool,
        message: String,
        data: Value,
    },
    TaskCompleted {
        answer: String,
        code: String,
    },
    TaskCancelled,
    TaskFailed {
        error: String,
    },
}

impl AgentEvent {
    /// True for the three events that end a task.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::TaskCompleted { .. } | Self::TaskCancelled | Self::TaskFailed { .. }
        )
    }
}

/// Receiver for [`AgentEvent`]s. Implementations must not block.
pub trait AgentEventSink: Send {
    fn emit(&mut self, event: AgentEvent);
}

pub struct NullSink;

impl AgentEventSink for NullSink {
    fn emit(&mut self, _event: AgentEvent) {}
}

impl AgentEventSink for Vec<AgentEvent> {
    fn emit(&mut self, event: AgentEvent) {
        self.push(event);
    }
}

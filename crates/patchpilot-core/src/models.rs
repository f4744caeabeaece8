//! Gateway-facing task types

use std::fmt;

use chrono::{DateTime, Utc};
use patchpilot_ai::Message;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    AwaitingApproval,
    Completed,
    Cancelled,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A new task as handed to the gateway.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskSubmission {
    #[serde(alias = "user_id")]
    pub owner_id: String,
    #[serde(default)]
    pub message_history: Vec<Message>,
    pub query: String,
    #[serde(default)]
    pub code: String,
}

/// Point-in-time view of a task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSnapshot {
    pub task_id: String,
    pub owner_id: String,
    pub status: TaskStatus,
    pub turn: usize,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submission_accepts_user_id_alias() {
        let submission: TaskSubmission = serde_json::from_value(serde_json::json!({
            "user_id": "u-1",
            "message_history": [{"role": "user", "content": "hi"}],
            "query": "explain",
            "code": "x = 1"
        }))
        .unwrap();
        assert_eq!(submission.owner_id, "u-1");
        assert_eq!(submission.message_history.len(), 1);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::AwaitingApproval.is_terminal());
        assert_eq!(
            serde_json::to_value(TaskStatus::AwaitingApproval).unwrap(),
            "awaiting_approval"
        );
    }
}

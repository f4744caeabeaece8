//! Task payload carried between turns

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::llm::{Message, ToolCall};
use crate::tools::CodeBuffer;

/// Everything one task needs to take its next turn.
///
/// Owned by whichever worker is advancing the task; never shared between
/// tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskContext {
    pub task_id: String,
    pub owner_id: String,

    /// Number of model responses fully processed so far.
    pub turn: usize,

    /// Conversation so far. At turn 0 this is the caller-supplied history;
    /// from the first model response on it is the full message sequence.
    pub messages: Vec<Message>,

    pub code: CodeBuffer,
    pub query: String,

    /// Tool calls of the current response that have not been dispatched yet.
    #[serde(default)]
    pub queued_calls: VecDeque<ToolCall>,

    /// Id of the deferred call this task is parked on.
    #[serde(default)]
    pub awaiting: Option<String>,

    #[serde(default)]
    pub final_answer: Option<String>,
}

impl TaskContext {
    pub fn new(
        task_id: impl Into<String>,
        owner_id: impl Into<String>,
        history: Vec<Message>,
        query: impl Into<String>,
        code: impl Into<CodeBuffer>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            owner_id: owner_id.into(),
            turn: 0,
            messages: history,
            code: code.into(),
            query: query.into(),
            queued_calls: VecDeque::new(),
            awaiting: None,
            final_answer: None,
        }
    }

    pub fn is_initial_turn(&self) -> bool {
        self.turn == 0
    }
}

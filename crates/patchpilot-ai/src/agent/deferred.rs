//! Deferred (approval-gated) tool calls.
//!
//! A deferred call is `Pending` until it is either completed with a result
//! or expires at its deadline. Both transitions are terminal. The
//! coordinator keeps no clock of its own: expiry happens when the owner
//! calls [`DeferredCoordinator::expire_due`].

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferredCallState {
    Pending,
    Completed,
    Expired,
}

impl fmt::Display for DeferredCallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Expired => "expired",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredToolCall {
    pub call_id: String,
    pub task_id: String,
    pub tool_name: String,
    /// Tool result delivered to the task if the call expires.
    pub rejection_message: String,
    pub created_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub state: DeferredCallState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferredOutcome {
    Completed { result: String },
    Expired { rejection_message: String },
}

/// A terminal transition, ready to be fed back into the owning task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredResolution {
    pub task_id: String,
    pub call_id: String,
    pub tool_name: String,
    pub outcome: DeferredOutcome,
}

impl DeferredResolution {
    /// Text that becomes the tool's output in the conversation.
    pub fn tool_result(&self) -> &str {
        match &self.outcome {
            DeferredOutcome::Completed { result } => result,
            DeferredOutcome::Expired { rejection_message } => rejection_message,
        }
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.outcome, DeferredOutcome::Expired { .. })
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeferredError {
    #[error("No deferred call '{call_id}' is pending for task {task_id}")]
    UnknownDeferredCall { task_id: String, call_id: String },

    #[error("Deferred call '{call_id}' was already resolved ({state})")]
    AlreadyResolved {
        call_id: String,
        state: DeferredCallState,
    },

    #[error("Deferred call '{call_id}' passed its deadline at {deadline}")]
    Expired {
        call_id: String,
        deadline: DateTime<Utc>,
    },

    #[error("Deferred call '{call_id}' is already registered")]
    DuplicateCall { call_id: String },
}

type CallKey = (String, String);

fn key(task_id: &str, call_id: &str) -> CallKey {
    (task_id.to_string(), call_id.to_string())
}

/// Registry of deferred calls across all tasks.
#[derive(Default)]
pub struct DeferredCoordinator {
    calls: Mutex<HashMap<CallKey, DeferredToolCall>>,
}

impl DeferredCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending call whose deadline is `timeout` from now.
    pub fn request(
        &self,
        task_id: &str,
        call_id: &str,
        tool_name: &str,
        rejection_message: &str,
        timeout: Duration,
    ) -> Result<DeferredToolCall, DeferredError> {
        self.request_at(
            task_id,
            call_id,
            tool_name,
            rejection_message,
            timeout,
            Utc::now(),
        )
    }

    pub fn request_at(
        &self,
        task_id: &str,
        call_id: &str,
        tool_name: &str,
        rejection_message: &str,
        timeout: Duration,
        now: DateTime<Utc>,
    ) -> Result<DeferredToolCall, DeferredError> {
        let mut calls = self.calls.lock();
        let key = key(task_id, call_id);
        if calls.contains_key(&key) {
            return Err(DeferredError::DuplicateCall {
                call_id: call_id.to_string(),
            });
        }

        let timeout = TimeDelta::from_std(timeout).unwrap_or(TimeDelta::MAX);
        let deadline = now
            .checked_add_signed(timeout)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let call = DeferredToolCall {
            call_id: call_id.to_string(),
            task_id: task_id.to_string(),
            tool_name: tool_name.to_string(),
            rejection_message: rejection_message.to_string(),
            created_at: now,
            deadline,
            state: DeferredCallState::Pending,
        };
        calls.insert(key, call.clone());

        info!(
            task_id = %task_id,
            tool_call_id = %call_id,
            deadline = %deadline,
            "Deferred tool call registered"
        );
        Ok(call)
    }

    /// Resolve a pending call with `result`.
    pub fn complete(
        &self,
        task_id: &str,
        call_id: &str,
        result: &str,
    ) -> Result<DeferredResolution, DeferredError> {
        self.complete_at(task_id, call_id, result, Utc::now())
    }

    /// A call past its deadline is left for [`Self::expire_due`] so that
    /// exactly one resolution is ever produced for it.
    pub fn complete_at(
        &self,
        task_id: &str,
        call_id: &str,
        result: &str,
        now: DateTime<Utc>,
    ) -> Result<DeferredResolution, DeferredError> {
        let mut calls = self.calls.lock();
        let Some(call) = calls.get_mut(&key(task_id, call_id)) else {
            return Err(DeferredError::UnknownDeferredCall {
                task_id: task_id.to_string(),
                call_id: call_id.to_string(),
            });
        };

        if call.state != DeferredCallState::Pending {
            return Err(DeferredError::AlreadyResolved {
                call_id: call_id.to_string(),
                state: call.state,
            });
        }

        if now >= call.deadline {
            return Err(DeferredError::Expired {
                call_id: call_id.to_string(),
                deadline: call.deadline,
            });
        }

        call.state = DeferredCallState::Completed;
        info!(task_id = %task_id, tool_call_id = %call_id, "Deferred tool call completed");
        Ok(DeferredResolution {
            task_id: call.task_id.clone(),
            call_id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
            outcome: DeferredOutcome::Completed {
                result: result.to_string(),
            },
        })
    }

    /// Expire every pending call whose deadline is at or before `now`.
    pub fn expire_due(&self, now: DateTime<Utc>) -> Vec<DeferredResolution> {
        let mut calls = self.calls.lock();
        let mut expired = Vec::new();

        for call in calls.values_mut() {
            if call.state == DeferredCallState::Pending && call.deadline <= now {
                call.state = DeferredCallState::Expired;
                info!(
                    task_id = %call.task_id,
                    tool_call_id = %call.call_id,
                    "Deferred tool call expired"
                );
                expired.push(DeferredResolution {
                    task_id: call.task_id.clone(),
                    call_id: call.call_id.clone(),
                    tool_name: call.tool_name.clone(),
                    outcome: DeferredOutcome::Expired {
                        rejection_message: call.rejection_message.clone(),
                    },
                });
            }
        }

        expired
    }

    pub fn get(&self, task_id: &str, call_id: &str) -> Option<DeferredToolCall> {
        self.calls.lock().get(&key(task_id, call_id)).cloned()
    }

    pub fn has_pending(&self) -> bool {
        self.calls
            .lock()
            .values()
            .any(|call| call.state == DeferredCallState::Pending)
    }

    /// Drop every record owned by a finished task. Returns how many were removed.
    pub fn release_task(&self, task_id: &str) -> usize {
        let mut calls = self.calls.lock();
        let before = calls.len();
        calls.retain(|(owner, _), _| owner != task_id);
        let removed = before - calls.len();
        if removed > 0 {
            debug!(task_id = %task_id, removed, "Released deferred call records");
        }
        removed
    }
}

use patchpilot_ai::DeferredError;
use thiserror::Error;

/// Failures surfaced to gateway callers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Task {0} not found")]
    TaskNotFound(String),

    #[error("Task {task_id} already finished ({status})")]
    TaskFinished { task_id: String, status: String },

    #[error("Service is shutting down")]
    ShuttingDown,

    #[error("Task queue is full")]
    QueueFull,

    #[error(transparent)]
    Deferred(#[from] DeferredError),
}

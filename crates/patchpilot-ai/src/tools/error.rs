use thiserror::Error;

/// Failures to route a tool invocation to a handler.
///
/// These stay inside the conversation: the turn loop turns them into an
/// error tool result so the model can correct the call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },
}

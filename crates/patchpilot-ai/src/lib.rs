//! PatchPilot AI - agent core for conversational code editing
//!
//! This crate provides:
//! - Chat message types and the `LlmClient` seam (OpenAI-compatible client included)
//! - Code rendering with bracketed line numbers and the line-scoped patcher
//! - The closed tool registry (think, edit_code, request_code_execution)
//! - The deferred call coordinator for approval-gated tools
//! - The per-task turn state machine

pub mod agent;
pub mod error;
pub mod llm;
pub mod tools;

// Re-export commonly used types
pub use agent::{
    AgentEvent, AgentEventSink, DeferredCallState, DeferredCoordinator, DeferredError,
    DeferredOutcome, DeferredResolution, DeferredToolCall, NullSink, TaskContext, TurnConfig,
    TurnOutcome, TurnStateMachine,
};
pub use error::{AiError, Result};
pub use llm::{
    CompletionRequest, CompletionResponse, FinishReason, LlmClient, Message, OpenAIClient, Role,
    ToolCall,
};
pub use tools::{
    CodeBuffer, Dispatch, EditError, EditOutcome, IdeTool, ToolError, ToolOutput, ToolRegistry,
    ToolSchema, render_with_line_numbers, strip_line_numbers,
};

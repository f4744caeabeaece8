//! LLM client seam and providers

mod client;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock_client;
mod openai;

pub use client::{
    CompletionRequest, CompletionResponse, FinishReason, LlmClient, Message, Role, TokenUsage,
    ToolCall,
};
pub use openai::OpenAIClient;

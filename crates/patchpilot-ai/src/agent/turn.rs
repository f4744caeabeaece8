//! Turn state machine.
//!
//! One call to [`TurnStateMachine::run_turn`] builds the message sequence,
//! asks the model for its next step and dispatches whatever tool calls come
//! back. Deferred calls park the task; [`TurnStateMachine::resume`] feeds the
//! decision back in and finishes the interrupted turn.

use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::context::TaskContext;
use super::deferred::{DeferredCoordinator, DeferredResolution};
use super::events::{AgentEvent, AgentEventSink};
use super::prompt::{IDE_INSTRUCTIONS, initial_user_message};
use crate::error::{AiError, Result};
use crate::llm::{CompletionRequest, CompletionResponse, LlmClient, Message};
use crate::tools::{Dispatch, ToolRegistry};

/// Default upper bound on model responses per task.
pub const DEFAULT_MAX_TURNS: usize = 50;

/// Default sampling temperature for the IDE agent.
pub const DEFAULT_TEMPERATURE: f32 = 0.1;

#[derive(Debug, Clone)]
pub struct TurnConfig {
    pub instructions: String,
    pub temperature: Option<f32>,
    pub max_turns: usize,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            instructions: IDE_INSTRUCTIONS.to_string(),
            temperature: Some(DEFAULT_TEMPERATURE),
            max_turns: DEFAULT_MAX_TURNS,
        }
    }
}

/// Where a task stands after one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Every tool call of the response has a result; take another turn.
    Continue,
    /// Parked on a deferred call.
    Suspended { tool_call_id: String },
    /// The model produced its final answer.
    Completed { answer: String },
    Cancelled,
    TurnLimitReached,
}

impl TurnOutcome {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Cancelled | Self::TurnLimitReached
        )
    }
}

pub struct TurnStateMachine {
    llm: Arc<dyn LlmClient>,
    tools: ToolRegistry,
    config: TurnConfig,
}

impl TurnStateMachine {
    pub fn new(llm: Arc<dyn LlmClient>, tools: ToolRegistry, config: TurnConfig) -> Self {
        Self { llm, tools, config }
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn config(&self) -> &TurnConfig {
        &self.config
    }

    /// Message sequence sent to the model for the task's next turn.
    ///
    /// Turn 0 wraps the caller's history (minus empty entries) between the
    /// system instructions and the numbered-code user message. Later turns
    /// reuse the accumulated history as is.
    pub fn prepare_messages(&self, ctx: &TaskContext) -> Vec<Message> {
        if !ctx.is_initial_turn() {
            return ctx.messages.clone();
        }

        let mut messages = Vec::with_capacity(ctx.messages.len() + 2);
        messages.push(Message::system(self.config.instructions.clone()));
        messages.extend(ctx.messages.iter().filter(|m| !m.is_empty()).cloned());
        messages.push(Message::user(initial_user_message(&ctx.code, &ctx.query)));
        messages
    }

    /// Advance the task by one turn.
    ///
    /// Cancellation is honoured even while the task is parked on a deferred
    /// call. Nothing is written to `ctx` until the model call succeeds, so
    /// an `Err` leaves the task exactly as it was and the turn can be retried.
    pub async fn run_turn(
        &self,
        ctx: &mut TaskContext,
        coordinator: &DeferredCoordinator,
        sink: &mut dyn AgentEventSink,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome> {
        if cancel.is_cancelled() {
            return Ok(TurnOutcome::Cancelled);
        }
        if let Some(tool_call_id) = &ctx.awaiting {
            return Ok(TurnOutcome::Suspended {
                tool_call_id: tool_call_id.clone(),
            });
        }
        if !ctx.queued_calls.is_empty() {
            return Ok(self.drain_queued_calls(ctx, coordinator, sink, cancel));
        }
        if ctx.turn >= self.config.max_turns {
            warn!(task_id = %ctx.task_id, turn = ctx.turn, "Task reached its turn limit");
            return Ok(TurnOutcome::TurnLimitReached);
        }

        let messages = self.prepare_messages(ctx);
        let mut request = CompletionRequest::new(messages.clone()).with_tools(self.tools.schemas());
        if let Some(temperature) = self.config.temperature {
            request = request.with_temperature(temperature);
        }

        debug!(
            task_id = %ctx.task_id,
            turn = ctx.turn,
            messages = messages.len(),
            model = self.llm.model(),
            "Requesting completion"
        );
        let response = self.llm.complete(request).await?;

        if ctx.is_initial_turn() {
            ctx.messages = messages;
        }
        Ok(self.apply_response(ctx, response, coordinator, sink, cancel))
    }

    fn apply_response(
        &self,
        ctx: &mut TaskContext,
        response: CompletionResponse,
        coordinator: &DeferredCoordinator,
        sink: &mut dyn AgentEventSink,
        cancel: &CancellationToken,
    ) -> TurnOutcome {
        if response.tool_calls.is_empty() {
            let answer = response.content.unwrap_or_default();
            ctx.messages.push(Message::assistant(answer.clone()));
            ctx.final_answer = Some(answer.clone());
            ctx.turn += 1;

            info!(task_id = %ctx.task_id, turn = ctx.turn, "Task produced final answer");
            sink.emit(AgentEvent::TurnCompleted {
                turn: ctx.turn,
                content: Some(answer.clone()),
            });
            sink.emit(AgentEvent::TaskCompleted {
                answer: answer.clone(),
                code: ctx.code.as_str().to_string(),
            });
            return TurnOutcome::Completed { answer };
        }

        ctx.messages.push(Message::assistant_with_tool_calls(
            response.content,
            response.tool_calls.clone(),
        ));
        ctx.queued_calls.extend(response.tool_calls);
        self.drain_queued_calls(ctx, coordinator, sink, cancel)
    }

    /// Feed a deferred call's resolution back into its task and finish the turn.
    pub fn resume(
        &self,
        ctx: &mut TaskContext,
        resolution: &DeferredResolution,
        coordinator: &DeferredCoordinator,
        sink: &mut dyn AgentEventSink,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome> {
        match ctx.awaiting.as_deref() {
            Some(id) if id == resolution.call_id => {}
            other => {
                return Err(AiError::Agent(format!(
                    "task {} is not waiting on tool call {} (awaiting {:?})",
                    ctx.task_id, resolution.call_id, other
                )));
            }
        }

        let result = resolution.tool_result().to_string();
        ctx.messages.push(Message::tool_result(
            resolution.call_id.clone(),
            resolution.tool_name.clone(),
            result.clone(),
        ));
        ctx.awaiting = None;

        sink.emit(AgentEvent::ToolResult {
            tool_call_id: resolution.call_id.clone(),
            tool_name: resolution.tool_name.clone(),
            success: !resolution.is_expired(),
            message: result.clone(),
            data: json!({ "result": result, "expired": resolution.is_expired() }),
        });

        Ok(self.drain_queued_calls(ctx, coordinator, sink, cancel))
    }

    fn drain_queued_calls(
        &self,
        ctx: &mut TaskContext,
        coordinator: &DeferredCoordinator,
        sink: &mut dyn AgentEventSink,
        cancel: &CancellationToken,
    ) -> TurnOutcome {
        while let Some(call) = ctx.queued_calls.pop_front() {
            if cancel.is_cancelled() {
                ctx.queued_calls.push_front(call);
                return TurnOutcome::Cancelled;
            }

            sink.emit(AgentEvent::ToolInvoked {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                arguments: call.arguments.clone(),
            });

            match self.tools.dispatch(&call, &mut ctx.code) {
                Ok(Dispatch::Completed(output)) => {
                    ctx.messages.push(Message::tool_result(
                        call.id.clone(),
                        call.name.clone(),
                        output.message.clone(),
                    ));
                    sink.emit(AgentEvent::ToolResult {
                        tool_call_id: call.id,
                        tool_name: call.name,
                        success: output.success,
                        message: output.message,
                        data: output.data,
                    });
                }
                Ok(Dispatch::Deferred {
                    response_on_reject,
                    timeout,
                }) => match coordinator.request(
                    &ctx.task_id,
                    &call.id,
                    &call.name,
                    &response_on_reject,
                    timeout,
                ) {
                    Ok(deferred) => {
                        ctx.awaiting = Some(call.id.clone());
                        sink.emit(AgentEvent::ToolDeferred {
                            tool_call_id: call.id.clone(),
                            tool_name: call.name,
                            deadline: deferred.deadline,
                        });
                        return TurnOutcome::Suspended {
                            tool_call_id: call.id,
                        };
                    }
                    Err(e) => self.push_tool_error(ctx, sink, call.id, call.name, e.to_string()),
                },
                Err(e) => {
                    warn!(task_id = %ctx.task_id, tool_call_id = %call.id, error = %e, "Tool call rejected");
                    self.push_tool_error(ctx, sink, call.id, call.name, e.to_string());
                }
            }
        }

        ctx.turn += 1;
        let content = ctx
            .messages
            .iter()
            .rev()
            .find(|m| m.tool_calls.is_some())
            .map(|m| m.content.clone())
            .filter(|c| !c.is_empty());
        sink.emit(AgentEvent::TurnCompleted {
            turn: ctx.turn,
            content,
        });
        TurnOutcome::Continue
    }

    fn push_tool_error(
        &self,
        ctx: &mut TaskContext,
        sink: &mut dyn AgentEventSink,
        tool_call_id: String,
        tool_name: String,
        reason: String,
    ) {
        let message = format!("Error: {reason}");
        ctx.messages.push(Message::tool_result(
            tool_call_id.clone(),
            tool_name.clone(),
            message.clone(),
        ));
        sink.emit(AgentEvent::ToolResult {
            tool_call_id,
            tool_name,
            success: false,
            message,
            data: json!({ "error": reason }),
        });
    }
}

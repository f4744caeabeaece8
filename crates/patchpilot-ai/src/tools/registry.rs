//! Closed tool registry.
//!
//! The agent can call exactly three tools. Each one is a variant of
//! [`IdeTool`] with a typed argument struct; dispatch is an explicit match
//! on the variant after a name lookup.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use super::buffer::CodeBuffer;
use super::error::ToolError;
use super::output::{ToolOutput, ToolSchema};
use super::patch::EditError;
use crate::llm::ToolCall;

/// How long an approval-gated call may wait for a decision.
pub const DEFAULT_DEFERRED_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdeTool {
    Think,
    EditCode,
    RequestCodeExecution,
}

impl IdeTool {
    pub const ALL: [IdeTool; 3] = [
        IdeTool::Think,
        IdeTool::EditCode,
        IdeTool::RequestCodeExecution,
    ];

    /// Unique tool name (used in LLM function calls)
    pub fn name(self) -> &'static str {
        match self {
            Self::Think => "think",
            Self::EditCode => "edit_code",
            Self::RequestCodeExecution => "request_code_execution",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.name() == name)
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Think => {
                "Think deeply about the task and plan your next steps before executing"
            }
            Self::EditCode => "Edit code in a file",
            Self::RequestCodeExecution => {
                "Request the code to be run. The user must approve this request before the \
                 code is run."
            }
        }
    }

    pub fn parameters_schema(self) -> Value {
        match self {
            Self::Think => json!({
                "type": "object",
                "properties": {
                    "thoughts": {
                        "type": "string",
                        "description": "Your reasoning and plan"
                    }
                },
                "required": ["thoughts"]
            }),
            Self::EditCode => json!({
                "type": "object",
                "properties": {
                    "find": {
                        "type": "string",
                        "description": "The text to find and replace"
                    },
                    "find_start_line": {
                        "type": "integer",
                        "description": "The start line number where the 'find' text is located"
                    },
                    "find_end_line": {
                        "type": "integer",
                        "description": "The end line number where the 'find' text is located"
                    },
                    "replace": {
                        "type": "string",
                        "description": "The text to replace the 'find' text with"
                    }
                },
                "required": ["find", "find_start_line", "find_end_line", "replace"]
            }),
            Self::RequestCodeExecution => json!({
                "type": "object",
                "properties": {
                    "response_on_reject": {
                        "type": "string",
                        "description": "A message the agent should send if the user rejects the execution request."
                    }
                },
                "required": ["response_on_reject"]
            }),
        }
    }

    /// Build complete schema for LLM
    pub fn schema(self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }

    /// Deferred tools suspend the task until an external decision arrives.
    pub fn is_deferred(self) -> bool {
        matches!(self, Self::RequestCodeExecution)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThinkArgs {
    pub thoughts: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EditCodeArgs {
    pub find: String,
    pub find_start_line: i64,
    pub find_end_line: i64,
    pub replace: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestExecutionArgs {
    pub response_on_reject: String,
}

/// Typed arguments, one variant per tool.
#[derive(Debug, Clone)]
pub enum ToolArgs {
    Think(ThinkArgs),
    EditCode(EditCodeArgs),
    RequestCodeExecution(RequestExecutionArgs),
}

impl ToolArgs {
    pub fn parse(tool: IdeTool, arguments: &Value) -> Result<Self, ToolError> {
        let invalid = |e: serde_json::Error| ToolError::InvalidArguments {
            tool: tool.name().to_string(),
            reason: e.to_string(),
        };
        let arguments = arguments.clone();
        Ok(match tool {
            IdeTool::Think => Self::Think(serde_json::from_value(arguments).map_err(invalid)?),
            IdeTool::EditCode => {
                Self::EditCode(serde_json::from_value(arguments).map_err(invalid)?)
            }
            IdeTool::RequestCodeExecution => {
                Self::RequestCodeExecution(serde_json::from_value(arguments).map_err(invalid)?)
            }
        })
    }
}

/// What happened when a tool call was dispatched.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// The handler ran to completion; its output is the tool result.
    Completed(ToolOutput),
    /// The call must wait for an external decision.
    Deferred {
        response_on_reject: String,
        timeout: Duration,
    },
}

/// Registry of the tools exposed to the model.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    deferred_timeout: Duration,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            deferred_timeout: DEFAULT_DEFERRED_TIMEOUT,
        }
    }

    pub fn with_deferred_timeout(mut self, timeout: Duration) -> Self {
        self.deferred_timeout = timeout;
        self
    }

    pub fn deferred_timeout(&self) -> Duration {
        self.deferred_timeout
    }

    /// List all tool names
    pub fn list(&self) -> Vec<&'static str> {
        IdeTool::ALL.iter().map(|tool| tool.name()).collect()
    }

    /// Get schemas for all registered tools
    pub fn schemas(&self) -> Vec<ToolSchema> {
        IdeTool::ALL.iter().map(|tool| tool.schema()).collect()
    }

    /// Look up the tool named by `call`.
    pub fn resolve(&self, call: &ToolCall) -> Result<IdeTool, ToolError> {
        IdeTool::from_name(&call.name).ok_or_else(|| ToolError::UnknownTool(call.name.clone()))
    }

    /// Route a tool call to its handler. `code` is only touched by `edit_code`.
    pub fn dispatch(&self, call: &ToolCall, code: &mut CodeBuffer) -> Result<Dispatch, ToolError> {
        let tool = self.resolve(call)?;
        let args = ToolArgs::parse(tool, &call.arguments)?;
        debug!(tool = tool.name(), tool_call_id = %call.id, "Dispatching tool call");

        Ok(match args {
            ToolArgs::Think(args) => Dispatch::Completed(think(args)),
            ToolArgs::EditCode(args) => Dispatch::Completed(edit_code(args, code)),
            ToolArgs::RequestCodeExecution(args) => Dispatch::Deferred {
                response_on_reject: args.response_on_reject,
                timeout: self.deferred_timeout,
            },
        })
    }
}

fn think(args: ThinkArgs) -> ToolOutput {
    let data = json!({ "thoughts": args.thoughts });
    ToolOutput::success(args.thoughts, data)
}

fn edit_code(args: EditCodeArgs, code: &mut CodeBuffer) -> ToolOutput {
    let EditCodeArgs {
        find,
        find_start_line,
        find_end_line,
        replace,
    } = args;

    match code.apply_edit(&find, find_start_line, find_end_line, &replace) {
        Ok(outcome) => ToolOutput::success(
            format!(
                "Code successfully edited: replaced '{find}' with '{replace}' at lines {find_start_line}-{find_end_line}"
            ),
            json!({
                "find": find,
                "find_start_line": find_start_line,
                "find_end_line": find_end_line,
                "replace": replace,
                "old_text": outcome.old_text,
                "new_text": outcome.new_text,
                "new_code": outcome.new_code,
            }),
        ),
        Err(err @ EditError::InvalidRange { total_lines }) => ToolOutput::error(
            "Error: Invalid line numbers",
            json!({
                "error": err.to_string(),
                "total_lines": total_lines,
            }),
        ),
        Err(EditError::TextNotFound { existing_text }) => ToolOutput::error(
            format!("Error: Text '{find}' not found at lines {find_start_line}-{find_end_line}"),
            json!({
                "error": "Find text not found at specified lines",
                "existing_text": existing_text,
            }),
        ),
    }
}

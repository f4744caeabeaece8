//! Tool system: code rendering, line-scoped patching and the closed registry.

mod buffer;
mod error;
mod output;
mod patch;
mod registry;
mod render;

pub use buffer::CodeBuffer;
pub use error::ToolError;
pub use output::{ToolOutput, ToolSchema};
pub use patch::{EditError, EditOutcome, edit};
pub use registry::{
    DEFAULT_DEFERRED_TIMEOUT, Dispatch, EditCodeArgs, IdeTool, RequestExecutionArgs, ThinkArgs,
    ToolArgs, ToolRegistry,
};
pub use render::{render_with_line_numbers, strip_line_numbers};

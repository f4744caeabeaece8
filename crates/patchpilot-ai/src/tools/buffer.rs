use std::fmt;

use serde::{Deserialize, Serialize};

use super::patch::{self, EditError, EditOutcome};
use super::render::render_with_line_numbers;

/// The file under edit.
///
/// Stored as text; lines are always derived by splitting on `'\n'`, so line
/// numbers are recomputed after every successful edit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CodeBuffer(String);

impl CodeBuffer {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn lines(&self) -> std::str::Split<'_, char> {
        self.0.split('\n')
    }

    pub fn line_count(&self) -> usize {
        self.lines().count()
    }

    /// Line-numbered view for the model. Never store this back as code.
    pub fn render(&self) -> String {
        render_with_line_numbers(&self.0)
    }

    /// Apply a line-scoped edit; the buffer is only replaced on success.
    pub fn apply_edit(
        &mut self,
        find: &str,
        start_line: i64,
        end_line: i64,
        replace: &str,
    ) -> Result<EditOutcome, EditError> {
        let outcome = patch::edit(&self.0, find, start_line, end_line, replace)?;
        self.0.clone_from(&outcome.new_code);
        Ok(outcome)
    }
}

impl From<String> for CodeBuffer {
    fn from(code: String) -> Self {
        Self(code)
    }
}

impl From<&str> for CodeBuffer {
    fn from(code: &str) -> Self {
        Self(code.to_string())
    }
}

impl fmt::Display for CodeBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

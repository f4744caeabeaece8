//! Line-scoped find/replace.
//!
//! An edit names the 1-based inclusive line range it expects `find` to live
//! in. The text spanned by that range (the window) is the only text the edit
//! may touch, which keeps repeated snippets elsewhere in the file safe.

use thiserror::Error;

/// Rejected edit. The buffer is never modified when one of these is returned.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EditError {
    #[error("Line numbers out of range or invalid")]
    InvalidRange { total_lines: usize },

    #[error("Find text not found at specified lines")]
    TextNotFound { existing_text: String },
}

/// Successful edit, with both window versions for diff display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditOutcome {
    pub old_text: String,
    pub new_text: String,
    pub new_code: String,
}

/// Replace every occurrence of `find` inside lines `start_line..=end_line`.
///
/// Bounds follow the 1-based caller convention: `start_line >= 1`,
/// `end_line <= total_lines` and `start_line <= end_line`. Matching is plain
/// substring matching.
pub fn edit(
    code: &str,
    find: &str,
    start_line: i64,
    end_line: i64,
    replace: &str,
) -> Result<EditOutcome, EditError> {
    let lines: Vec<&str> = code.split('\n').collect();
    let total_lines = lines.len();

    if start_line < 1 || end_line > total_lines as i64 || start_line > end_line {
        return Err(EditError::InvalidRange { total_lines });
    }

    let start_idx = (start_line - 1) as usize;
    let end_idx = (end_line - 1) as usize;

    let existing_text = lines[start_idx..=end_idx].join("\n");
    if !existing_text.contains(find) {
        return Err(EditError::TextNotFound { existing_text });
    }

    let new_text = existing_text.replace(find, replace);

    let mut new_lines: Vec<&str> = Vec::with_capacity(total_lines);
    new_lines.extend_from_slice(&lines[..start_idx]);
    new_lines.extend(new_text.split('\n'));
    new_lines.extend_from_slice(&lines[end_idx + 1..]);
    let new_code = new_lines.join("\n");

    Ok(EditOutcome {
        old_text: existing_text,
        new_text,
        new_code,
    })
}

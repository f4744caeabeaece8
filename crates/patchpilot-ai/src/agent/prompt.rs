//! Prompt text for the IDE agent

use crate::tools::CodeBuffer;

pub const IDE_INSTRUCTIONS: &str = "\
You are an IDE assistant that helps with coding tasks. You can write, read, and analyze code.
For anything non-trivial, always start by making a plan for the coding task.

You will be given a code file and a query. Your job is to either respond to the query with an answer,
or edit the code file if the query requires it.

Please note, the code file will be shown to you in a format that displays the line numbers to make
it easier for you to make edits at the correct line numbers, when you write code you should write
valid code and NOT include the line numbers as part of the code.

When code is shown to you as:
[1]def hello_world():
[2]    print(\"Hello, world!\")

This means the code is actually:
def hello_world():
    print(\"Hello, world!\")

In your final response, just clearly and concisely explain what you did without writing any code. The code changes will be
shown to the user in a diff editor.
";

/// The single user message that opens a task: numbered code followed by the query.
pub fn initial_user_message(code: &CodeBuffer, query: &str) -> String {
    format!(
        "Code file with line numbers:\n{}\n---\nQuery: {query}",
        code.render()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_user_message_layout() {
        let code = CodeBuffer::new("def f():\n    return 1");
        assert_eq!(
            initial_user_message(&code, "make it return 2"),
            "Code file with line numbers:\n[1]def f():\n[2]    return 1\n---\nQuery: make it return 2"
        );
    }

    #[test]
    fn test_instructions_show_numbering_example() {
        assert!(IDE_INSTRUCTIONS.contains("[1]def hello_world():"));
        assert!(IDE_INSTRUCTIONS.contains("NOT include the line numbers"));
    }
}

//! Line-numbered code rendering.
//!
//! The model is shown `[<n>]<line>` for every line and told never to echo
//! the prefix back, so this format must stay byte-for-byte stable.

/// Render code with a 1-based `[n]` prefix on every line.
///
/// Lines are split on `'\n'` only, so a trailing newline renders as a final
/// numbered empty line.
pub fn render_with_line_numbers(code: &str) -> String {
    code.split('\n')
        .enumerate()
        .map(|(i, line)| format!("[{}]{}", i + 1, line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Inverse of [`render_with_line_numbers`]: drop one `[n]` prefix per line.
///
/// Lines without a numeric prefix are returned unchanged.
pub fn strip_line_numbers(rendered: &str) -> String {
    rendered
        .split('\n')
        .map(strip_prefix)
        .collect::<Vec<_>>()
        .join("\n")
}

fn strip_prefix(line: &str) -> &str {
    if let Some(rest) = line.strip_prefix('[')
        && let Some(close) = rest.find(']')
        && close > 0
        && rest[..close].bytes().all(|b| b.is_ascii_digit())
    {
        return &rest[close + 1..];
    }
    line
}

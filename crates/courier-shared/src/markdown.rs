//! Helpers for Telegram's Markdown parse mode.

/// Backslash-escape every markup-significant character.
pub fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(
            c,
            '_' | '*'
                | '['
                | ']'
                | '('
                | ')'
                | '~'
                | '`'
                | '>'
                | '#'
                | '+'
                | '='
                | '|'
                | '{'
                | '}'
                | '.'
                | '!'
                | '-'
        ) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Join `prefix` and `body` with a blank line, keeping the result within
/// `max` characters by cutting `body` and appending `...`.
pub fn caption_with_prefix(prefix: &str, body: &str, max: usize) -> String {
    let full = if body.is_empty() {
        prefix.to_string()
    } else {
        format!("{prefix}\n\n{body}")
    };
    if full.chars().count() <= max {
        return full;
    }

    let budget = max.saturating_sub(prefix.chars().count() + 2 + 3);
    let cut: String = body.chars().take(budget).collect();
    format!("{prefix}\n\n{cut}...")
}

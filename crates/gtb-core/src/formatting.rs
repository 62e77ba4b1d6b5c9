/// Split `text` into chunks of at most `limit` bytes for messengers with a
/// message size cap.
///
/// Prefers breaking after a newline, then after whitespace, and never splits
/// inside a UTF-8 character.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(4);
    if text.len() <= limit {
        return vec![text.to_string()];
    }

    let mut out = Vec::new();
    let mut rest = text;
    while rest.len() > limit {
        let mut cut = limit;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }

        let window = &rest[..cut];
        let at = window
            .rfind('\n')
            .or_else(|| window.rfind(char::is_whitespace))
            .map(|i| i + 1)
            .filter(|i| *i > limit / 2)
            .unwrap_or(cut);

        out.push(rest[..at].to_string());
        rest = &rest[at..];
    }
    if !rest.is_empty() {
        out.push(rest.to_string());
    }
    out
}

/// Truncate to at most `max_chars` characters (for error snippets in replies/logs).
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

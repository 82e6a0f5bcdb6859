//! Char-boundary safe text truncation.

/// Keep at most `max` bytes of `s`, cutting on a char boundary and marking
/// the cut.
pub fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) && end > 0 {
            end -= 1;
        }
        format!("{}... [truncated]", &s[..end])
    }
}

/// Last `max` bytes of `s`, trimmed. Tracebacks put the useful line last.
pub fn tail_excerpt(s: &str, max: usize) -> String {
    let trimmed = s.trim();
    if trimmed.len() <= max {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - max;
    while !trimmed.is_char_boundary(start) && start < trimmed.len() {
        start += 1;
    }
    format!("[truncated] ...{}", &trimmed[start..])
}

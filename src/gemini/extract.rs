//! JSON extraction from free-text model output.
//!
//! The reasoning service is asked for bare JSON but may still wrap the object
//! in prose or code fences; this isolates the first balanced `{...}` span.

/// Return the first balanced top-level JSON object span in `text`.
///
/// Brace counting skips braces inside double-quoted strings so a summary like
/// `"{braces}"` doesn't truncate the span. Returns `None` when no opening
/// brace exists or the span never closes.
pub fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + idx + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

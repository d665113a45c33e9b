//! Defensive parsing of LLM output
//!
//! LLM responses are untrusted input: they may be wrapped in markdown fences,
//! prefixed with prose, or malformed. The helpers here accept a narrow
//! grammar (first balanced JSON array or object in the text) and leave the
//! fallback decision to the caller.

/// Extract the first JSON array or object embedded in LLM output.
///
/// Strips markdown code fences, then scans for the first balanced `[...]`
/// or `{...}` block. Returns `None` when no balanced block exists.
pub fn extract_json_block(text: &str) -> Option<&str> {
    let trimmed = strip_code_fences(text);

    let start = trimmed.find(['[', '{'])?;
    let open = trimmed.as_bytes()[start];
    let close = if open == b'[' { b']' } else { b'}' };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, byte) in trimmed.bytes().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }

        match byte {
            b'"' => in_string = true,
            b if b == open => depth += 1,
            b if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(&trimmed[start..=offset]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Strip surrounding markdown code fences from a response, if present
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }

    // Drop the opening fence line (may carry a language tag) and the
    // closing fence, keeping whatever sits between.
    let without_open = match trimmed.find('\n') {
        Some(pos) => &trimmed[pos + 1..],
        None => return trimmed,
    };

    match without_open.rfind("```") {
        Some(pos) => without_open[..pos].trim(),
        None => without_open.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_array() {
        let text = r#"[{"text": "Alice", "type": "PERSON"}]"#;
        assert_eq!(extract_json_block(text), Some(text));
    }

    #[test]
    fn test_fenced_json() {
        let text = "```json\n{\"polarity\": \"positive\"}\n```";
        assert_eq!(extract_json_block(text), Some("{\"polarity\": \"positive\"}"));
    }

    #[test]
    fn test_prose_wrapped_array() {
        let text = "Here are the entities:\n[1, 2, 0]\nLet me know if you need more.";
        assert_eq!(extract_json_block(text), Some("[1, 2, 0]"));
    }

    #[test]
    fn test_nested_structures() {
        let text = r#"{"a": {"b": [1, 2]}, "c": "d"}"#;
        assert_eq!(extract_json_block(text), Some(text));
    }

    #[test]
    fn test_brackets_inside_strings_ignored() {
        let text = r#"{"note": "a ] tricky } string"}"#;
        assert_eq!(extract_json_block(text), Some(text));
    }

    #[test]
    fn test_unbalanced_returns_none() {
        assert_eq!(extract_json_block("[1, 2, 3"), None);
        assert_eq!(extract_json_block("no json here"), None);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(extract_json_block(""), None);
    }
}

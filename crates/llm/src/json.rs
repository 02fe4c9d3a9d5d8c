//! JSON extraction from model output
//!
//! Planner prompts ask for a bare JSON object, but models routinely wrap
//! output in code fences or lead with prose. Extraction finds the first
//! balanced object so parse failures stay a planner concern, never a
//! request-terminating one.

/// Extract the first balanced JSON object from model output.
///
/// Handles code fences, leading prose, and trailing commentary. Returns
/// `None` when no balanced object exists.
pub fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match byte {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_object() {
        assert_eq!(extract_json(r#"{"a": 1}"#), Some(r#"{"a": 1}"#));
    }

    #[test]
    fn test_code_fence() {
        let text = "```json\n{\"plan\": [\"x\"]}\n```";
        assert_eq!(extract_json(text), Some("{\"plan\": [\"x\"]}"));
    }

    #[test]
    fn test_leading_prose_and_nesting() {
        let text = r#"Here is the plan: {"a": {"b": 2}, "c": "}"} trailing"#;
        assert_eq!(extract_json(text), Some(r#"{"a": {"b": 2}, "c": "}"}"#));
    }

    #[test]
    fn test_escaped_quote_in_string() {
        let text = r#"{"msg": "she said \"hi\""}"#;
        assert_eq!(extract_json(text), Some(text));
    }

    #[test]
    fn test_no_object() {
        assert_eq!(extract_json("no json here"), None);
        assert_eq!(extract_json("{unbalanced"), None);
    }
}

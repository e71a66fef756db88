//! Tolerant JSON-object extraction from an agent's free-form final text:
//! a bare object, a fenced code block, or prose with an embedded object.

use serde_json::Value;

pub fn extract_json_object(text: &str) -> Option<Value> {
    let trimmed = text.trim();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if value.is_object() {
            return Some(value);
        }
    }

    if let Some(fenced) = extract_fenced_block(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(&fenced) {
            if value.is_object() {
                return Some(value);
            }
        }
    }

    scan_for_object(trimmed)
}

fn extract_fenced_block(text: &str) -> Option<String> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    let after_fence = after_fence.strip_prefix("json").unwrap_or(after_fence);
    let end = after_fence.find("```")?;
    Some(after_fence[..end].trim().to_string())
}

/// Scans for a balanced `{...}` span starting at each `{`, preferring the
/// first span that parses as a JSON object (mirrors repeatedly attempting
/// `raw_decode` at each opening-brace offset).
fn scan_for_object(text: &str) -> Option<Value> {
    let bytes = text.as_bytes();
    for start in 0..bytes.len() {
        if bytes[start] != b'{' {
            continue;
        }
        if let Some(end) = balanced_end(bytes, start) {
            let candidate = &text[start..=end];
            if let Ok(value) = serde_json::from_str::<Value>(candidate) {
                if value.is_object() {
                    return Some(value);
                }
            }
        }
    }
    None
}

fn balanced_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &byte) in bytes.iter().enumerate().skip(start) {
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
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(offset);
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
    fn extracts_bare_object() {
        let value = extract_json_object(r#"{"summary": "ok", "plan": {}}"#).unwrap();
        assert_eq!(value["summary"], "ok");
    }

    #[test]
    fn extracts_fenced_json_block() {
        let text = "Here is the plan:\n```json\n{\"summary\": \"ok\"}\n```\nThanks.";
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["summary"], "ok");
    }

    #[test]
    fn extracts_object_embedded_in_prose() {
        let text = "Sure, the plan is {\"summary\": \"ok\", \"plan\": {\"goal\": \"x\"}} as requested.";
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["plan"]["goal"], "x");
    }

    #[test]
    fn returns_none_when_no_object_present() {
        assert!(extract_json_object("no json here at all").is_none());
    }

    #[test]
    fn handles_braces_inside_string_values() {
        let text = r#"{"summary": "use { and } carefully"}"#;
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["summary"], "use { and } carefully");
    }
}

//! Normalizes the agent's newline-delimited JSON event stream.

use serde_json::Value;

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
}

/// Parses one JSON object per line, skipping blank lines. A line that fails
/// to parse is dropped rather than aborting the whole stream — the stream
/// may be interleaved with non-JSON diagnostic noise in practice.
pub fn parse_events(stdout: &str) -> Vec<Value> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect()
}

/// Concatenates every `text` event's text field, in order.
pub fn extract_text(events: &[Value]) -> String {
    events
        .iter()
        .filter(|event| event.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|event| event.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("")
}

/// Sums `tokens` sub-objects from `step_finish` events.
pub fn extract_usage(events: &[Value]) -> TokenUsage {
    let mut usage = TokenUsage::default();
    for event in events {
        if event.get("type").and_then(Value::as_str) != Some("step_finish") {
            continue;
        }
        let Some(tokens) = event.get("tokens") else {
            continue;
        };
        let prompt = tokens.get("prompt_tokens").and_then(Value::as_i64).unwrap_or(0);
        let completion = tokens.get("completion_tokens").and_then(Value::as_i64).unwrap_or(0);
        let total = tokens
            .get("total_tokens")
            .and_then(Value::as_i64)
            .unwrap_or(prompt + completion);
        usage.prompt_tokens += prompt;
        usage.completion_tokens += completion;
        usage.total_tokens += total;
    }
    usage
}

/// Finds the error message carried by an `error`/`fatal`/`step_error` event
/// or any event with `is_error=true`.
pub fn extract_error_text(events: &[Value]) -> Option<String> {
    events.iter().find_map(|event| {
        let event_type = event.get("type").and_then(Value::as_str).unwrap_or("");
        let is_error_event = matches!(event_type, "error" | "fatal" | "step_error")
            || event.get("is_error").and_then(Value::as_bool).unwrap_or(false);
        if !is_error_event {
            return None;
        }
        event
            .get("message")
            .or_else(|| event.get("text"))
            .and_then(Value::as_str)
            .map(str::to_string)
    })
}

/// Prefers an error extracted from events; falls back to the last non-empty
/// stderr line; finally a generic message.
pub fn extract_error_message(events: &[Value], stderr: &str, exit_code: i32) -> String {
    if let Some(text) = extract_error_text(events) {
        return text;
    }
    if let Some(line) = stderr.lines().rev().find(|line| !line.trim().is_empty()) {
        return line.trim().to_string();
    }
    format!("exited with status {exit_code}")
}

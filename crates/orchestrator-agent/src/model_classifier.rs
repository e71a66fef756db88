//! Model-based fallback for the intent classifier: invokes the same
//! external code-generation agent tool, constrained to a classification
//! prompt and a strict `{intent, confidence, reason}` JSON schema.
//! `ModelIntentClassifier::classify` is a synchronous call by contract,
//! so this runs the subprocess with `std::process::Command` rather than
//! the async driver `adapter.rs` uses for `clarify`/`build`.

use std::process::{Command, Stdio};

use orchestrator_core::intent::{ApprovalIntent, IntentResult, ModelIntentClassifier};
use serde_json::Value;

use crate::events::{extract_text, parse_events};
use crate::json_extract::extract_json_object;

pub struct AgentModelClassifier {
    command: String,
    classify_agent: String,
}

impl AgentModelClassifier {
    pub fn new(command: impl Into<String>, classify_agent: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            classify_agent: classify_agent.into(),
        }
    }
}

impl ModelIntentClassifier for AgentModelClassifier {
    fn classify(&self, text: &str) -> IntentResult {
        let prompt = format!(
            "Classify the user's intent toward a pending code-change approval as exactly one \
             of approve, reject, clarify, unknown. Return strict JSON only: \
             {{\"intent\": ..., \"confidence\": ..., \"reason\": ...}}.\n\nmessage: {text}"
        );

        let output = Command::new(&self.command)
            .args(["run", "--agent", &self.classify_agent, "--format", "json", &prompt])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output();

        let Ok(output) = output else {
            return unknown("failed to invoke classification agent");
        };
        if !output.status.success() {
            return unknown("classification agent exited with non-zero status");
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let events = parse_events(&stdout);
        let text_out = extract_text(&events);

        match extract_json_object(&text_out) {
            Some(payload) => parse_payload(&payload),
            None => unknown("classification agent did not return a JSON object"),
        }
    }
}

fn unknown(reason: &str) -> IntentResult {
    IntentResult {
        intent: ApprovalIntent::Unknown,
        confidence: 0.0,
        reason: reason.to_string(),
        raw: None,
    }
}

fn parse_payload(payload: &Value) -> IntentResult {
    let intent = match payload.get("intent").and_then(Value::as_str) {
        Some("approve") => ApprovalIntent::Approve,
        Some("reject") => ApprovalIntent::Reject,
        Some("clarify") => ApprovalIntent::Clarify,
        _ => ApprovalIntent::Unknown,
    };
    let confidence = payload
        .get("confidence")
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
        .clamp(0.0, 1.0);
    let reason = payload.get("reason").and_then(Value::as_str).unwrap_or_default().to_string();

    IntentResult {
        intent,
        confidence,
        reason,
        raw: Some(payload.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_payload() {
        let payload = serde_json::json!({"intent": "approve", "confidence": 1.4, "reason": "explicit yes"});
        let result = parse_payload(&payload);
        assert_eq!(result.intent, ApprovalIntent::Approve);
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn unrecognized_intent_string_is_unknown() {
        let payload = serde_json::json!({"intent": "maybe", "confidence": 0.5, "reason": "unsure"});
        let result = parse_payload(&payload);
        assert_eq!(result.intent, ApprovalIntent::Unknown);
    }
}

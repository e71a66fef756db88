//! Normalizes an agent's plan JSON payload into a `Plan`, synthesizing
//! defaults so that a plan missing a code/test step still validates.

use orchestrator_core::model::{
    ApprovalGate, Plan, PlanConstraints, PlanMetadata, PlanQuestion, PlanStep, QuestionStatus,
    StepStatus, StepType,
};
use serde_json::Value;

const DEFAULT_TEST_COMMAND: &str = "pytest -q";

pub fn plan_from_payload(payload: &Value, task_id: &str) -> Plan {
    let plan_value = payload.get("plan").unwrap_or(payload);

    let plan_id = plan_value
        .get("plan_id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let goal = plan_value
        .get("goal")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let version = plan_value.get("version").and_then(Value::as_i64).unwrap_or(1);
    let assumptions = plan_value
        .get("assumptions")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let constraints = parse_constraints(plan_value.get("constraints"));
    let questions = parse_questions(plan_value.get("questions"));
    let steps = normalize_steps(plan_value.get("steps"));
    let approval_gate = parse_approval_gate(plan_value.get("approval_gate"));
    let metadata = parse_metadata(plan_value.get("metadata"));

    Plan {
        plan_id,
        task_id: task_id.to_string(),
        version,
        goal,
        assumptions,
        constraints,
        questions,
        steps,
        approval_gate,
        metadata,
    }
}

fn parse_constraints(value: Option<&Value>) -> PlanConstraints {
    let Some(value) = value else {
        return PlanConstraints::default();
    };
    PlanConstraints {
        allowed_paths: string_array(value.get("allowed_paths")),
        forbidden_paths: string_array(value.get("forbidden_paths")),
        max_files_changed: value
            .get("max_files_changed")
            .and_then(Value::as_i64)
            .unwrap_or(20),
    }
}

fn string_array(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

fn parse_questions(value: Option<&Value>) -> Vec<PlanQuestion> {
    let Some(items) = value.and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let id = item.get("id").and_then(Value::as_str)?.to_string();
            let question = item.get("question").and_then(Value::as_str).unwrap_or_default().to_string();
            let required = item.get("required").and_then(Value::as_bool).unwrap_or(true);
            let status = match item.get("status").and_then(Value::as_str) {
                Some("answered") => QuestionStatus::Answered,
                _ => QuestionStatus::Open,
            };
            let answer = item.get("answer").and_then(Value::as_str).map(str::to_string);
            Some(PlanQuestion {
                id,
                question,
                required,
                status,
                answer,
            })
        })
        .collect()
}

/// Auto-inserts `s_code`/`s_test` defaults if a step of that type is
/// missing, and defaults a commandless test step to the conventional
/// test runner invocation.
fn normalize_steps(value: Option<&Value>) -> Vec<PlanStep> {
    let mut steps: Vec<PlanStep> = value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(parse_step).collect())
        .unwrap_or_default();

    for step in steps.iter_mut() {
        if step.step_type == StepType::Test && step.command.as_deref().unwrap_or("").trim().is_empty() {
            step.command = Some(DEFAULT_TEST_COMMAND.to_string());
        }
    }

    if !steps.iter().any(|s| s.step_type == StepType::Code) {
        steps.push(PlanStep {
            id: "s_code".to_string(),
            step_type: StepType::Code,
            title: "Implement the change".to_string(),
            command: None,
            status: StepStatus::Pending,
        });
    }
    if !steps.iter().any(|s| s.step_type == StepType::Test) {
        steps.push(PlanStep {
            id: "s_test".to_string(),
            step_type: StepType::Test,
            title: "Run the test suite".to_string(),
            command: Some(DEFAULT_TEST_COMMAND.to_string()),
            status: StepStatus::Pending,
        });
    }

    steps
}

fn parse_step(value: &Value) -> Option<PlanStep> {
    let id = value.get("id").and_then(Value::as_str)?.to_string();
    let step_type = match value.get("type").and_then(Value::as_str) {
        Some("test") => StepType::Test,
        _ => StepType::Code,
    };
    let title = value.get("title").and_then(Value::as_str).unwrap_or_default().to_string();
    let command = value.get("command").and_then(Value::as_str).map(str::to_string);
    Some(PlanStep {
        id,
        step_type,
        title,
        command,
        status: StepStatus::Pending,
    })
}

fn parse_approval_gate(value: Option<&Value>) -> ApprovalGate {
    let Some(value) = value else {
        return ApprovalGate::default();
    };
    ApprovalGate {
        required_before_run: value
            .get("required_before_run")
            .and_then(Value::as_bool)
            .unwrap_or(true),
        required_before_commit: value
            .get("required_before_commit")
            .and_then(Value::as_bool)
            .unwrap_or(true),
    }
}

fn parse_metadata(value: Option<&Value>) -> PlanMetadata {
    let Some(value) = value else {
        return PlanMetadata::default();
    };
    let default = PlanMetadata::default();
    PlanMetadata {
        created_at: value
            .get("created_at")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(default.created_at),
        created_by: value
            .get("created_by")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(default.created_by),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn synthesizes_missing_test_step() {
        let payload = json!({
            "plan": {
                "plan_id": "p1",
                "goal": "do it",
                "steps": [{"id": "s1", "type": "code", "title": "write code"}],
            }
        });
        let plan = plan_from_payload(&payload, "t1");
        assert!(plan.steps.iter().any(|s| s.step_type == StepType::Test));
        let test_step = plan.steps.iter().find(|s| s.step_type == StepType::Test).unwrap();
        assert_eq!(test_step.command.as_deref(), Some(DEFAULT_TEST_COMMAND));
    }

    #[test]
    fn synthesizes_missing_code_step() {
        let payload = json!({
            "plan": {
                "plan_id": "p1",
                "goal": "do it",
                "steps": [{"id": "s1", "type": "test", "command": "pytest"}],
            }
        });
        let plan = plan_from_payload(&payload, "t1");
        assert!(plan.steps.iter().any(|s| s.step_type == StepType::Code));
    }

    #[test]
    fn defaults_commandless_test_step() {
        let payload = json!({
            "plan": {
                "plan_id": "p1",
                "goal": "do it",
                "steps": [
                    {"id": "s1", "type": "code", "title": "write code"},
                    {"id": "s2", "type": "test", "title": "test it"},
                ],
            }
        });
        let plan = plan_from_payload(&payload, "t1");
        let test_step = plan.steps.iter().find(|s| s.step_type == StepType::Test).unwrap();
        assert_eq!(test_step.command.as_deref(), Some(DEFAULT_TEST_COMMAND));
    }

    #[test]
    fn accepts_a_plan_object_directly_without_top_level_plan_key() {
        let payload = json!({
            "plan_id": "p1",
            "goal": "do it",
            "steps": [],
        });
        let plan = plan_from_payload(&payload, "t1");
        assert_eq!(plan.plan_id, "p1");
    }
}

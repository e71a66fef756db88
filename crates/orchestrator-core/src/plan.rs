//! Plan validation: a pure function from `Plan` to a list of violations.

use std::collections::HashSet;

use crate::error::{OrchestratorError, Result};
use crate::model::{Plan, StepType};

/// Collects every violation in one pass rather than stopping at the first.
pub fn validate_plan(plan: &Plan) -> Vec<String> {
    let mut errors = Vec::new();

    if plan.plan_id.is_empty() {
        errors.push("plan_id is required".to_string());
    }
    if plan.task_id.is_empty() {
        errors.push("task_id is required".to_string());
    }
    if plan.goal.trim().is_empty() {
        errors.push("goal is required".to_string());
    }
    if plan.constraints.allowed_paths.is_empty() {
        errors.push("constraints.allowed_paths must not be empty".to_string());
    }
    if plan.constraints.max_files_changed <= 0 {
        errors.push("constraints.max_files_changed must be > 0".to_string());
    }

    if plan.steps.is_empty() {
        errors.push("at least one plan step is required".to_string());
        return errors;
    }

    let mut seen_step_ids: HashSet<&str> = HashSet::new();
    let mut step_types: HashSet<StepType> = HashSet::new();

    for step in &plan.steps {
        if step.id.is_empty() {
            errors.push("every step must have an id".to_string());
        } else if !seen_step_ids.insert(step.id.as_str()) {
            errors.push(format!("duplicate step id: {}", step.id));
        }

        step_types.insert(step.step_type);
        if step.step_type == StepType::Test
            && step.command.as_deref().unwrap_or("").trim().is_empty()
        {
            errors.push(format!("test step '{}' requires command", step.id));
        }
    }

    if !step_types.contains(&StepType::Code) {
        errors.push("plan requires at least one code step".to_string());
    }
    if !step_types.contains(&StepType::Test) {
        errors.push("plan requires at least one test step".to_string());
    }

    errors
}

pub fn assert_plan_valid(plan: &Plan) -> Result<()> {
    let errors = validate_plan(plan);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(OrchestratorError::plan_validation(&errors))
    }
}

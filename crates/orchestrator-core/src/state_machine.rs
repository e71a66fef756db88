//! Fixed state transition table plus precondition checks, enforced on every
//! attempted transition.

use serde_json::json;

use crate::error::{OrchestratorError, Result};
use crate::model::{Task, TaskState};

fn allowed_targets(from: TaskState) -> &'static [TaskState] {
    use TaskState::*;
    match from {
        New => &[Clarifying, Failed, Cancelled],
        Clarifying => &[WaitApproval, Failed, Cancelled],
        WaitApproval => &[Running, Failed, Cancelled],
        Running => &[Testing, Failed, Cancelled],
        Testing => &[Done, Failed, Cancelled],
        Failed => &[Running, Cancelled],
        Done => &[],
        Cancelled => &[],
    }
}

fn check_preconditions(task: &Task, target: TaskState) -> Result<()> {
    match target {
        TaskState::Running => {
            if !task.approval.is_approved() {
                return Err(OrchestratorError::invalid_transition(
                    "approval is required before RUNNING",
                ));
            }
            let plan = task.plan.as_ref().ok_or_else(|| {
                OrchestratorError::invalid_transition("plan is required before RUNNING")
            })?;
            if !plan.open_required_questions().is_empty() {
                return Err(OrchestratorError::invalid_transition(
                    "open required questions remain before RUNNING",
                ));
            }
            Ok(())
        }
        TaskState::Testing => {
            if task.artifacts.diff_path.is_none() {
                return Err(OrchestratorError::invalid_transition(
                    "artifacts.diff_path is required before TESTING",
                ));
            }
            Ok(())
        }
        TaskState::Done => {
            if task.artifacts.test_report_path.is_none() {
                return Err(OrchestratorError::invalid_transition(
                    "artifacts.test_report_path is required before DONE",
                ));
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Raises `InvalidTransition` on an illegal target or a failed precondition.
pub fn assert_transition(task: &Task, target: TaskState) -> Result<()> {
    if !allowed_targets(task.state).contains(&target) {
        return Err(OrchestratorError::invalid_transition(format!(
            "{:?} -> {:?} is not a legal transition",
            task.state, target
        )));
    }
    check_preconditions(task, target)
}

/// Validates and performs the transition, recording a `state.change` event.
pub fn transition(task: &mut Task, target: TaskState, event_type: &str, message: &str) -> Result<()> {
    assert_transition(task, target)?;
    let from = task.state;
    task.state = target;
    task.record_event(
        event_type,
        message,
        json!({ "from": format!("{from:?}"), "to": format!("{target:?}") }),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Approval, Plan, PlanConstraints, RepoContext, TaskSource};

    fn base_task() -> Task {
        let mut task = Task::new(
            "t1".to_string(),
            "title".to_string(),
            "description".to_string(),
            TaskSource {
                source_type: "feishu".to_string(),
                user_id: "u1".to_string(),
                chat_id: "c1".to_string(),
                message_id: "m1".to_string(),
            },
            RepoContext {
                name: "demo".to_string(),
                base_branch: "main".to_string(),
                worktree_path: None,
                branch: None,
            },
        );
        task.state = TaskState::WaitApproval;
        task
    }

    fn approved_plan(task_id: &str) -> Plan {
        Plan {
            plan_id: "p1".to_string(),
            task_id: task_id.to_string(),
            version: 1,
            goal: "goal".to_string(),
            assumptions: vec![],
            constraints: PlanConstraints {
                allowed_paths: vec!["src/**".to_string()],
                forbidden_paths: vec![],
                max_files_changed: 20,
            },
            questions: vec![],
            steps: vec![],
            approval_gate: Default::default(),
            metadata: Default::default(),
        }
    }

    #[test]
    fn wait_approval_to_running_requires_approval_and_plan() {
        let mut task = base_task();
        let err = transition(&mut task, TaskState::Running, "state.change", "").unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidTransition(_)));

        task.approval = Approval {
            required: true,
            approved_by: Some("u1".to_string()),
            approved_at: Some(crate::model::utc_now_iso()),
        };
        task.plan = Some(approved_plan(&task.task_id));
        transition(&mut task, TaskState::Running, "state.change", "approved").unwrap();
        assert_eq!(task.state, TaskState::Running);
        assert_eq!(task.event_log.last().unwrap().event_type, "state.change");
    }

    #[test]
    fn running_to_testing_requires_diff_path() {
        let mut task = base_task();
        task.state = TaskState::Running;
        let err = transition(&mut task, TaskState::Testing, "state.change", "").unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidTransition(_)));

        task.artifacts.diff_path = Some("/tmp/t1.diff".to_string());
        transition(&mut task, TaskState::Testing, "state.change", "").unwrap();
        assert_eq!(task.state, TaskState::Testing);
    }

    #[test]
    fn testing_to_done_requires_test_report_path() {
        let mut task = base_task();
        task.state = TaskState::Testing;
        let err = transition(&mut task, TaskState::Done, "state.change", "").unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidTransition(_)));

        task.artifacts.test_report_path = Some("/tmp/t1_report.json".to_string());
        transition(&mut task, TaskState::Done, "state.change", "").unwrap();
        assert_eq!(task.state, TaskState::Done);
    }

    #[test]
    fn done_has_no_outgoing_transitions() {
        let mut task = base_task();
        task.state = TaskState::Done;
        let err = transition(&mut task, TaskState::Running, "state.change", "").unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidTransition(_)));
    }

    #[test]
    fn failed_can_retry_into_running() {
        let mut task = base_task();
        task.state = TaskState::Failed;
        task.approval = Approval {
            required: true,
            approved_by: Some("u1".to_string()),
            approved_at: Some(crate::model::utc_now_iso()),
        };
        task.plan = Some(approved_plan(&task.task_id));
        transition(&mut task, TaskState::Running, "state.change", "retry").unwrap();
        assert_eq!(task.state, TaskState::Running);
    }
}

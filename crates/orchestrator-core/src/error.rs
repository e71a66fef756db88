//! Error taxonomy for the orchestrator core.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("plan validation failed: {0}")]
    PlanValidation(String),

    #[error("policy violation: {0}")]
    PolicyViolation(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("worktree error: {0}")]
    WorktreeError(String),

    #[error("worktree operation unimplemented: {0}")]
    Unimplemented(String),

    #[error("agent invocation failed: {0}")]
    AgentInvocation(String),

    #[error("orchestrator error: {0}")]
    Orchestrator(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

impl OrchestratorError {
    pub fn invalid_transition(message: impl Into<String>) -> Self {
        Self::InvalidTransition(message.into())
    }

    pub fn plan_validation(errors: &[String]) -> Self {
        Self::PlanValidation(errors.join("; "))
    }

    pub fn policy_violation(message: impl Into<String>) -> Self {
        Self::PolicyViolation(message.into())
    }

    pub fn task_not_found(task_id: impl Into<String>) -> Self {
        Self::TaskNotFound(task_id.into())
    }

    pub fn worktree_error(message: impl Into<String>) -> Self {
        Self::WorktreeError(message.into())
    }

    pub fn agent_invocation(message: impl Into<String>) -> Self {
        Self::AgentInvocation(message.into())
    }

    pub fn orchestrator(message: impl Into<String>) -> Self {
        Self::Orchestrator(message.into())
    }
}

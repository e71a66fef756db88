//! Task, Plan and Event data model.
//!
//! Wire shape mirrors the task JSON files under `{tasks_root}/{task_id}.json`:
//! a `timestamps` sub-object holds `created_at`/`updated_at`, and `plan` nests
//! `approval_gate`/`metadata` sub-objects. Field names and nesting are fixed
//! by that on-disk contract, not chosen for Rust ergonomics.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Current instant as an ISO-8601 string with a trailing `Z`, second precision.
pub fn utc_now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    #[serde(rename = "NEW")]
    New,
    #[serde(rename = "CLARIFYING")]
    Clarifying,
    #[serde(rename = "WAIT_APPROVAL")]
    WaitApproval,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "TESTING")]
    Testing,
    #[serde(rename = "DONE")]
    Done,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "CANCELLED")]
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Done | TaskState::Cancelled)
    }
}

impl Default for TaskState {
    fn default() -> Self {
        TaskState::New
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionStatus {
    Open,
    Answered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    Code,
    Test,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl Default for StepStatus {
    fn default() -> Self {
        StepStatus::Pending
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanQuestion {
    pub id: String,
    pub question: String,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default = "default_question_status")]
    pub status: QuestionStatus,
    #[serde(default)]
    pub answer: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_question_status() -> QuestionStatus {
    QuestionStatus::Open
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    #[serde(rename = "type")]
    pub step_type: StepType,
    pub title: String,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub status: StepStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanConstraints {
    #[serde(default)]
    pub allowed_paths: Vec<String>,
    #[serde(default)]
    pub forbidden_paths: Vec<String>,
    #[serde(default = "default_max_files_changed")]
    pub max_files_changed: i64,
}

fn default_max_files_changed() -> i64 {
    20
}

impl Default for PlanConstraints {
    fn default() -> Self {
        Self {
            allowed_paths: Vec::new(),
            forbidden_paths: Vec::new(),
            max_files_changed: default_max_files_changed(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalGate {
    pub required_before_run: bool,
    pub required_before_commit: bool,
}

impl Default for ApprovalGate {
    fn default() -> Self {
        Self {
            required_before_run: true,
            required_before_commit: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanMetadata {
    pub created_at: String,
    pub created_by: String,
}

impl Default for PlanMetadata {
    fn default() -> Self {
        Self {
            created_at: utc_now_iso(),
            created_by: "orchestrator".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: String,
    pub task_id: String,
    #[serde(default = "default_plan_version")]
    pub version: i64,
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub assumptions: Vec<String>,
    #[serde(default)]
    pub constraints: PlanConstraints,
    #[serde(default)]
    pub questions: Vec<PlanQuestion>,
    #[serde(default)]
    pub steps: Vec<PlanStep>,
    #[serde(default)]
    pub approval_gate: ApprovalGate,
    #[serde(default)]
    pub metadata: PlanMetadata,
}

fn default_plan_version() -> i64 {
    1
}

impl Plan {
    pub fn open_required_questions(&self) -> Vec<&PlanQuestion> {
        self.questions
            .iter()
            .filter(|q| q.required && q.status == QuestionStatus::Open)
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approval {
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default)]
    pub approved_by: Option<String>,
    #[serde(default)]
    pub approved_at: Option<String>,
}

impl Default for Approval {
    fn default() -> Self {
        Self {
            required: true,
            approved_by: None,
            approved_at: None,
        }
    }
}

impl Approval {
    pub fn is_approved(&self) -> bool {
        if !self.required {
            return true;
        }
        self.approved_by.is_some() && self.approved_at.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionInfo {
    #[serde(default)]
    pub attempt: i64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i64,
    #[serde(default)]
    pub last_error: Option<String>,
}

fn default_max_attempts() -> i64 {
    3
}

impl Default for ExecutionInfo {
    fn default() -> Self {
        Self {
            attempt: 0,
            max_attempts: default_max_attempts(),
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskArtifacts {
    #[serde(default)]
    pub clarify_summary: Option<String>,
    #[serde(default)]
    pub diff_path: Option<String>,
    #[serde(default)]
    pub test_report_path: Option<String>,
    #[serde(default)]
    pub pr_url: Option<String>,
    #[serde(default)]
    pub changed_files: Vec<String>,
    #[serde(default)]
    pub test_results: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSource {
    #[serde(rename = "type")]
    pub source_type: String,
    pub user_id: String,
    pub chat_id: String,
    pub message_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoContext {
    pub name: String,
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
    #[serde(default)]
    pub worktree_path: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
}

fn default_base_branch() -> String {
    "main".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    pub timestamp: String,
    pub event_type: String,
    pub message: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub source: TaskSource,
    pub repo: RepoContext,
    #[serde(default)]
    pub state: TaskState,
    #[serde(default)]
    pub approval: Approval,
    #[serde(default)]
    pub plan: Option<Plan>,
    #[serde(default)]
    pub execution: ExecutionInfo,
    #[serde(default)]
    pub artifacts: TaskArtifacts,
    #[serde(default)]
    pub event_log: Vec<TaskEvent>,
    #[serde(default)]
    pub timestamps: TaskTimestamps,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTimestamps {
    #[serde(default = "utc_now_iso")]
    pub created_at: String,
    #[serde(default = "utc_now_iso")]
    pub updated_at: String,
}

impl Default for TaskTimestamps {
    fn default() -> Self {
        let now = utc_now_iso();
        Self {
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

impl Task {
    pub fn new(task_id: String, title: String, description: String, source: TaskSource, repo: RepoContext) -> Self {
        let now = utc_now_iso();
        Self {
            task_id,
            title,
            description,
            source,
            repo,
            state: TaskState::New,
            approval: Approval::default(),
            plan: None,
            execution: ExecutionInfo::default(),
            artifacts: TaskArtifacts::default(),
            event_log: Vec::new(),
            timestamps: TaskTimestamps {
                created_at: now.clone(),
                updated_at: now,
            },
        }
    }

    /// Append an event and refresh `updated_at`. The event log is append-only.
    pub fn record_event(&mut self, event_type: impl Into<String>, message: impl Into<String>, payload: serde_json::Value) {
        self.event_log.push(TaskEvent {
            timestamp: utc_now_iso(),
            event_type: event_type.into(),
            message: message.into(),
            payload,
        });
        self.timestamps.updated_at = utc_now_iso();
    }
}

// The wire format nests `created_at`/`updated_at` under a `timestamps` object
// rather than on `Task` directly; `TaskTimestamps` reproduces that shape.

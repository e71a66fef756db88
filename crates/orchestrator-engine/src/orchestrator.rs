//! Composition layer: ingest -> clarify -> approve -> run -> test. Drives
//! state transitions on top of `orchestrator-core` and the subprocess-backed
//! agent in `orchestrator-agent`, and correlates incoming chat messages to
//! pending tasks.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use orchestrator_agent::AgentAdapter;
use orchestrator_core::error::{OrchestratorError, Result};
use orchestrator_core::intent::{ApprovalIntent, HybridIntentClassifier, ModelIntentClassifier};
use orchestrator_core::model::{utc_now_iso, PlanStep, RepoContext, StepType, Task, TaskSource, TaskState};
use orchestrator_core::{plan, policy, state_machine};
use orchestrator_core::store::TaskStore;
use orchestrator_core::worktree::WorktreeManager;
use serde_json::{json, Value};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::task_lock::TaskLocks;

/// A parsed, channel-agnostic chat message. The webhook layer translates its
/// own event shape (e.g. Feishu's `event.message`/`event.sender`) into this
/// before handing it to the orchestrator.
#[derive(Debug, Clone)]
pub struct Requirement {
    pub source_type: String,
    pub user_id: String,
    pub chat_id: String,
    pub message_id: String,
    pub text: String,
}

/// Static facts about the target repository a task is filed against.
#[derive(Debug, Clone)]
pub struct RepoConfig {
    pub name: String,
    pub base_branch: String,
    pub repo_path: PathBuf,
    pub worktrees_root: PathBuf,
    pub branch_prefix: String,
}

/// Toggles for how much of clarify/provision/run the webhook entry point
/// drives automatically versus leaving for an explicit follow-up call.
#[derive(Debug, Clone, Copy)]
pub struct DispatchPolicy {
    pub auto_clarify: bool,
    pub auto_provision_worktree: bool,
    pub auto_run: bool,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            auto_clarify: true,
            auto_provision_worktree: false,
            auto_run: false,
        }
    }
}

/// Stand-in for deployments with no model-based classifier configured. The
/// hybrid classifier only dials its model layer when the rule layer returns
/// `unknown` *and* a model is present; passing `None` to
/// `HybridIntentClassifier::new` skips it entirely, so this type is never
/// actually invoked — it exists only to give that `None` a concrete type.
pub struct NoopModelClassifier;

impl ModelIntentClassifier for NoopModelClassifier {
    fn classify(&self, _text: &str) -> orchestrator_core::intent::IntentResult {
        unreachable!("NoopModelClassifier is never dialed: pass None to HybridIntentClassifier")
    }
}

pub fn generate_task_id() -> String {
    format!("{}-{}", Utc::now().format("%Y%m%dT%H%M%S%6f"), Uuid::new_v4().simple())
}

/// The composition layer: ingest, clarify, approve, run, test. Generic over
/// the model-based intent classifier so tests can inject a fake; the agent
/// adapter is held as a trait object since callers rarely need more than
/// one concrete implementation live at a time.
pub struct Orchestrator<M: ModelIntentClassifier> {
    store: TaskStore,
    agent: Arc<dyn AgentAdapter>,
    intent: HybridIntentClassifier<M>,
    reports_root: PathBuf,
    locks: TaskLocks,
}

impl<M: ModelIntentClassifier> Orchestrator<M> {
    pub fn new(store: TaskStore, agent: Arc<dyn AgentAdapter>, intent: HybridIntentClassifier<M>, reports_root: impl Into<PathBuf>) -> Self {
        Self {
            store,
            agent,
            intent,
            reports_root: reports_root.into(),
            locks: TaskLocks::new(),
        }
    }

    #[instrument(skip(self, description))]
    pub async fn create_task(&self, title: String, description: String, source: TaskSource, repo: RepoContext) -> Result<Task> {
        let task_id = generate_task_id();
        let mut task = Task::new(task_id, title, description, source, repo);
        task.record_event("task.created", "task created", json!({}));
        self.store.save(&task)?;
        info!(task_id = %task.task_id, "task created");
        Ok(task)
    }

    #[instrument(skip(self))]
    pub async fn clarify_task(&self, task_id: &str) -> Result<Task> {
        let _guard = self.locks.acquire(task_id).await;
        let mut task = self.store.get(task_id)?;
        state_machine::transition(&mut task, TaskState::Clarifying, "state.change", "clarifying")?;
        self.store.save(&task)?;

        match self.run_clarify(&task).await {
            Ok((summary, normalized_plan)) => {
                task.plan = Some(normalized_plan);
                task.artifacts.clarify_summary = Some(summary.clone());
                task.record_event("clarify.completed", "clarify phase completed", json!({ "summary": summary }));
                state_machine::transition(&mut task, TaskState::WaitApproval, "state.change", "awaiting approval")?;
                task.record_event("approval.pending", "awaiting human approval", json!({}));
                self.store.save(&task)?;
                Ok(task)
            }
            Err(err) => {
                task.execution.last_error = Some(err.to_string());
                task.record_event("run.failed", "clarify failed", json!({ "error": err.to_string() }));
                let _ = state_machine::transition(&mut task, TaskState::Failed, "state.change", "clarify failed");
                self.store.save(&task)?;
                warn!(task_id = %task.task_id, error = %err, "clarify failed");
                Err(err)
            }
        }
    }

    async fn run_clarify(&self, task: &Task) -> Result<(String, orchestrator_core::model::Plan)> {
        let result = self.agent.clarify(task).await?;
        plan::assert_plan_valid(&result.plan)?;
        Ok((result.summary, result.plan))
    }

    #[instrument(skip(self, approved_by))]
    pub async fn approve_task(&self, task_id: &str, approved_by: &str) -> Result<Task> {
        let _guard = self.locks.acquire(task_id).await;
        let mut task = self.store.get(task_id)?;
        task.approval.approved_by = Some(approved_by.to_string());
        task.approval.approved_at = Some(utc_now_iso());
        task.record_event(
            "approval.granted",
            format!("approved by {approved_by}"),
            json!({ "approved_by": approved_by }),
        );
        self.store.save(&task)?;
        info!(task_id = %task.task_id, approved_by, "approval granted");
        Ok(task)
    }

    /// Classifies `text` and acts: APPROVE grants approval, REJECT cancels
    /// the task, CLARIFY/UNKNOWN record `approval.pending` and leave state
    /// unchanged. A task not currently `WAIT_APPROVAL` records
    /// `approval.intent.ignored` and is otherwise untouched.
    #[instrument(skip(self, text))]
    pub async fn handle_approval_message(&self, task_id: &str, user_id: &str, text: &str) -> Result<Task> {
        let _guard = self.locks.acquire(task_id).await;
        let mut task = self.store.get(task_id)?;

        if task.state != TaskState::WaitApproval {
            task.record_event(
                "approval.intent.ignored",
                "task is not awaiting approval",
                json!({ "state": format!("{:?}", task.state), "text": text }),
            );
            self.store.save(&task)?;
            return Ok(task);
        }

        let result = self.intent.classify(text);
        task.record_event(
            "approval.intent.detected",
            format!("classified as {:?}", result.intent),
            json!({ "intent": format!("{:?}", result.intent), "confidence": result.confidence, "reason": result.reason }),
        );

        match result.intent {
            ApprovalIntent::Approve => {
                task.approval.approved_by = Some(user_id.to_string());
                task.approval.approved_at = Some(utc_now_iso());
                task.record_event(
                    "approval.granted",
                    "approval granted via chat message",
                    json!({ "approved_by": user_id }),
                );
            }
            ApprovalIntent::Reject => {
                state_machine::transition(&mut task, TaskState::Cancelled, "state.change", "rejected via chat message")?;
            }
            ApprovalIntent::Clarify | ApprovalIntent::Unknown => {
                task.record_event(
                    "approval.pending",
                    "could not determine approval intent from message",
                    json!({}),
                );
            }
        }

        self.store.save(&task)?;
        Ok(task)
    }

    #[instrument(skip(self))]
    pub async fn provision_worktree(
        &self,
        task_id: &str,
        repo_path: impl AsRef<Path>,
        worktrees_root: impl AsRef<Path>,
        branch_prefix: &str,
    ) -> Result<Task> {
        let _guard = self.locks.acquire(task_id).await;
        let mut task = self.store.get(task_id)?;
        let manager = WorktreeManager::new(repo_path.as_ref().to_path_buf(), Some(worktrees_root.as_ref().to_path_buf()));

        match manager.create(task_id, &task.repo.base_branch, branch_prefix) {
            Ok(handle) => {
                task.repo.branch = Some(handle.branch.clone());
                task.repo.worktree_path = Some(handle.path.to_string_lossy().into_owned());
                task.record_event(
                    "worktree.created",
                    "worktree created",
                    json!({ "branch": handle.branch, "path": handle.path.to_string_lossy() }),
                );
                self.store.save(&task)?;
                Ok(task)
            }
            Err(err) => {
                task.record_event("worktree.failed", "worktree creation failed", json!({ "error": err.to_string() }));
                self.store.save(&task)?;
                Err(err)
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn cleanup_worktree(
        &self,
        task_id: &str,
        repo_path: impl AsRef<Path>,
        worktrees_root: impl AsRef<Path>,
        force: bool,
    ) -> Result<Task> {
        let _guard = self.locks.acquire(task_id).await;
        let mut task = self.store.get(task_id)?;
        let manager = WorktreeManager::new(repo_path.as_ref().to_path_buf(), Some(worktrees_root.as_ref().to_path_buf()));

        manager.remove(task_id, force)?;
        task.repo.branch = None;
        task.repo.worktree_path = None;
        task.record_event("worktree.removed", "worktree removed", json!({}));
        self.store.save(&task)?;
        Ok(task)
    }

    /// Runs the approved plan: build, enforce file policy, run each test
    /// step in order halting on the first non-zero exit, and finalize
    /// `DONE`/`FAILED`. A clean test failure transitions to `FAILED` and
    /// returns the task; a genuinely throwing step (build, policy, or a
    /// precondition violation) forces `FAILED` and re-raises instead.
    #[instrument(skip(self))]
    pub async fn run_task(&self, task_id: &str) -> Result<Task> {
        let _guard = self.locks.acquire(task_id).await;
        let mut task = self.store.get(task_id)?;

        if task.execution.attempt >= task.execution.max_attempts {
            return Err(OrchestratorError::orchestrator(format!(
                "task {} has exhausted its {} retry attempts",
                task_id, task.execution.max_attempts
            )));
        }
        task.execution.attempt += 1;
        task.record_event("run.started", "run started", json!({ "attempt": task.execution.attempt }));

        match self.try_run(&mut task).await {
            Ok(()) => {
                self.store.save(&task)?;
                Ok(task)
            }
            Err(err) => {
                task.execution.last_error = Some(err.to_string());
                task.record_event("run.failed", "run failed", json!({ "error": err.to_string() }));
                if task.state != TaskState::Cancelled {
                    let _ = state_machine::transition(&mut task, TaskState::Failed, "state.change", "run failed");
                }
                self.store.save(&task)?;
                Err(err)
            }
        }
    }

    /// Everything that can fail between `WAIT_APPROVAL`/`FAILED` and a
    /// finished build+test cycle, run under one umbrella so `run_task` has a
    /// single place to force `FAILED` on any throwing error (precondition
    /// violation, build failure, policy violation). A clean test failure is
    /// not an error here: `execute_run` handles it itself and returns `Ok`.
    async fn try_run(&self, task: &mut Task) -> Result<()> {
        state_machine::transition(task, TaskState::Running, "state.change", "running")?;
        self.store.save(task)?;
        self.execute_run(task).await
    }

    async fn execute_run(&self, task: &mut Task) -> Result<()> {
        let build = self.agent.build(task).await?;

        let constraints = task
            .plan
            .as_ref()
            .map(|p| p.constraints.clone())
            .ok_or_else(|| OrchestratorError::orchestrator("no plan attached to task"))?;
        policy::enforce_file_policy(&build.changed_files, &constraints)?;

        task.artifacts.changed_files = build.changed_files.clone();
        task.artifacts.diff_path = Some(build.diff_path.clone());
        task.record_event(
            "build.completed",
            "build completed",
            json!({ "changed_files": build.changed_files }),
        );

        state_machine::transition(task, TaskState::Testing, "state.change", "testing")?;
        self.store.save(task)?;

        let test_steps: Vec<PlanStep> = task
            .plan
            .as_ref()
            .map(|p| p.steps.iter().filter(|s| s.step_type == StepType::Test).cloned().collect())
            .unwrap_or_default();

        let mut results: Vec<Value> = Vec::with_capacity(test_steps.len());
        let mut all_passed = true;
        for step in &test_steps {
            let command = step.command.clone().unwrap_or_default();
            let test_result = self.agent.run_test(task, &command).await?;
            let passed = test_result.exit_code == 0;
            results.push(json!({
                "step_id": step.id,
                "command": test_result.command,
                "exit_code": test_result.exit_code,
                "log_path": test_result.log_path,
                "duration_ms": test_result.duration_ms,
                "passed": passed,
            }));
            if !passed {
                all_passed = false;
                break;
            }
        }
        task.artifacts.test_results = results.clone();

        let report_path = self.write_test_report(task, &results, all_passed)?;
        task.artifacts.test_report_path = Some(report_path);

        if all_passed {
            state_machine::transition(task, TaskState::Done, "state.change", "done")?;
        } else {
            task.execution.last_error = Some("One or more tests failed".to_string());
            task.record_event("run.failed", "run failed", json!({ "error": "One or more tests failed" }));
            state_machine::transition(task, TaskState::Failed, "state.change", "run failed")?;
        }
        Ok(())
    }

    fn write_test_report(&self, task: &Task, results: &[Value], passed: bool) -> Result<String> {
        std::fs::create_dir_all(&self.reports_root)?;
        let path = self.reports_root.join(format!("{}_test_report.json", task.task_id));
        let payload = json!({
            "task_id": task.task_id,
            "generated_at": utc_now_iso(),
            "results": results,
            "passed": passed,
        });
        std::fs::write(&path, serde_json::to_vec_pretty(&payload)?)?;
        Ok(path.to_string_lossy().into_owned())
    }

    /// Finds the most recently updated `WAIT_APPROVAL` task whose
    /// `source.chat_id`/`source.user_id` both match `requirement`, ties
    /// broken by `updated_at` descending.
    fn find_latest_waiting_approval_task(&self, requirement: &Requirement) -> Result<Option<Task>> {
        let mut candidates: Vec<Task> = self
            .store
            .list()?
            .into_iter()
            .filter(|task| {
                task.state == TaskState::WaitApproval
                    && task.source.chat_id == requirement.chat_id
                    && task.source.user_id == requirement.user_id
            })
            .collect();
        candidates.sort_by(|a, b| b.timestamps.updated_at.cmp(&a.timestamps.updated_at));
        Ok(candidates.into_iter().next())
    }

    /// The unified webhook entry point: correlates an incoming chat message
    /// to a pending approval, or creates a new task. Returns the task and a
    /// human-facing reply summarizing what happened.
    #[instrument(skip(self, requirement, repo))]
    pub async fn process_feishu_message(
        &self,
        requirement: &Requirement,
        repo: &RepoConfig,
        policy: &DispatchPolicy,
    ) -> Result<(Task, String)> {
        if let Some(pending) = self.find_latest_waiting_approval_task(requirement)? {
            let mut task = self.handle_approval_message(&pending.task_id, &requirement.user_id, &requirement.text).await?;

            if task.state == TaskState::WaitApproval && task.approval.is_approved() {
                if policy.auto_provision_worktree {
                    task = self
                        .provision_worktree(&task.task_id, &repo.repo_path, &repo.worktrees_root, &repo.branch_prefix)
                        .await
                        .unwrap_or(task);
                }
                if policy.auto_run {
                    task = self.run_task(&task.task_id).await.unwrap_or(task);
                }
            }

            let reply = reply_for(&task);
            return Ok((task, reply));
        }

        let source = TaskSource {
            source_type: requirement.source_type.clone(),
            user_id: requirement.user_id.clone(),
            chat_id: requirement.chat_id.clone(),
            message_id: requirement.message_id.clone(),
        };
        let repo_context = RepoContext {
            name: repo.name.clone(),
            base_branch: repo.base_branch.clone(),
            worktree_path: None,
            branch: None,
        };
        let title = truncate_title(&requirement.text);
        let mut task = self
            .create_task(title, requirement.text.clone(), source, repo_context)
            .await?;

        if policy.auto_clarify {
            task = self.clarify_task(&task.task_id).await.unwrap_or(task);
        }

        let reply = reply_for(&task);
        Ok((task, reply))
    }
}

fn truncate_title(text: &str) -> String {
    const MAX_TITLE_LEN: usize = 80;
    let trimmed = text.trim();
    if trimmed.chars().count() <= MAX_TITLE_LEN {
        trimmed.to_string()
    } else {
        trimmed.chars().take(MAX_TITLE_LEN).collect::<String>() + "..."
    }
}

fn reply_for(task: &Task) -> String {
    match task.state {
        TaskState::WaitApproval => match &task.artifacts.clarify_summary {
            Some(summary) => format!("任务已创建，等待审批：{summary}"),
            None => "任务已创建，等待审批。请回复 同意/取消。".to_string(),
        },
        TaskState::Running | TaskState::Testing => "任务已批准，正在执行。".to_string(),
        TaskState::Done => "任务已完成，测试全部通过。".to_string(),
        TaskState::Failed => format!(
            "任务执行失败：{}",
            task.execution.last_error.clone().unwrap_or_default()
        ),
        TaskState::Cancelled => "任务已取消。".to_string(),
        TaskState::Clarifying | TaskState::New => "正在处理您的请求。".to_string(),
    }
}

//! The single boundary between the orchestrator and the external
//! code-generation agent. `AgentAdapter` is an explicit capability interface
//! in place of a duck-typed client; tests inject a fake.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use orchestrator_core::error::{OrchestratorError, Result};
use orchestrator_core::model::{Plan, Task};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::events::{extract_error_message, extract_text, extract_usage, parse_events, TokenUsage};
use crate::git::{collect_changed_files, write_diff_artifact};
use crate::json_extract::extract_json_object;
use crate::plan_normalize::plan_from_payload;

#[derive(Debug, Clone)]
pub struct ClarifyResult {
    pub summary: String,
    pub plan: Plan,
    pub usage: TokenUsage,
    pub raw_text: String,
}

#[derive(Debug, Clone)]
pub struct BuildResult {
    pub changed_files: Vec<String>,
    pub diff_path: String,
    pub output_text: String,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone)]
pub struct TestResult {
    pub command: String,
    pub exit_code: i32,
    pub log_path: String,
    pub duration_ms: u64,
}

/// `clarify`, `build`, `run_test` — both CLI and SDK-bridge invocation modes
/// must produce the same normalized result. Switching modes is config, not
/// a contract change.
#[async_trait]
pub trait AgentAdapter: Send + Sync {
    async fn clarify(&self, task: &Task) -> Result<ClarifyResult>;
    async fn build(&self, task: &Task) -> Result<BuildResult>;
    async fn run_test(&self, task: &Task, command: &str) -> Result<TestResult>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Driver {
    Cli,
    Sdk,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub artifact_root: PathBuf,
    pub driver: Driver,
    pub command: String,
    pub use_docker: bool,
    pub docker_image: Option<String>,
    pub timeout: Duration,
    pub plan_agent: String,
    pub build_agent: String,
    pub node_command: String,
    pub sdk_script: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            artifact_root: PathBuf::from("artifacts"),
            driver: Driver::Cli,
            command: "opencode".to_string(),
            use_docker: false,
            docker_image: None,
            timeout: Duration::from_secs(900),
            plan_agent: "plan".to_string(),
            build_agent: "build".to_string(),
            node_command: "node".to_string(),
            sdk_script: PathBuf::from("sdk_bridge.js"),
        }
    }
}

struct AgentRunOutcome {
    text: String,
    events: Vec<Value>,
    usage: TokenUsage,
    error: Option<String>,
    exit_code: i32,
    command: String,
    stderr: String,
}

pub struct OpenCodeAgentClient {
    config: AgentConfig,
}

impl OpenCodeAgentClient {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    fn workspace_for(&self, task: &Task) -> PathBuf {
        task.repo
            .worktree_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    fn clarify_prompt(&self, task: &Task) -> String {
        format!(
            "task_id={task_id}\nbase_branch={base_branch}\n\n{description}\n\nReturn strict JSON only: {{\"summary\": ..., \"plan\": {{...}}}}.",
            task_id = task.task_id,
            base_branch = task.repo.base_branch,
            description = task.description,
        )
    }

    fn build_prompt(&self, task: &Task, plan: &Plan) -> String {
        format!(
            "task_id={task_id}\n\n{description}\n\napproved plan goal: {goal}",
            task_id = task.task_id,
            description = task.description,
            goal = plan.goal,
        )
    }

    async fn run_agent(&self, agent: &str, prompt: &str, workspace: &PathBuf) -> Result<AgentRunOutcome> {
        match self.config.driver {
            Driver::Cli => self.run_agent_cli(agent, prompt, workspace).await,
            Driver::Sdk => self.run_agent_sdk(agent, prompt, workspace).await,
        }
    }

    async fn run_agent_cli(&self, agent: &str, prompt: &str, workspace: &PathBuf) -> Result<AgentRunOutcome> {
        let mut command_line: Vec<String> = Vec::new();
        if self.config.use_docker {
            let image = self
                .config
                .docker_image
                .clone()
                .unwrap_or_else(|| "opencode:latest".to_string());
            command_line.extend([
                "docker".to_string(),
                "run".to_string(),
                "--rm".to_string(),
                "-v".to_string(),
                format!("{}:/workspace", workspace.display()),
                "-w".to_string(),
                "/workspace".to_string(),
                image,
            ]);
        }
        command_line.push(self.config.command.clone());
        command_line.extend([
            "run".to_string(),
            "--agent".to_string(),
            agent.to_string(),
            "--format".to_string(),
            "json".to_string(),
            prompt.to_string(),
        ]);

        let program = command_line[0].clone();
        let args = &command_line[1..];

        let mut cmd = Command::new(&program);
        cmd.args(args);
        if !self.config.use_docker {
            cmd.current_dir(workspace);
        }
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        let command_str = command_line.join(" ");
        let output = tokio::time::timeout(self.config.timeout, cmd.output())
            .await
            .map_err(|_| OrchestratorError::agent_invocation("agent invocation timed out"))?
            .map_err(|err| OrchestratorError::agent_invocation(format!("failed to spawn agent: {err}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let events = parse_events(&stdout);
        let text = extract_text(&events);
        let usage = extract_usage(&events);
        let exit_code = output.status.code().unwrap_or(-1);
        let error = if exit_code != 0 {
            Some(extract_error_message(&events, &stderr, exit_code))
        } else {
            None
        };

        Ok(AgentRunOutcome {
            text,
            events,
            usage,
            error,
            exit_code,
            command: command_str,
            stderr,
        })
    }

    async fn run_agent_sdk(&self, agent: &str, prompt: &str, workspace: &PathBuf) -> Result<AgentRunOutcome> {
        #[derive(Serialize)]
        struct SdkInvocation<'a> {
            agent: &'a str,
            prompt: &'a str,
            workspace: String,
        }

        let invocation = SdkInvocation {
            agent,
            prompt,
            workspace: workspace.to_string_lossy().into_owned(),
        };
        let payload = serde_json::to_string(&invocation)?;

        let mut child = Command::new(&self.config.node_command)
            .arg(&self.config.sdk_script)
            .current_dir(workspace)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| OrchestratorError::agent_invocation(format!("failed to spawn sdk bridge: {err}")))?;

        if let Some(stdin) = child.stdin.as_mut() {
            stdin.write_all(payload.as_bytes()).await?;
        }

        let command_str = format!("{} {}", self.config.node_command, self.config.sdk_script.display());
        let output = tokio::time::timeout(self.config.timeout, child.wait_with_output())
            .await
            .map_err(|_| OrchestratorError::agent_invocation("sdk bridge invocation timed out"))?
            .map_err(|err| OrchestratorError::agent_invocation(format!("sdk bridge failed: {err}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let exit_code = output.status.code().unwrap_or(-1);

        let response: Value = serde_json::from_str(stdout.trim())
            .map_err(|err| OrchestratorError::agent_invocation(format!("sdk bridge returned invalid JSON: {err}")))?;

        let ok = response.get("ok").and_then(Value::as_bool).unwrap_or(false);
        let text = response.get("text").and_then(Value::as_str).unwrap_or_default().to_string();
        let events = response
            .get("parts")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let usage = response
            .get("usage")
            .map(|value| TokenUsage {
                prompt_tokens: value.get("prompt_tokens").and_then(Value::as_i64).unwrap_or(0),
                completion_tokens: value.get("completion_tokens").and_then(Value::as_i64).unwrap_or(0),
                total_tokens: value.get("total_tokens").and_then(Value::as_i64).unwrap_or(0),
            })
            .unwrap_or_default();
        let error = if ok {
            None
        } else {
            Some(
                response
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("sdk bridge reported failure")
                    .to_string(),
            )
        };

        Ok(AgentRunOutcome {
            text,
            events,
            usage,
            error,
            exit_code,
            command: command_str,
            stderr,
        })
    }

    async fn write_agent_log(&self, task_id: &str, agent: &str, workspace: &PathBuf, outcome: &AgentRunOutcome) -> Result<()> {
        tokio::fs::create_dir_all(&self.config.artifact_root).await?;
        let path = self.config.artifact_root.join(format!("{task_id}_{agent}.json"));
        let payload = json!({
            "command": outcome.command,
            "workspace": workspace.to_string_lossy(),
            "exit_code": outcome.exit_code,
            "text": outcome.text,
            "events": outcome.events,
            "error": outcome.error,
            "usage": {
                "prompt_tokens": outcome.usage.prompt_tokens,
                "completion_tokens": outcome.usage.completion_tokens,
                "total_tokens": outcome.usage.total_tokens,
            },
            "stderr": outcome.stderr,
        });
        tokio::fs::write(&path, serde_json::to_vec_pretty(&payload)?).await?;
        Ok(())
    }
}

#[async_trait]
impl AgentAdapter for OpenCodeAgentClient {
    async fn clarify(&self, task: &Task) -> Result<ClarifyResult> {
        let workspace = self.workspace_for(task);
        let prompt = self.clarify_prompt(task);
        let outcome = self.run_agent(&self.config.plan_agent, &prompt, &workspace).await?;
        self.write_agent_log(&task.task_id, &self.config.plan_agent, &workspace, &outcome).await?;

        if let Some(error) = &outcome.error {
            return Err(OrchestratorError::agent_invocation(error.clone()));
        }

        let payload = extract_json_object(&outcome.text)
            .or_else(|| {
                outcome
                    .events
                    .iter()
                    .filter_map(|event| event.get("text").and_then(Value::as_str))
                    .find_map(extract_json_object)
            })
            .ok_or_else(|| OrchestratorError::agent_invocation("agent did not return a JSON plan object"))?;

        let summary = payload
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let plan = plan_from_payload(&payload, &task.task_id);

        Ok(ClarifyResult {
            summary,
            plan,
            usage: outcome.usage,
            raw_text: outcome.text,
        })
    }

    async fn build(&self, task: &Task) -> Result<BuildResult> {
        let workspace = self.workspace_for(task);
        let plan = task
            .plan
            .as_ref()
            .ok_or_else(|| OrchestratorError::agent_invocation("build requires an approved plan"))?;
        let prompt = self.build_prompt(task, plan);
        let outcome = self.run_agent(&self.config.build_agent, &prompt, &workspace).await?;
        self.write_agent_log(&task.task_id, &self.config.build_agent, &workspace, &outcome).await?;

        if let Some(error) = &outcome.error {
            return Err(OrchestratorError::agent_invocation(error.clone()));
        }

        let changed_files = collect_changed_files(&workspace).await?;
        let diff_path = write_diff_artifact(&workspace, &self.config.artifact_root, &task.task_id).await?;

        Ok(BuildResult {
            changed_files,
            diff_path,
            output_text: outcome.text,
            usage: outcome.usage,
        })
    }

    async fn run_test(&self, task: &Task, command: &str) -> Result<TestResult> {
        let workspace = self.workspace_for(task);
        let started = Instant::now();

        let mut shell = Command::new("sh");
        shell.arg("-c").arg(command).current_dir(&workspace);
        shell.stdout(Stdio::piped()).stderr(Stdio::piped());

        let run_result = tokio::time::timeout(self.config.timeout, shell.output()).await;

        let (exit_code, stdout, stderr) = match run_result {
            Err(_) => (124, String::new(), "timed out".to_string()),
            Ok(Err(err)) if err.kind() == std::io::ErrorKind::NotFound => (127, String::new(), err.to_string()),
            Ok(Err(err)) => (127, String::new(), err.to_string()),
            Ok(Ok(output)) => (
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stdout).into_owned(),
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ),
        };

        let duration_ms = started.elapsed().as_millis() as u64;

        tokio::fs::create_dir_all(&self.config.artifact_root).await?;
        let log_path = self.config.artifact_root.join(format!("{}_test.log", task.task_id));
        let payload = json!({
            "command": command,
            "exit_code": exit_code,
            "duration_ms": duration_ms,
            "stdout": stdout,
            "stderr": stderr,
        });
        tokio::fs::write(&log_path, serde_json::to_vec_pretty(&payload)?).await?;

        Ok(TestResult {
            command: command.to_string(),
            exit_code,
            log_path: log_path.to_string_lossy().into_owned(),
            duration_ms,
        })
    }
}

//! Isolated working copies backed by the version-control system's native
//! worktree feature, so concurrent tasks cannot interfere with each other.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::warn;

use crate::error::{OrchestratorError, Result};

#[derive(Debug, Clone)]
pub struct WorktreeHandle {
    pub branch: String,
    pub path: PathBuf,
}

pub struct WorktreeManager {
    repo_path: PathBuf,
    worktrees_root: PathBuf,
}

impl WorktreeManager {
    pub fn new(repo_path: impl Into<PathBuf>, worktrees_root: Option<PathBuf>) -> Self {
        let repo_path = repo_path.into();
        let worktrees_root = worktrees_root.unwrap_or_else(|| repo_path.join("worktrees"));
        Self {
            repo_path,
            worktrees_root,
        }
    }

    pub fn create(&self, task_id: &str, base_branch: &str, branch_prefix: &str) -> Result<WorktreeHandle> {
        let branch = format!("{branch_prefix}/{task_id}");
        let target_path = self.worktrees_root.join(task_id);
        if target_path.exists() {
            return Err(OrchestratorError::worktree_error(format!(
                "worktree directory already exists: {}",
                target_path.display()
            )));
        }

        let base_ref = if self.ref_exists(base_branch) {
            base_branch.to_string()
        } else {
            "HEAD".to_string()
        };

        self.run(&[
            "worktree",
            "add",
            "-b",
            &branch,
            &target_path.to_string_lossy(),
            &base_ref,
        ])?;

        Ok(WorktreeHandle {
            branch,
            path: target_path,
        })
    }

    pub fn remove(&self, task_id: &str, force: bool) -> Result<()> {
        let target_path = self.worktrees_root.join(task_id);
        if !target_path.exists() {
            return Ok(());
        }

        let mut args = vec!["worktree", "remove"];
        if force {
            args.push("--force");
        }
        let path_str = target_path.to_string_lossy().into_owned();
        args.push(&path_str);
        self.run(&args)
    }

    /// Explicitly unimplemented: the stash worktree policy has no specified
    /// behavior and must not be silently allowed.
    pub fn stash(&self, _task_id: &str) -> Result<()> {
        Err(OrchestratorError::Unimplemented(
            "stash worktree policy".to_string(),
        ))
    }

    fn ref_exists(&self, reference: &str) -> bool {
        Command::new("git")
            .current_dir(&self.repo_path)
            .args(["rev-parse", "--verify", reference])
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    fn run(&self, args: &[&str]) -> Result<()> {
        let output = Command::new("git")
            .current_dir(&self.repo_path)
            .args(args)
            .output()
            .map_err(|err| OrchestratorError::worktree_error(format!("failed to spawn git: {err}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(args = ?args, stderr = %stderr, "git worktree command failed");
            return Err(OrchestratorError::worktree_error(format!(
                "git {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }
        Ok(())
    }
}

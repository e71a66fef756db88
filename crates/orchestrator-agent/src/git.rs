//! Working-tree inspection: enumerates changed files and writes a combined
//! diff artifact after a build step.

use std::path::Path;

use orchestrator_core::error::{OrchestratorError, Result};
use tokio::process::Command;

/// Parses `git status --porcelain` output into a list of changed paths,
/// keeping only the rename target for ` -> ` entries.
pub fn parse_changed_files(porcelain: &str) -> Vec<String> {
    porcelain
        .lines()
        .filter_map(|line| {
            if line.len() < 4 {
                return None;
            }
            let rest = &line[3..];
            let path = match rest.split_once(" -> ") {
                Some((_, target)) => target,
                None => rest,
            };
            let path = path.trim();
            if path.is_empty() {
                None
            } else {
                Some(path.to_string())
            }
        })
        .collect()
}

pub async fn collect_changed_files(workspace: &Path) -> Result<Vec<String>> {
    let output = Command::new("git")
        .current_dir(workspace)
        .args(["status", "--porcelain"])
        .output()
        .await
        .map_err(|err| OrchestratorError::agent_invocation(format!("failed to run git status: {err}")))?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(parse_changed_files(&stdout))
}

async fn run_git_text(workspace: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .current_dir(workspace)
        .args(args)
        .output()
        .await
        .map_err(|err| OrchestratorError::agent_invocation(format!("failed to run git {}: {err}", args.join(" "))))?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Combines the unstaged diff, staged diff and short status into one text
/// artifact written under the artifact root.
pub async fn write_diff_artifact(workspace: &Path, artifact_root: &Path, task_id: &str) -> Result<String> {
    let unstaged = run_git_text(workspace, &["diff"]).await?;
    let staged = run_git_text(workspace, &["diff", "--cached"]).await?;
    let status = run_git_text(workspace, &["status", "--short"]).await?;

    let mut combined = String::new();
    combined.push_str("# status\n");
    combined.push_str(&status);
    combined.push_str("\n# staged diff\n");
    combined.push_str(&staged);
    combined.push_str("\n# unstaged diff\n");
    combined.push_str(&unstaged);

    tokio::fs::create_dir_all(artifact_root).await?;
    let path = artifact_root.join(format!("{task_id}.diff"));
    tokio::fs::write(&path, combined).await?;
    Ok(path.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_modification() {
        let porcelain = " M src/main.rs\n";
        assert_eq!(parse_changed_files(porcelain), vec!["src/main.rs"]);
    }

    #[test]
    fn parses_rename_keeping_target_only() {
        let porcelain = "R  old/name.rs -> new/name.rs\n";
        assert_eq!(parse_changed_files(porcelain), vec!["new/name.rs"]);
    }

    #[test]
    fn parses_multiple_entries() {
        let porcelain = " M src/a.rs\n?? src/b.rs\nD  src/c.rs\n";
        let files = parse_changed_files(porcelain);
        assert_eq!(files, vec!["src/a.rs", "src/b.rs", "src/c.rs"]);
    }
}

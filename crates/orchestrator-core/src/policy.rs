//! File-change policy gate: the sole guard against an agent writing outside
//! its sandbox. Runs after every build, before any test.

use globset::Glob;

use crate::error::{OrchestratorError, Result};
use crate::model::PlanConstraints;

fn matches_any(path: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| {
        Glob::new(pattern)
            .map(|glob| glob.compile_matcher().is_match(path))
            .unwrap_or(false)
    })
}

/// Evaluated in order; the first failing rule aborts with `PolicyViolation`.
pub fn enforce_file_policy(changed_files: &[String], constraints: &PlanConstraints) -> Result<()> {
    if changed_files.len() as i64 > constraints.max_files_changed {
        return Err(OrchestratorError::policy_violation(format!(
            "changed {} files, exceeds limit of {}",
            changed_files.len(),
            constraints.max_files_changed
        )));
    }

    for path in changed_files {
        if matches_any(path, &constraints.forbidden_paths) {
            return Err(OrchestratorError::policy_violation(format!(
                "path '{path}' matches a forbidden pattern"
            )));
        }
    }

    for path in changed_files {
        if !matches_any(path, &constraints.allowed_paths) {
            return Err(OrchestratorError::policy_violation(format!(
                "path '{path}' does not match any allowed pattern"
            )));
        }
    }

    Ok(())
}

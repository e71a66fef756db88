//! Durable, one-file-per-task JSON store under `{root}/{task_id}.json`.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{OrchestratorError, Result};
use crate::model::Task;

pub struct TaskStore {
    root_dir: PathBuf,
}

impl TaskStore {
    pub fn new(root_dir: impl AsRef<Path>) -> Result<Self> {
        let root_dir = root_dir.as_ref().to_path_buf();
        fs::create_dir_all(&root_dir)?;
        Ok(Self { root_dir })
    }

    fn task_path(&self, task_id: &str) -> PathBuf {
        self.root_dir.join(format!("{task_id}.json"))
    }

    /// Atomic replace: write to a sibling temp file, then rename over the
    /// target so a reader never observes a partially written file.
    pub fn save(&self, task: &Task) -> Result<()> {
        let path = self.task_path(&task.task_id);
        let tmp_path = self.root_dir.join(format!("{}.json.tmp", task.task_id));
        let payload = serde_json::to_vec_pretty(task)?;
        if let Err(err) = fs::write(&tmp_path, &payload) {
            warn!(task_id = %task.task_id, error = %err, "failed to write temp task file");
            return Err(err.into());
        }
        if let Err(err) = fs::rename(&tmp_path, &path) {
            warn!(task_id = %task.task_id, error = %err, "failed to rename temp task file into place");
            let _ = fs::remove_file(&tmp_path);
            return Err(err.into());
        }
        debug!(task_id = %task.task_id, "saved task");
        Ok(())
    }

    pub fn get(&self, task_id: &str) -> Result<Task> {
        let path = self.task_path(task_id);
        if !path.exists() {
            return Err(OrchestratorError::task_not_found(task_id));
        }
        let data = fs::read(&path)?;
        let task = serde_json::from_slice(&data)?;
        Ok(task)
    }

    /// All tasks, ordered lexicographically by filename (equals id order for
    /// time-prefixed task ids).
    pub fn list(&self) -> Result<Vec<Task>> {
        let mut paths: Vec<PathBuf> = fs::read_dir(&self.root_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| p.extension().map(|ext| ext == "json").unwrap_or(false))
            .collect();
        paths.sort();

        let mut tasks = Vec::with_capacity(paths.len());
        for path in paths {
            let data = fs::read(&path)?;
            tasks.push(serde_json::from_slice(&data)?);
        }
        Ok(tasks)
    }
}

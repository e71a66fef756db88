//! Per-task mutation serialization. Request handlers may run concurrently
//! across tasks; within one task, mutation and persistence are serialized.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub struct TaskLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

pub type TaskGuard = OwnedMutexGuard<()>;

impl TaskLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a guard held for the duration of one orchestrator operation
    /// on `task_id`. The registry lock itself is released as soon as the
    /// per-task mutex is found or inserted; `lock_owned` lets the guard
    /// outlive that critical section without borrowing from this struct.
    pub async fn acquire(&self, task_id: &str) -> TaskGuard {
        let task_mutex = {
            let mut locks = self.locks.lock().await;
            locks.entry(task_id.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        task_mutex.lock_owned().await
    }
}

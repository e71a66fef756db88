//! Idempotency store for webhook messages: a set of seen `message_id`s,
//! protected by a mutex, persisted as a JSON list on every insert. Same
//! atomic write-then-rename discipline as `orchestrator_core::store::TaskStore`.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use orchestrator_core::error::Result;
use tokio::sync::Mutex;
use tracing::warn;

pub struct SeenMessageStore {
    path: PathBuf,
    seen: Mutex<HashSet<String>>,
}

impl SeenMessageStore {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let seen = if path.exists() {
            let data = fs::read(&path)?;
            serde_json::from_slice(&data)?
        } else {
            HashSet::new()
        };
        Ok(Self {
            path,
            seen: Mutex::new(seen),
        })
    }

    /// Records `message_id` if it hasn't been seen before, returning `true`
    /// for a fresh message and `false` for a duplicate. Persists to disk on
    /// every fresh insert.
    pub async fn record_if_new(&self, message_id: &str) -> bool {
        let mut seen = self.seen.lock().await;
        if seen.contains(message_id) {
            return false;
        }
        seen.insert(message_id.to_string());

        let ids: Vec<&String> = seen.iter().collect();
        let tmp_path = self.path.with_extension("json.tmp");
        match serde_json::to_vec_pretty(&ids) {
            Ok(payload) => {
                if let Err(err) = fs::write(&tmp_path, &payload).and_then(|_| fs::rename(&tmp_path, &self.path)) {
                    warn!(error = %err, "failed to persist seen_messages.json");
                    let _ = fs::remove_file(&tmp_path);
                }
            }
            Err(err) => warn!(error = %err, "failed to serialize seen_messages.json"),
        }
        true
    }
}

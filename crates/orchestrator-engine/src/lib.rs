//! Composition layer: ingest -> clarify -> approve -> run -> test, and
//! correlating incoming chat messages to pending tasks. Sits directly on
//! `orchestrator-core`'s state machine/store/policy and `orchestrator-agent`'s
//! subprocess boundary; this is the only crate that understands the full
//! task lifecycle end to end.

pub mod orchestrator;
pub mod task_lock;

pub use orchestrator::{generate_task_id, DispatchPolicy, NoopModelClassifier, Orchestrator, RepoConfig, Requirement};
pub use task_lock::{TaskGuard, TaskLocks};

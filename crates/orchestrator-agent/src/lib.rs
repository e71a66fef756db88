//! Subprocess boundary to the external code-generation agent: normalizes its
//! newline-delimited JSON event stream into a plan object and final text,
//! and captures the resulting working-tree changes as a diff artifact.

pub mod adapter;
pub mod events;
pub mod git;
pub mod json_extract;
pub mod model_classifier;
pub mod plan_normalize;

pub use adapter::{AgentAdapter, AgentConfig, BuildResult, ClarifyResult, Driver, OpenCodeAgentClient, TestResult};
pub use events::TokenUsage;
pub use model_classifier::AgentModelClassifier;

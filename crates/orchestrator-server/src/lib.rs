//! HTTP webhook receiver for chat-channel intake: URL verification, token
//! validation, idempotency, sender allowlist, and dispatch into
//! `orchestrator-engine`'s `Orchestrator`.

pub mod http;
pub mod idempotency;

pub use http::{app_router, serve, AppState};
pub use idempotency::SeenMessageStore;

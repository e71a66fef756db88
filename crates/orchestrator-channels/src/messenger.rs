//! `Messenger` is the injected capability for replying to the originating
//! chat platform. Concrete chat-platform clients stay out of the core;
//! this trait is the seam they plug into.

use async_trait::async_trait;
use orchestrator_core::error::Result;

#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_text(&self, chat_id: &str, text: &str) -> Result<()>;
}

/// No-op implementation for tests and for deployments with `send_reply`
/// disabled.
pub struct NullMessenger;

#[async_trait]
impl Messenger for NullMessenger {
    async fn send_text(&self, _chat_id: &str, _text: &str) -> Result<()> {
        Ok(())
    }
}

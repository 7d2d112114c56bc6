//! No-op memory — every turn starts from a blank history.

use async_trait::async_trait;
use deltaflow_core::error::MemoryError;
use deltaflow_core::memory::ConversationMemory;
use deltaflow_core::message::{ConversationId, Message};

/// A conversation memory that stores nothing.
pub struct NoopMemory;

#[async_trait]
impl ConversationMemory for NoopMemory {
    fn name(&self) -> &str {
        "none"
    }

    async fn append(
        &self,
        _conversation: &ConversationId,
        _message: Message,
    ) -> Result<(), MemoryError> {
        Ok(())
    }

    async fn trimmed_context(
        &self,
        _conversation: &ConversationId,
        _token_budget: usize,
    ) -> Result<Vec<Message>, MemoryError> {
        Ok(Vec::new())
    }

    async fn full_history(
        &self,
        _conversation: &ConversationId,
    ) -> Result<Vec<Message>, MemoryError> {
        Ok(Vec::new())
    }
}

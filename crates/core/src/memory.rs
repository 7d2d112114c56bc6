//! Conversation memory trait — where turn history lives between turns.
//!
//! The round loop only needs three things from storage: append a message,
//! fetch a context window that fits a token budget, and fetch everything.
//! How the window is trimmed is the backend's business.

use async_trait::async_trait;

use crate::error::MemoryError;
use crate::message::{ConversationId, Message};

/// The Conversation/Memory service.
///
/// Implementations: in-memory (`deltaflow-memory`), or anything persistent.
#[async_trait]
pub trait ConversationMemory: Send + Sync {
    /// The backend name (e.g., "in_memory").
    fn name(&self) -> &str;

    /// Append one message to a conversation's history.
    async fn append(&self, conversation: &ConversationId, message: Message)
    -> Result<(), MemoryError>;

    /// The most recent slice of history that fits in `token_budget`.
    async fn trimmed_context(
        &self,
        conversation: &ConversationId,
        token_budget: usize,
    ) -> Result<Vec<Message>, MemoryError>;

    /// The complete history, oldest first.
    async fn full_history(&self, conversation: &ConversationId)
    -> Result<Vec<Message>, MemoryError>;
}

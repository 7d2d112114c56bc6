//! Conversation memory implementations for deltaflow.
//!
//! All stores implement `deltaflow_core::ConversationMemory`.

pub mod in_memory;
pub mod noop;

pub use in_memory::InMemoryConversationStore;
pub use noop::NoopMemory;

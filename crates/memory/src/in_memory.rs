//! In-memory conversation store — useful for testing and ephemeral sessions.

use async_trait::async_trait;
use deltaflow_core::error::MemoryError;
use deltaflow_core::memory::ConversationMemory;
use deltaflow_core::message::{ConversationId, Message, Role};
use deltaflow_core::token::estimate_message_tokens;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Keeps every conversation's history in a map keyed by conversation id.
///
/// Context windows are cut from the newest message backwards until the
/// estimated token count would exceed the budget. A window never starts with
/// a tool result whose requesting assistant message was cut off.
#[derive(Clone)]
pub struct InMemoryConversationStore {
    conversations: Arc<RwLock<HashMap<ConversationId, Vec<Message>>>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self {
            conversations: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of conversations with at least one message.
    pub async fn conversation_count(&self) -> usize {
        self.conversations.read().await.len()
    }

    /// Drop a conversation's history. Returns whether it existed.
    pub async fn clear(&self, conversation: &ConversationId) -> bool {
        self.conversations.write().await.remove(conversation).is_some()
    }
}

impl Default for InMemoryConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

/// The newest suffix of `history` that fits `token_budget`.
fn trim_to_budget(history: &[Message], token_budget: usize) -> Vec<Message> {
    let mut used = 0usize;
    let mut start = history.len();

    for (i, message) in history.iter().enumerate().rev() {
        let cost = estimate_message_tokens(message);
        if used.saturating_add(cost) > token_budget {
            break;
        }
        used += cost;
        start = i;
    }

    // Orphaned tool results confuse every provider we talk to.
    while start < history.len() && history[start].role == Role::Tool {
        start += 1;
    }

    if start > 0 {
        debug!(
            dropped = start,
            kept = history.len() - start,
            tokens = used,
            "Trimmed conversation context"
        );
    }

    drop_unanswered_calls(history[start..].to_vec())
}

/// Remove assistant tool-call messages whose calls were not all answered in
/// `window`, together with the partial answers they did get.
fn drop_unanswered_calls(mut window: Vec<Message>) -> Vec<Message> {
    let answered: HashSet<String> = window
        .iter()
        .filter(|m| m.role == Role::Tool)
        .filter_map(|m| m.tool_call_id.clone())
        .collect();

    let mut orphaned: HashSet<String> = HashSet::new();
    window.retain(|m| {
        let unanswered = m.role == Role::Assistant
            && m.tool_calls.iter().any(|tc| !answered.contains(&tc.id));
        if unanswered {
            orphaned.extend(m.tool_calls.iter().map(|tc| tc.id.clone()));
        }
        !unanswered
    });

    if orphaned.is_empty() {
        return window;
    }

    debug!(calls = orphaned.len(), "Dropped unanswered tool calls from context");
    window.retain(|m| {
        m.role != Role::Tool
            || !m
                .tool_call_id
                .as_ref()
                .is_some_and(|id| orphaned.contains(id))
    });
    window
}

#[async_trait]
impl ConversationMemory for InMemoryConversationStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn append(
        &self,
        conversation: &ConversationId,
        message: Message,
    ) -> Result<(), MemoryError> {
        self.conversations
            .write()
            .await
            .entry(conversation.clone())
            .or_default()
            .push(message);
        Ok(())
    }

    async fn trimmed_context(
        &self,
        conversation: &ConversationId,
        token_budget: usize,
    ) -> Result<Vec<Message>, MemoryError> {
        let conversations = self.conversations.read().await;
        Ok(conversations
            .get(conversation)
            .map(|history| trim_to_budget(history, token_budget))
            .unwrap_or_default())
    }

    async fn full_history(
        &self,
        conversation: &ConversationId,
    ) -> Result<Vec<Message>, MemoryError> {
        let conversations = self.conversations.read().await;
        Ok(conversations.get(conversation).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deltaflow_core::message::MessageToolCall;

    fn id(s: &str) -> ConversationId {
        ConversationId::from(s)
    }

    #[tokio::test]
    async fn append_and_read_back() {
        let store = InMemoryConversationStore::new();
        store.append(&id("c1"), Message::user("hi")).await.unwrap();
        store.append(&id("c1"), Message::assistant("hello")).await.unwrap();
        store.append(&id("c2"), Message::user("other")).await.unwrap();

        let history = store.full_history(&id("c1")).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, "hello");
        assert_eq!(store.conversation_count().await, 2);
    }

    #[tokio::test]
    async fn unknown_conversation_is_empty() {
        let store = InMemoryConversationStore::new();
        assert!(store.full_history(&id("nope")).await.unwrap().is_empty());
        assert!(store.trimmed_context(&id("nope"), 100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn trimming_keeps_newest_messages() {
        let store = InMemoryConversationStore::new();
        for i in 0..10 {
            store
                .append(&id("c"), Message::user(format!("message number {i} {}", "x".repeat(40))))
                .await
                .unwrap();
        }

        let full = store.trimmed_context(&id("c"), usize::MAX).await.unwrap();
        assert_eq!(full.len(), 10);

        let budget = estimate_message_tokens(&full[9]) * 3;
        let window = store.trimmed_context(&id("c"), budget).await.unwrap();
        assert_eq!(window.len(), 3);
        assert!(window[2].content.starts_with("message number 9"));
    }

    #[tokio::test]
    async fn window_never_starts_with_orphan_tool_result() {
        let store = InMemoryConversationStore::new();
        let c = id("c");
        store.append(&c, Message::user("compute")).await.unwrap();
        store
            .append(
                &c,
                Message::assistant_with_tool_calls(
                    "",
                    vec![MessageToolCall {
                        id: "call_1".into(),
                        name: "calc".into(),
                        arguments: serde_json::json!({"expr": "1+1"}).to_string(),
                    }],
                ),
            )
            .await
            .unwrap();
        store.append(&c, Message::tool_result("call_1", "2")).await.unwrap();
        store.append(&c, Message::assistant("It is 2.")).await.unwrap();

        let history = store.full_history(&c).await.unwrap();
        let budget = estimate_message_tokens(&history[2]) + estimate_message_tokens(&history[3]);
        let window = store.trimmed_context(&c, budget).await.unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].role, Role::Assistant);
    }

    #[tokio::test]
    async fn unanswered_tool_calls_are_left_out() {
        let store = InMemoryConversationStore::new();
        let c = id("c");
        let call = |id: &str| MessageToolCall {
            id: id.into(),
            name: "calc".into(),
            arguments: "{}".into(),
        };
        store.append(&c, Message::user("compute")).await.unwrap();
        store
            .append(&c, Message::assistant_with_tool_calls("", vec![call("call_1"), call("call_2")]))
            .await
            .unwrap();
        store.append(&c, Message::tool_result("call_1", "2")).await.unwrap();
        store.append(&c, Message::user("again")).await.unwrap();
        store
            .append(&c, Message::assistant_with_tool_calls("", vec![call("call_3")]))
            .await
            .unwrap();

        let window = store.trimmed_context(&c, usize::MAX).await.unwrap();
        let roles: Vec<Role> = window.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::User]);
        assert_eq!(window[1].content, "again");

        // Stored history is untouched.
        assert_eq!(store.full_history(&c).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn clear_removes_history() {
        let store = InMemoryConversationStore::new();
        store.append(&id("c"), Message::user("hi")).await.unwrap();
        assert!(store.clear(&id("c")).await);
        assert!(!store.clear(&id("c")).await);
        assert!(store.full_history(&id("c")).await.unwrap().is_empty());
    }
}

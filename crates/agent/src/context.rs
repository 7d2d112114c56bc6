//! Per-turn mutable state of the round loop.

use deltaflow_core::message::{ConversationId, Message};
use std::sync::atomic::{AtomicU32, Ordering};

/// State owned by one user turn, created when the turn starts and dropped
/// when it reaches a terminal state.
///
/// The round counter only moves forward, and only when a tool batch had at
/// least one success. Batches that fail completely bump a separate streak
/// instead, which a success resets.
#[derive(Debug)]
pub struct RoundContext {
    conversation_id: ConversationId,
    round: AtomicU32,
    max_rounds: u32,
    history: Vec<Message>,
    direct_output: Option<String>,
    failed_streak: u32,
    model_calls: u32,
    tool_calls_made: u32,
}

impl RoundContext {
    pub fn new(conversation_id: ConversationId, max_rounds: u32, history: Vec<Message>) -> Self {
        Self {
            conversation_id,
            round: AtomicU32::new(0),
            max_rounds,
            history,
            direct_output: None,
            failed_streak: 0,
            model_calls: 0,
            tool_calls_made: 0,
        }
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    /// Rounds advanced so far.
    pub fn round(&self) -> u32 {
        self.round.load(Ordering::SeqCst)
    }

    pub fn max_rounds(&self) -> u32 {
        self.max_rounds
    }

    /// True once the round budget is used up; no further model call may start.
    pub fn rounds_exhausted(&self) -> bool {
        self.round() >= self.max_rounds
    }

    /// The message list for the next model call.
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn push(&mut self, message: Message) {
        self.history.push(message);
    }

    pub fn record_model_call(&mut self) -> u32 {
        self.model_calls += 1;
        self.model_calls
    }

    pub fn model_calls(&self) -> u32 {
        self.model_calls
    }

    pub fn tool_calls_made(&self) -> u32 {
        self.tool_calls_made
    }

    /// Record a finished tool batch. `any_success` must be computed over the
    /// whole batch. Returns whether the round advanced.
    pub fn record_batch(&mut self, size: usize, any_success: bool) -> bool {
        self.tool_calls_made = self
            .tool_calls_made
            .saturating_add(u32::try_from(size).unwrap_or(u32::MAX));
        if any_success {
            self.round.fetch_add(1, Ordering::SeqCst);
            self.failed_streak = 0;
        } else {
            self.failed_streak += 1;
        }
        any_success
    }

    /// Completely failed batches in a row.
    pub fn failed_streak(&self) -> u32 {
        self.failed_streak
    }

    /// Mark the turn as ended by a tool's direct output.
    pub fn set_direct_output(&mut self, content: impl Into<String>) {
        self.direct_output = Some(content.into());
    }

    pub fn direct_output(&self) -> Option<&str> {
        self.direct_output.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(max_rounds: u32) -> RoundContext {
        RoundContext::new(ConversationId::from("c"), max_rounds, vec![Message::user("hi")])
    }

    #[test]
    fn success_advances_round() {
        let mut ctx = ctx(2);
        assert!(!ctx.rounds_exhausted());
        assert!(ctx.record_batch(3, true));
        assert_eq!(ctx.round(), 1);
        assert!(ctx.record_batch(1, true));
        assert!(ctx.rounds_exhausted());
        assert_eq!(ctx.tool_calls_made(), 4);
    }

    #[test]
    fn total_failure_does_not_advance() {
        let mut ctx = ctx(2);
        assert!(!ctx.record_batch(2, false));
        assert!(!ctx.record_batch(1, false));
        assert_eq!(ctx.round(), 0);
        assert_eq!(ctx.failed_streak(), 2);
        assert_eq!(ctx.tool_calls_made(), 3);
    }

    #[test]
    fn success_resets_failure_streak() {
        let mut ctx = ctx(5);
        ctx.record_batch(1, false);
        ctx.record_batch(1, false);
        ctx.record_batch(1, true);
        assert_eq!(ctx.failed_streak(), 0);
        assert_eq!(ctx.round(), 1);
    }

    #[test]
    fn direct_output_flag() {
        let mut ctx = ctx(1);
        assert!(ctx.direct_output().is_none());
        ctx.set_direct_output("done");
        assert_eq!(ctx.direct_output(), Some("done"));
    }

    #[test]
    fn history_grows() {
        let mut ctx = ctx(1);
        ctx.push(Message::assistant("hello"));
        assert_eq!(ctx.history().len(), 2);
        assert_eq!(ctx.record_model_call(), 1);
        assert_eq!(ctx.model_calls(), 1);
    }
}

//! Caller-visible streaming events.
//!
//! Per round a caller sees zero or more `chunk` events and at most one
//! `tool_calls` event (followed by its `tool_result`s). Every turn ends with
//! exactly one of `final_answer`, `direct_output` or `error`.

use deltaflow_core::error::ErrorKind;
use deltaflow_core::tool::ToolCall;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::trace;

/// Events emitted by the round loop during a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentStreamEvent {
    /// A text increment for the caller.
    Chunk { content: String },

    /// The model requested a batch of tool calls.
    ToolCalls { round: u32, calls: Vec<ToolCall> },

    /// One tool call of the batch came back.
    ToolResult {
        id: String,
        name: String,
        output: String,
        success: bool,
        direct_output: bool,
    },

    /// The turn ended with a model answer.
    FinalAnswer {
        content: String,
        rounds: u32,
        model_calls: u32,
    },

    /// The turn ended with a tool's output shown as-is.
    DirectOutput { content: String, tool_name: String },

    /// The turn ended with an error. `message` is already classified.
    Error { kind: ErrorKind, message: String },
}

impl AgentStreamEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::ToolCalls { .. } => "tool_calls",
            Self::ToolResult { .. } => "tool_result",
            Self::FinalAnswer { .. } => "final_answer",
            Self::DirectOutput { .. } => "direct_output",
            Self::Error { .. } => "error",
        }
    }

    /// Whether this event ends the turn.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::FinalAnswer { .. } | Self::DirectOutput { .. } | Self::Error { .. }
        )
    }
}

/// Where the round loop sends caller events. Silent when nobody listens.
#[derive(Debug, Clone, Default)]
pub(crate) struct EventSink {
    tx: Option<mpsc::Sender<AgentStreamEvent>>,
}

impl EventSink {
    pub(crate) fn none() -> Self {
        Self::default()
    }

    pub(crate) fn channel(tx: mpsc::Sender<AgentStreamEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub(crate) async fn emit(&self, event: AgentStreamEvent) {
        if let Some(tx) = &self.tx
            && tx.send(event).await.is_err()
        {
            trace!("Event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serialization_chunk() {
        let event = AgentStreamEvent::Chunk {
            content: "Hello".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"chunk""#));
        assert!(json.contains(r#""content":"Hello""#));
    }

    #[test]
    fn event_serialization_tool_calls() {
        let event = AgentStreamEvent::ToolCalls {
            round: 0,
            calls: vec![ToolCall {
                id: "call_1".into(),
                name: "calc".into(),
                arguments: r#"{"a":1}"#.into(),
            }],
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"tool_calls""#));
        assert!(json.contains(r#""name":"calc""#));
    }

    #[test]
    fn event_serialization_error() {
        let event = AgentStreamEvent::Error {
            kind: ErrorKind::Budget,
            message: "Maximum rounds exceeded".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"error""#));
        assert!(json.contains(r#""kind":"budget""#));
        assert!(event.is_terminal());
    }

    #[test]
    fn event_deserialization() {
        let json = r#"{"type":"direct_output","content":"hi","tool_name":"handoff"}"#;
        let event: AgentStreamEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.event_type(), "direct_output");
        match event {
            AgentStreamEvent::DirectOutput { content, tool_name } => {
                assert_eq!(content, "hi");
                assert_eq!(tool_name, "handoff");
            }
            _ => panic!("Wrong variant"),
        }
    }

    #[tokio::test]
    async fn sink_without_receiver_is_silent() {
        EventSink::none()
            .emit(AgentStreamEvent::Chunk { content: "x".into() })
            .await;

        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        EventSink::channel(tx)
            .emit(AgentStreamEvent::Chunk { content: "y".into() })
            .await;
    }
}

//! Buffering decision engine.
//!
//! Decides, unit by unit, whether a round's output is held back or
//! forwarded to the caller as it arrives. The rules:
//!
//! - Tool-call units are always held until the round completes. In
//!   streaming mode that is reported as [`Decision::WaitForCompletion`].
//! - Text is held by default ([`Decision::ContinueBuffering`]). With
//!   `stream_partial_content` on it is forwarded immediately and never stored.
//! - On completion, held text is released only if no tool call was seen;
//!   a round that requests tools never shows its interim text.

use deltaflow_core::tool::ToolCall;
use tracing::debug;

/// One logical unit of model output, after accumulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseUnit {
    Text(String),
    ToolCall(ToolCall),
    /// The round's stream has completed.
    End,
}

/// What the caller should do with the unit just added.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Hold the unit; nothing to emit yet.
    ContinueBuffering,
    /// First forwarded text of the round: emit it now.
    StartStreaming,
    /// Subsequent forwarded text: emit it now.
    DirectOutput,
    /// A tool call was intercepted in streaming mode; it is dispatched once
    /// the round ends.
    WaitForCompletion,
    /// The round is over: drain [`BufferState::release`].
    ReleaseAll,
}

impl Decision {
    /// Whether the unit should be forwarded to the caller right away.
    pub fn emits_now(&self) -> bool {
        matches!(self, Self::StartStreaming | Self::DirectOutput)
    }
}

/// What the buffer hands back at the end of a round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Release {
    /// Held text, in arrival order. Empty when a tool call was seen.
    pub text: Vec<String>,
    /// Held tool calls, in arrival order.
    pub tool_calls: Vec<ToolCall>,
}

impl Release {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.tool_calls.is_empty()
    }

    pub fn joined_text(&self) -> String {
        self.text.concat()
    }
}

/// Per-round buffer. Create a fresh one for every round.
#[derive(Debug)]
pub struct BufferState {
    stream_partial_content: bool,
    held_text: Vec<String>,
    held_tool_calls: Vec<ToolCall>,
    tool_call_seen: bool,
    streaming_started: bool,
    completed: bool,
}

impl BufferState {
    pub fn new(stream_partial_content: bool) -> Self {
        Self {
            stream_partial_content,
            held_text: Vec::new(),
            held_tool_calls: Vec::new(),
            tool_call_seen: false,
            streaming_started: false,
            completed: false,
        }
    }

    /// Add one unit and get the decision for it.
    pub fn add_unit(&mut self, unit: &ResponseUnit) -> Decision {
        if self.completed {
            debug!("Unit after round completion ignored");
            return Decision::WaitForCompletion;
        }

        match unit {
            ResponseUnit::ToolCall(call) => {
                self.tool_call_seen = true;
                self.held_tool_calls.push(call.clone());
                if self.stream_partial_content {
                    Decision::WaitForCompletion
                } else {
                    Decision::ContinueBuffering
                }
            }
            ResponseUnit::Text(_) if self.stream_partial_content => {
                if self.streaming_started {
                    Decision::DirectOutput
                } else {
                    self.streaming_started = true;
                    Decision::StartStreaming
                }
            }
            ResponseUnit::Text(text) => {
                self.held_text.push(text.clone());
                Decision::ContinueBuffering
            }
            ResponseUnit::End => {
                self.completed = true;
                Decision::ReleaseAll
            }
        }
    }

    /// Drain everything held. Only meaningful after [`Decision::ReleaseAll`].
    pub fn release(&mut self) -> Release {
        let tool_calls = std::mem::take(&mut self.held_tool_calls);
        let text = std::mem::take(&mut self.held_text);
        if self.tool_call_seen && !text.is_empty() {
            debug!(
                segments = text.len(),
                "Discarding interim text from a tool-requesting round"
            );
            return Release {
                text: Vec::new(),
                tool_calls,
            };
        }
        Release { text, tool_calls }
    }

    pub fn tool_call_seen(&self) -> bool {
        self.tool_call_seen
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn streaming_started(&self) -> bool {
        self.streaming_started
    }
}

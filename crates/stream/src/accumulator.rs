//! Delta accumulator: folds one round's deltas into a complete message.
//!
//! Text increments are appended to a buffer, and each call to
//! [`DeltaAccumulator::accumulate`] remembers only the slice *that* delta
//! carried, so callers forward every character range exactly once.
//!
//! Tool-call fragments are merged by index. Fragments for different indices
//! may interleave; for one index they arrive in order. IDs and names are
//! taken from their first appearance, argument text is concatenated.

use deltaflow_core::error::ProtocolError;
use deltaflow_core::message::{Message, MessageToolCall, Role};
use deltaflow_core::provider::Usage;
use deltaflow_core::tool::ToolCall;
use tracing::{debug, warn};

use crate::delta::{FinishReason, StreamDelta, ToolCallDelta};

/// Highest tool-call index accepted in one round.
pub const MAX_TOOL_CALL_INDEX: usize = 127;

/// One tool call being assembled, identified by its index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallFragment {
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: String,
}

impl ToolCallFragment {
    fn merge(&mut self, delta: ToolCallDelta) {
        if self.id.is_none() {
            self.id = delta.id.filter(|id| !id.is_empty());
        }
        if self.name.is_none() {
            self.name = delta.name.filter(|name| !name.is_empty());
        }
        if let Some(args) = delta.arguments {
            self.arguments.push_str(&args);
        }
    }

    fn finalize(&self) -> Result<ToolCall, ProtocolError> {
        let name = self
            .name
            .clone()
            .ok_or(ProtocolError::MissingToolName { index: self.index })?;

        let id = self.id.clone().unwrap_or_else(|| {
            debug!(index = self.index, tool = %name, "Tool call without id, synthesizing one");
            format!("call_{}", self.index)
        });

        let arguments = if self.arguments.trim().is_empty() {
            "{}".to_string()
        } else {
            let parsed: serde_json::Value =
                serde_json::from_str(&self.arguments).map_err(|e| {
                    ProtocolError::InvalidToolArguments {
                        index: self.index,
                        name: name.clone(),
                        reason: e.to_string(),
                    }
                })?;
            if !parsed.is_object() {
                return Err(ProtocolError::InvalidToolArguments {
                    index: self.index,
                    name,
                    reason: "arguments must be a JSON object".into(),
                });
            }
            self.arguments.clone()
        };

        Ok(ToolCall {
            id,
            name,
            arguments,
        })
    }
}

/// The completed logical message for one model turn. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct AccumulatedMessage {
    pub role: Role,
    /// Concatenation of every text increment; may be empty.
    pub content: String,
    /// Completed tool calls, ordered by index.
    pub tool_calls: Vec<ToolCall>,
    /// The finish signal, `None` when the feed ended without one.
    pub finish: Option<FinishReason>,
    pub usage: Option<Usage>,
    pub complete: bool,
}

impl AccumulatedMessage {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Convert into a history message.
    pub fn to_message(&self) -> Message {
        let calls = self
            .tool_calls
            .iter()
            .map(|tc| MessageToolCall {
                id: tc.id.clone(),
                name: tc.name.clone(),
                arguments: tc.arguments.clone(),
            })
            .collect();
        let mut msg = Message::assistant_with_tool_calls(self.content.clone(), calls);
        msg.role = self.role;
        msg
    }
}

/// Stateful reducer over one round's deltas.
#[derive(Debug)]
pub struct DeltaAccumulator {
    role: Role,
    content: String,
    /// Byte range of `content` contributed by the most recent delta.
    new_range: Option<(usize, usize)>,
    fragments: Vec<Option<ToolCallFragment>>,
    finish: Option<FinishReason>,
    usage: Option<Usage>,
    /// First fragment that could not be placed; fails the build.
    malformed: Option<ProtocolError>,
    built: Option<Result<AccumulatedMessage, ProtocolError>>,
}

impl DeltaAccumulator {
    pub fn new() -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            new_range: None,
            fragments: Vec::new(),
            finish: None,
            usage: None,
            malformed: None,
            built: None,
        }
    }

    /// Build an already-finished accumulator from a complete (non-streamed)
    /// message, so both model paths share one validation.
    pub fn from_complete(message: &Message, usage: Option<Usage>) -> Self {
        let mut acc = Self::new();
        let tool_calls: Vec<ToolCallDelta> = message
            .tool_calls
            .iter()
            .enumerate()
            .map(|(index, tc)| ToolCallDelta {
                index,
                id: Some(tc.id.clone()),
                name: Some(tc.name.clone()),
                arguments: Some(tc.arguments.clone()),
            })
            .collect();
        let finish = if tool_calls.is_empty() {
            FinishReason::Stop
        } else {
            FinishReason::ToolCalls
        };
        acc.accumulate(StreamDelta {
            role: Some(message.role),
            content: Some(message.content.clone()).filter(|c| !c.is_empty()),
            tool_calls: Some(tool_calls).filter(|tc| !tc.is_empty()),
            finish: Some(finish),
            usage,
        });
        acc
    }

    /// Fold one delta in.
    pub fn accumulate(&mut self, delta: StreamDelta) {
        self.new_range = None;

        if self.is_complete() {
            warn!("Delta received after completion, ignoring");
            return;
        }

        if let Some(role) = delta.role {
            self.role = role;
        }

        if let Some(text) = delta.content.filter(|t| !t.is_empty()) {
            let start = self.content.len();
            self.content.push_str(&text);
            self.new_range = Some((start, self.content.len()));
        }

        for fragment in delta.tool_calls.into_iter().flatten() {
            let index = fragment.index;
            if index > MAX_TOOL_CALL_INDEX {
                debug!(index, "Tool call index out of range, skipping fragment");
                self.malformed.get_or_insert_with(|| {
                    ProtocolError::MalformedUnit(format!(
                        "tool call index {index} exceeds {MAX_TOOL_CALL_INDEX}"
                    ))
                });
                continue;
            }
            if self.fragments.len() <= index {
                self.fragments.resize_with(index + 1, || None);
            }
            self.fragments[index]
                .get_or_insert_with(|| ToolCallFragment {
                    index,
                    ..ToolCallFragment::default()
                })
                .merge(fragment);
        }

        if delta.usage.is_some() {
            self.usage = delta.usage;
        }

        if let Some(reason) = delta.finish {
            self.finish = Some(reason);
            self.freeze();
        }
    }

    /// Whether the last accumulated delta carried non-empty text.
    pub fn has_new_content(&self) -> bool {
        self.new_range.is_some()
    }

    /// The text carried by the last accumulated delta.
    pub fn new_content(&self) -> Option<&str> {
        self.new_range.map(|(start, end)| &self.content[start..end])
    }

    /// Everything accumulated so far.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Whether any tool-call fragment has been seen.
    pub fn tool_call_seen(&self) -> bool {
        self.fragments.iter().any(Option::is_some)
    }

    /// The in-progress fragments, in index order.
    pub fn fragments(&self) -> impl Iterator<Item = &ToolCallFragment> {
        self.fragments.iter().flatten()
    }

    pub fn is_complete(&self) -> bool {
        self.built.is_some()
    }

    /// Finalize a round whose feed ended without a finish signal.
    pub fn complete_implicitly(&mut self) {
        if !self.is_complete() {
            warn!(
                content_len = self.content.len(),
                tool_calls = self.fragments().count(),
                "Stream ended without a finish signal"
            );
            self.new_range = None;
            self.freeze();
        }
    }

    /// The frozen message. Idempotent once complete.
    pub fn build_message(&self) -> Result<AccumulatedMessage, ProtocolError> {
        match &self.built {
            Some(built) => built.clone(),
            None => Err(ProtocolError::Incomplete),
        }
    }

    fn freeze(&mut self) {
        if let Some(err) = &self.malformed {
            self.built = Some(Err(err.clone()));
            return;
        }

        let tool_calls: Result<Vec<ToolCall>, ProtocolError> =
            self.fragments().map(ToolCallFragment::finalize).collect();

        if self.finish == Some(FinishReason::Stop) && self.tool_call_seen() {
            debug!("Finish signal was 'stop' but tool calls are present, dispatching them");
        }

        self.built = Some(tool_calls.map(|tool_calls| AccumulatedMessage {
            role: self.role,
            content: self.content.clone(),
            tool_calls,
            finish: self.finish,
            usage: self.usage.clone(),
            complete: true,
        }));
    }
}

impl Default for DeltaAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

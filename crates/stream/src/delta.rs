//! Stream delta types and their wire decoding.
//!
//! A [`StreamDelta`] is one parsed unit of a streaming chat-completion
//! response. The wire shape is the OpenAI-compatible chunk:
//!
//! ```json
//! {"choices":[{"delta":{"role":"assistant","content":"Hi",
//!   "tool_calls":[{"index":0,"id":"call_1","function":{"name":"calc","arguments":"{\"a\""}}]},
//!   "finish_reason":null}]}
//! ```

use deltaflow_core::message::Role;
use deltaflow_core::provider::Usage;
use serde::Deserialize;

/// Why the model stopped producing this message.
///
/// The vocabulary is exactly `stop` and `tool_calls`; an absent signal is
/// `None` on the delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    ToolCalls,
}

impl FinishReason {
    /// Decode a wire `finish_reason`. Anything outside the vocabulary is
    /// treated as absent.
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "stop" => Some(Self::Stop),
            "tool_calls" => Some(Self::ToolCalls),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::ToolCalls => "tool_calls",
        }
    }
}

/// One fragment of an in-progress tool call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallDelta {
    /// Position of the call within the current message.
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    /// A slice of the argument JSON text.
    pub arguments: Option<String>,
}

/// One parsed unit from the raw stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamDelta {
    pub role: Option<Role>,
    pub content: Option<String>,
    pub tool_calls: Option<Vec<ToolCallDelta>>,
    pub finish: Option<FinishReason>,
    /// Usage totals, usually only on the last unit.
    pub usage: Option<Usage>,
}

impl StreamDelta {
    /// A delta carrying only a text increment.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    /// A delta carrying a single tool-call fragment.
    pub fn tool_call(fragment: ToolCallDelta) -> Self {
        Self {
            tool_calls: Some(vec![fragment]),
            ..Self::default()
        }
    }

    /// A delta carrying only a finish signal.
    pub fn finish(reason: FinishReason) -> Self {
        Self {
            finish: Some(reason),
            ..Self::default()
        }
    }

    /// True when the delta carries nothing the accumulator could use.
    pub fn is_empty(&self) -> bool {
        self.role.is_none()
            && self.content.is_none()
            && self.tool_calls.as_ref().is_none_or(|tc| tc.is_empty())
            && self.finish.is_none()
            && self.usage.is_none()
    }

    /// Decode one wire payload (the text after `data:`).
    pub fn decode(payload: &str) -> Result<Self, serde_json::Error> {
        let chunk: WireChunk = serde_json::from_str(payload)?;
        Ok(chunk.into_delta())
    }
}

// --- Wire types (internal) ---

#[derive(Debug, Deserialize)]
struct WireChunk {
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    #[serde(default)]
    delta: Option<WireDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireDelta {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCallDelta {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<WireFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct WireFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl WireChunk {
    fn into_delta(self) -> StreamDelta {
        let usage = self.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        // Only the first choice matters; n > 1 is never requested.
        let Some(choice) = self.choices.into_iter().next() else {
            return StreamDelta {
                usage,
                ..StreamDelta::default()
            };
        };

        let delta = choice.delta.unwrap_or_default();
        let role = delta.role.as_deref().and_then(|r| match r {
            "assistant" => Some(Role::Assistant),
            "user" => Some(Role::User),
            "system" => Some(Role::System),
            "tool" => Some(Role::Tool),
            _ => None,
        });

        let tool_calls = delta.tool_calls.map(|calls| {
            calls
                .into_iter()
                .map(|tc| {
                    let (name, arguments) = match tc.function {
                        Some(f) => (f.name, f.arguments),
                        None => (None, None),
                    };
                    ToolCallDelta {
                        index: tc.index,
                        id: tc.id,
                        name,
                        arguments,
                    }
                })
                .collect()
        });

        StreamDelta {
            role,
            content: delta.content,
            tool_calls,
            finish: choice.finish_reason.as_deref().and_then(FinishReason::from_wire),
            usage,
        }
    }
}

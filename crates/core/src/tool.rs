//! Tool trait and the dispatch contract the round loop talks to.
//!
//! The loop never executes tools itself: it hands each tool call (id, name,
//! raw argument text) to a [`ToolDispatcher`] and gets a
//! [`ToolInvocationResult`] back. [`ToolRegistry`] is the in-process
//! dispatcher; anything remote implements the same trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// A request to execute a tool, exactly as the model produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the model's tool_call.id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as raw JSON text
    pub arguments: String,
}

/// What a tool produced.
///
/// `DirectOutput` tells the round loop to stop reasoning and surface the
/// content to the end user as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "content", rename_all = "snake_case")]
pub enum ToolOutput {
    /// Normal successful output, fed back to the model.
    Text(String),
    /// The tool failed; the text is shown to the model so it can re-plan.
    Error(String),
    /// Successful output that ends the turn and goes straight to the user.
    DirectOutput(String),
}

impl ToolOutput {
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Error(_))
    }

    pub fn is_direct_output(&self) -> bool {
        matches!(self, Self::DirectOutput(_))
    }

    pub fn content(&self) -> &str {
        match self {
            Self::Text(s) | Self::Error(s) | Self::DirectOutput(s) => s,
        }
    }
}

/// The outcome of dispatching one tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInvocationResult {
    /// The call ID this result answers
    pub call_id: String,

    /// The tool that was asked for
    pub name: String,

    /// What came back
    pub output: ToolOutput,
}

impl ToolInvocationResult {
    pub fn text(call: &ToolCall, content: impl Into<String>) -> Self {
        Self::with_output(call, ToolOutput::Text(content.into()))
    }

    pub fn error(call: &ToolCall, message: impl Into<String>) -> Self {
        Self::with_output(call, ToolOutput::Error(message.into()))
    }

    pub fn direct_output(call: &ToolCall, content: impl Into<String>) -> Self {
        Self::with_output(call, ToolOutput::DirectOutput(content.into()))
    }

    fn with_output(call: &ToolCall, output: ToolOutput) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            output,
        }
    }

    pub fn is_success(&self) -> bool {
        self.output.is_success()
    }

    pub fn is_direct_output(&self) -> bool {
        self.output.is_direct_output()
    }
}

/// The dispatch contract of the external tool registry.
///
/// Per-call failures (unknown tool, bad arguments, tool errors) come back as
/// `Ok` results carrying [`ToolOutput::Error`]. `Err` is reserved for the
/// dispatch layer itself being unavailable, which fails the whole turn.
/// Retrying is the caller's business.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    /// Dispatch one call.
    async fn dispatch(&self, call: &ToolCall) -> Result<ToolInvocationResult, ToolError>;

    /// Tool schemas to advertise to the model.
    fn definitions(&self) -> Vec<ToolDefinition> {
        Vec::new()
    }
}

/// A single in-process tool.
///
/// `execute` runs on the async runtime, and its timeout only fires at an
/// `.await` point. CPU-bound or blocking work (file I/O through `std`,
/// subprocesses, heavy parsing) must be moved onto a blocking thread with
/// `tokio::task::spawn_blocking`, otherwise it stalls the whole batch and
/// the per-call timeout cannot interrupt it.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool.
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with parsed arguments.
    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of in-process tools, usable as a [`ToolDispatcher`].
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    async fn execute(&self, call: &ToolCall) -> Result<ToolOutput, ToolError> {
        let tool = self
            .tools
            .get(&call.name)
            .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;

        // Tools without parameters are often called with empty argument text.
        let arguments = if call.arguments.trim().is_empty() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            serde_json::from_str(&call.arguments)
                .map_err(|e| ToolError::InvalidArguments(e.to_string()))?
        };

        tool.execute(arguments).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolDispatcher for ToolRegistry {
    async fn dispatch(&self, call: &ToolCall) -> Result<ToolInvocationResult, ToolError> {
        Ok(match self.execute(call).await {
            Ok(output) => ToolInvocationResult {
                call_id: call.id.clone(),
                name: call.name.clone(),
                output,
            },
            Err(e) => {
                tracing::debug!(tool = %call.name, call_id = %call.id, error = %e, "Tool call failed");
                ToolInvocationResult::error(call, format!("Error: {e}"))
            }
        })
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }
}

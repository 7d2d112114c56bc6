//! Shared fixtures for the round-loop integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use deltaflow_core::error::{ProviderError, ToolError};
use deltaflow_core::provider::{Provider, ProviderRequest, ProviderResponse, RawEventFeed};
use deltaflow_core::tool::{Tool, ToolOutput, ToolRegistry};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

// ── Mock Provider ────────────────────────────────────────────────────────

/// Streams one scripted list of raw SSE lines per model call.
pub struct LineProvider {
    scripts: Mutex<VecDeque<Vec<String>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl LineProvider {
    pub fn new(scripts: Vec<Vec<String>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// The same script for every call, `times` times.
    pub fn repeating(lines: Vec<String>, times: usize) -> Self {
        Self::new(vec![lines; times])
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for LineProvider {
    fn name(&self) -> &str {
        "line_mock"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        panic!("LineProvider only streams");
    }

    async fn stream(&self, request: ProviderRequest) -> Result<RawEventFeed, ProviderError> {
        let mut requests = self.requests.lock().unwrap();
        requests.push(request);
        let lines = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("LineProvider exhausted at call #{}", requests.len()));

        let (tx, rx) = mpsc::channel(lines.len().max(1));
        for line in lines {
            tx.try_send(Ok(line)).unwrap();
        }
        Ok(rx)
    }
}

// ── Raw lines ────────────────────────────────────────────────────────────

pub fn data(chunk: serde_json::Value) -> String {
    format!("data: {chunk}")
}

pub fn content_line(text: &str) -> String {
    data(json!({"choices": [{"delta": {"content": text}}]}))
}

pub fn finish_line(reason: &str) -> String {
    data(json!({"choices": [{"delta": {}, "finish_reason": reason}]}))
}

pub fn tool_name_line(index: usize, id: &str, name: &str) -> String {
    data(json!({"choices": [{"delta": {"tool_calls": [
        {"index": index, "id": id, "type": "function", "function": {"name": name, "arguments": ""}}
    ]}}]}))
}

pub fn tool_args_line(index: usize, args: &str) -> String {
    data(json!({"choices": [{"delta": {"tool_calls": [
        {"index": index, "function": {"arguments": args}}
    ]}}]}))
}

/// A plain text answer, one content line per piece.
pub fn answer(pieces: &[&str]) -> Vec<String> {
    let mut lines: Vec<String> = pieces.iter().map(|p| content_line(p)).collect();
    lines.push(finish_line("stop"));
    lines.push("data: [DONE]".into());
    lines
}

/// A round requesting every `(id, name, arguments)` in `calls`.
pub fn tool_round(calls: &[(&str, &str, &str)]) -> Vec<String> {
    let mut lines = Vec::new();
    for (index, (id, name, args)) in calls.iter().enumerate() {
        lines.push(tool_name_line(index, id, name));
        lines.push(tool_args_line(index, args));
    }
    lines.push(finish_line("tool_calls"));
    lines.push("data: [DONE]".into());
    lines
}

// ── Tools ────────────────────────────────────────────────────────────────

/// Adds `a` and `b`.
pub struct CalcTool;

#[async_trait]
impl Tool for CalcTool {
    fn name(&self) -> &str {
        "calc"
    }

    fn description(&self) -> &str {
        "Add two numbers"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {"a": {"type": "number"}, "b": {"type": "number"}}
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let a = arguments["a"].as_f64().unwrap_or(0.0);
        let b = arguments["b"].as_f64().unwrap_or(0.0);
        Ok(ToolOutput::Text(format!("{}", a + b)))
    }
}

/// Always fails.
pub struct BrokenTool;

#[async_trait]
impl Tool for BrokenTool {
    fn name(&self) -> &str {
        "broken"
    }

    fn description(&self) -> &str {
        "Never works"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({"type": "object"})
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        Err(ToolError::ExecutionFailed {
            tool_name: "broken".into(),
            reason: "disk on fire".into(),
        })
    }
}

/// Hands the conversation to a human; its output ends the turn.
pub struct HandoffTool;

#[async_trait]
impl Tool for HandoffTool {
    fn name(&self) -> &str {
        "handoff"
    }

    fn description(&self) -> &str {
        "Transfer to a human agent"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({"type": "object"})
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        Ok(ToolOutput::DirectOutput(
            "A human agent will contact you shortly.".into(),
        ))
    }
}

/// Sleeps before answering.
pub struct SlowTool(pub Duration);

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }

    fn description(&self) -> &str {
        "Takes its time"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({"type": "object"})
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        tokio::time::sleep(self.0).await;
        Ok(ToolOutput::Text("finally".into()))
    }
}

/// Sums the bytes of `text` on a blocking thread.
pub struct DigestTool;

#[async_trait]
impl Tool for DigestTool {
    fn name(&self) -> &str {
        "digest"
    }

    fn description(&self) -> &str {
        "Byte sum of a string"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {"text": {"type": "string"}}
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let text = arguments["text"].as_str().unwrap_or_default().to_string();
        let sum = tokio::task::spawn_blocking(move || {
            text.bytes().map(u64::from).sum::<u64>()
        })
        .await
        .map_err(|e| ToolError::ExecutionFailed {
            tool_name: "digest".into(),
            reason: e.to_string(),
        })?;
        Ok(ToolOutput::Text(sum.to_string()))
    }
}

pub fn registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(CalcTool));
    registry.register(Box::new(BrokenTool));
    registry.register(Box::new(HandoffTool));
    registry.register(Box::new(SlowTool(Duration::from_secs(3))));
    registry.register(Box::new(DigestTool));
    registry
}

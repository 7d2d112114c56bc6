//! Shared test helpers: scripted providers and tool dispatchers.

use async_trait::async_trait;
use deltaflow_core::error::{ProviderError, ToolError};
use deltaflow_core::message::{Message, MessageToolCall};
use deltaflow_core::provider::{
    Provider, ProviderRequest, ProviderResponse, RawEventFeed, ToolDefinition, Usage,
};
use deltaflow_core::tool::{ToolCall, ToolDispatcher, ToolInvocationResult};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

/// One scripted model answer.
pub enum Script {
    /// Raw SSE lines for the streaming path.
    Lines(Vec<String>),
    /// A complete response for the non-streaming path.
    Response(ProviderResponse),
    /// The call itself fails.
    Fail(ProviderError),
    /// The call (or the stream) never produces anything.
    Hang,
}

/// A provider that plays back scripts in order, one per model call.
///
/// Panics if more calls are made than scripts provided.
#[derive(Default)]
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ProviderRequest>>,
    open_feeds: Mutex<Vec<mpsc::Sender<Result<String, ProviderError>>>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            ..Self::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next(&self, request: ProviderRequest) -> Script {
        let mut requests = self.requests.lock().unwrap();
        requests.push(request);
        self.scripts.lock().unwrap().pop_front().unwrap_or_else(|| {
            panic!("ScriptedProvider: no more scripts (call #{})", requests.len())
        })
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        match self.next(request) {
            Script::Response(response) => Ok(response),
            Script::Fail(e) => Err(e),
            Script::Hang => std::future::pending().await,
            Script::Lines(_) => panic!("ScriptedProvider: line script on the complete path"),
        }
    }

    async fn stream(&self, request: ProviderRequest) -> Result<RawEventFeed, ProviderError> {
        match self.next(request) {
            Script::Lines(lines) => {
                let (tx, rx) = mpsc::channel(lines.len().max(1));
                for line in lines {
                    tx.try_send(Ok(line)).unwrap();
                }
                Ok(rx)
            }
            Script::Fail(e) => Err(e),
            Script::Hang => {
                let (tx, rx) = mpsc::channel(1);
                self.open_feeds.lock().unwrap().push(tx);
                Ok(rx)
            }
            Script::Response(_) => panic!("ScriptedProvider: response script on the stream path"),
        }
    }
}

fn data(chunk: serde_json::Value) -> String {
    format!("data: {chunk}")
}

/// SSE lines for a plain text answer split into `pieces`.
pub fn text_lines(pieces: &[&str]) -> Vec<String> {
    let mut lines = vec![data(serde_json::json!({
        "choices": [{"delta": {"role": "assistant"}, "finish_reason": null}]
    }))];
    for piece in pieces {
        lines.push(data(serde_json::json!({
            "choices": [{"delta": {"content": piece}, "finish_reason": null}]
        })));
    }
    lines.push(data(serde_json::json!({
        "choices": [{"delta": {}, "finish_reason": "stop"}]
    })));
    lines.push("data: [DONE]".into());
    lines
}

/// SSE lines for a round requesting `calls` as `(id, name, arguments)`,
/// with arguments split in two fragments.
pub fn tool_call_lines(calls: &[(&str, &str, &str)]) -> Vec<String> {
    let mut lines = Vec::new();
    for (index, (id, name, _)) in calls.iter().enumerate() {
        lines.push(data(serde_json::json!({
            "choices": [{"delta": {"tool_calls": [
                {"index": index, "id": id, "function": {"name": name, "arguments": ""}}
            ]}}]
        })));
    }
    for (index, (_, _, args)) in calls.iter().enumerate() {
        let (head, tail) = args.split_at(args.len() / 2);
        for part in [head, tail] {
            lines.push(data(serde_json::json!({
                "choices": [{"delta": {"tool_calls": [
                    {"index": index, "function": {"arguments": part}}
                ]}}]
            })));
        }
    }
    lines.push(data(serde_json::json!({
        "choices": [{"delta": {}, "finish_reason": "tool_calls"}]
    })));
    lines.push("data: [DONE]".into());
    lines
}

/// A complete text response for the non-streaming path.
pub fn text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}

/// A complete tool-call response for the non-streaming path.
pub fn tool_call_response(calls: &[(&str, &str, &str)]) -> ProviderResponse {
    let calls = calls
        .iter()
        .map(|(id, name, args)| MessageToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments: args.to_string(),
        })
        .collect();
    ProviderResponse {
        message: Message::assistant_with_tool_calls("", calls),
        usage: None,
        model: "mock-model".into(),
    }
}

/// What a scripted tool does when dispatched.
#[derive(Clone)]
pub enum ToolBehavior {
    Text(String),
    Fail(String),
    Direct(String),
    /// Sleep, then answer with text.
    Slow(Duration, String),
    Panic,
    /// The dispatch layer itself is down.
    Outage,
}

/// A dispatcher with a fixed behavior per tool name. Unknown names fail.
#[derive(Default)]
pub struct ScriptedDispatcher {
    behaviors: HashMap<String, ToolBehavior>,
    dispatched: Mutex<Vec<ToolCall>>,
}

impl ScriptedDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, behavior: ToolBehavior) -> Self {
        self.behaviors.insert(name.to_string(), behavior);
        self
    }

    pub fn dispatched(&self) -> Vec<ToolCall> {
        self.dispatched.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolDispatcher for ScriptedDispatcher {
    async fn dispatch(&self, call: &ToolCall) -> Result<ToolInvocationResult, ToolError> {
        self.dispatched.lock().unwrap().push(call.clone());
        match self.behaviors.get(&call.name).cloned() {
            Some(ToolBehavior::Text(s)) => Ok(ToolInvocationResult::text(call, s)),
            Some(ToolBehavior::Fail(s)) => Ok(ToolInvocationResult::error(call, s)),
            Some(ToolBehavior::Direct(s)) => Ok(ToolInvocationResult::direct_output(call, s)),
            Some(ToolBehavior::Slow(delay, s)) => {
                tokio::time::sleep(delay).await;
                Ok(ToolInvocationResult::text(call, s))
            }
            Some(ToolBehavior::Panic) => panic!("tool {} exploded", call.name),
            Some(ToolBehavior::Outage) => {
                Err(ToolError::DispatchUnavailable("registry offline".into()))
            }
            None => Ok(ToolInvocationResult::error(
                call,
                format!("Tool not found: {}", call.name),
            )),
        }
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        let mut names: Vec<&String> = self.behaviors.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|name| ToolDefinition {
                name: name.clone(),
                description: format!("scripted {name}"),
                parameters: serde_json::json!({"type": "object"}),
            })
            .collect()
    }
}

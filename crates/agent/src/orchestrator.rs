//! The round loop: model call → tool batch → model call, until the turn ends.
//!
//! One user turn runs as a state machine:
//!
//! 1. **Running**: call the model with system prompt + trimmed history +
//!    everything folded so far this turn.
//! 2. A text answer ends the turn (**TerminatedNormal**). Tool calls move it
//!    to **AwaitingTools**.
//! 3. The whole batch is dispatched concurrently and every result is folded
//!    into history in call order. A direct-output result ends the turn
//!    (**TerminatedDirectOutput**) once folding is done.
//! 4. The round advances only if some call in the batch succeeded. Before the
//!    next model call the round budget and the consecutive-failure cap are
//!    checked (**TerminatedMaxRounds**).
//!
//! Any unrecoverable error (model call, protocol violation, dispatch outage,
//! memory) ends the turn in **Failed**. Rounds never overlap: round N is fully
//! folded before round N+1's model call is issued.

use chrono::Utc;
use deltaflow_config::AppConfig;
use deltaflow_core::error::Error;
use deltaflow_core::event::{DomainEvent, EventBus};
use deltaflow_core::memory::ConversationMemory;
use deltaflow_core::message::{ConversationId, Message};
use deltaflow_core::provider::{Provider, ProviderRequest, ToolChoice};
use deltaflow_core::tool::{ToolCall, ToolDispatcher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::context::RoundContext;
use crate::dispatch::BatchDispatcher;
use crate::round::{RoundOptions, run_round};
use crate::state::{TurnReport, TurnState};
use crate::stream_event::{AgentStreamEvent, EventSink};

/// Capacity of the caller event channel returned by `run_turn_stream`.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Loop settings. Mirrors the `[agent]` config section.
#[derive(Debug, Clone)]
struct LoopSettings {
    max_rounds: u32,
    stream_partial_content: bool,
    streaming: bool,
    tool_choice: ToolChoice,
    max_concurrent_tools: usize,
    tool_timeout: Duration,
    stream_timeout: Duration,
    model_timeout: Duration,
    context_token_budget: usize,
    max_consecutive_failed_rounds: u32,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_rounds: 10,
            stream_partial_content: false,
            streaming: true,
            tool_choice: ToolChoice::Auto,
            max_concurrent_tools: 4,
            tool_timeout: Duration::from_secs(30),
            stream_timeout: Duration::from_secs(120),
            model_timeout: Duration::from_secs(120),
            context_token_budget: 8192,
            max_consecutive_failed_rounds: 3,
        }
    }
}

/// How a turn left the loop, before it is turned into a report.
enum Exit {
    Answer(String),
    Direct { content: String, tool_name: String },
    Budget(Error),
    Failed(Error),
}

/// Drives user turns against a provider, a tool dispatcher and a memory.
///
/// Cheap to clone; all collaborators are shared.
#[derive(Clone)]
pub struct RoundLoop {
    provider: Arc<dyn Provider>,
    dispatcher: Arc<dyn ToolDispatcher>,
    memory: Arc<dyn ConversationMemory>,
    event_bus: Arc<EventBus>,
    model: String,
    system_prompt: Option<String>,
    temperature: f32,
    max_tokens: Option<u32>,
    settings: LoopSettings,
}

impl RoundLoop {
    /// Create a round loop with default settings.
    pub fn new(
        provider: Arc<dyn Provider>,
        dispatcher: Arc<dyn ToolDispatcher>,
        memory: Arc<dyn ConversationMemory>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            dispatcher,
            memory,
            event_bus: Arc::new(EventBus::default()),
            model: model.into(),
            system_prompt: None,
            temperature: 0.7,
            max_tokens: None,
            settings: LoopSettings::default(),
        }
    }

    /// Create a round loop from the application config.
    pub fn from_config(
        config: &AppConfig,
        provider: Arc<dyn Provider>,
        dispatcher: Arc<dyn ToolDispatcher>,
        memory: Arc<dyn ConversationMemory>,
    ) -> Self {
        let mut round_loop = Self::new(provider, dispatcher, memory, config.model.clone())
            .with_temperature(config.temperature)
            .with_max_tokens(config.max_tokens)
            .with_settings(&config.agent);
        round_loop.system_prompt = config.system_prompt.clone();
        round_loop
    }

    /// Apply every `[agent]` setting at once.
    pub fn with_settings(mut self, agent: &deltaflow_config::AgentConfig) -> Self {
        self.settings = LoopSettings {
            max_rounds: agent.max_rounds,
            stream_partial_content: agent.stream_partial_content,
            streaming: agent.streaming,
            tool_choice: agent.tool_choice,
            max_concurrent_tools: agent.max_concurrent_tools,
            tool_timeout: agent.tool_timeout(),
            stream_timeout: agent.stream_timeout(),
            model_timeout: agent.model_timeout(),
            context_token_budget: agent.context_token_budget,
            max_consecutive_failed_rounds: agent.max_consecutive_failed_rounds,
        };
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = event_bus;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    /// Set the number of rounds a turn may advance.
    pub fn with_max_rounds(mut self, max: u32) -> Self {
        self.settings.max_rounds = max;
        self
    }

    /// Forward text as it streams, even from rounds that request tools.
    pub fn with_stream_partial_content(mut self, enabled: bool) -> Self {
        self.settings.stream_partial_content = enabled;
        self
    }

    /// Use the streaming model path (default) or complete calls.
    pub fn with_streaming(mut self, enabled: bool) -> Self {
        self.settings.streaming = enabled;
        self
    }

    pub fn with_tool_choice(mut self, choice: ToolChoice) -> Self {
        self.settings.tool_choice = choice;
        self
    }

    pub fn with_max_concurrent_tools(mut self, max: usize) -> Self {
        self.settings.max_concurrent_tools = max;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.settings.tool_timeout = timeout;
        self
    }

    pub fn with_stream_timeout(mut self, timeout: Duration) -> Self {
        self.settings.stream_timeout = timeout;
        self
    }

    pub fn with_model_timeout(mut self, timeout: Duration) -> Self {
        self.settings.model_timeout = timeout;
        self
    }

    pub fn with_context_token_budget(mut self, budget: usize) -> Self {
        self.settings.context_token_budget = budget;
        self
    }

    /// Completely failed tool batches in a row before the turn is ended.
    /// Zero disables the cap; the round budget still applies.
    pub fn with_max_consecutive_failed_rounds(mut self, max: u32) -> Self {
        self.settings.max_consecutive_failed_rounds = max;
        self
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Run one user turn to a terminal state.
    pub async fn run_turn(
        &self,
        conversation_id: &ConversationId,
        user_message: impl Into<String>,
    ) -> TurnReport {
        self.execute(conversation_id, user_message.into(), &EventSink::none())
            .await
    }

    /// Run one user turn and return the answer text.
    pub async fn process(
        &self,
        conversation_id: &ConversationId,
        user_message: impl Into<String>,
    ) -> deltaflow_core::Result<String> {
        self.run_turn(conversation_id, user_message)
            .await
            .into_result()
    }

    /// Run one user turn in the background, streaming caller events.
    ///
    /// The channel closes after the terminal event.
    pub fn run_turn_stream(
        &self,
        conversation_id: ConversationId,
        user_message: impl Into<String>,
    ) -> mpsc::Receiver<AgentStreamEvent> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let this = self.clone();
        let user_message = user_message.into();

        tokio::spawn(async move {
            this.execute(&conversation_id, user_message, &EventSink::channel(tx))
                .await;
        });

        rx
    }

    async fn execute(
        &self,
        conversation_id: &ConversationId,
        user_message: String,
        sink: &EventSink,
    ) -> TurnReport {
        info!(conversation_id = %conversation_id, model = %self.model, "Starting turn");

        let mut ctx = RoundContext::new(conversation_id.clone(), self.settings.max_rounds, Vec::new());
        let exit = match self.prepare(&mut ctx, user_message).await {
            Ok(()) => self.drive(&mut ctx, sink).await,
            Err(e) => Exit::Failed(e),
        };

        self.finish(&ctx, exit, sink).await
    }

    /// Validate identifiers and assemble the opening history.
    async fn prepare(&self, ctx: &mut RoundContext, user_message: String) -> Result<(), Error> {
        if self.model.trim().is_empty() {
            return Err(Error::config("a model identifier is required"));
        }
        if ctx.conversation_id().is_empty() {
            return Err(Error::config("a conversation identifier is required"));
        }

        let conversation_id = ctx.conversation_id().clone();
        let context = self
            .memory
            .trimmed_context(&conversation_id, self.settings.context_token_budget)
            .await?;

        if let Some(prompt) = &self.system_prompt {
            ctx.push(Message::system(prompt.as_str()));
        }
        for message in context {
            ctx.push(message);
        }

        let user = Message::user(user_message);
        self.memory.append(&conversation_id, user.clone()).await?;
        ctx.push(user);
        Ok(())
    }

    /// The loop proper. Returns once a terminal state is reached.
    async fn drive(&self, ctx: &mut RoundContext, sink: &EventSink) -> Exit {
        let batches = BatchDispatcher::new(
            Arc::clone(&self.dispatcher),
            self.settings.max_concurrent_tools,
            self.settings.tool_timeout,
        );
        let tools = self.dispatcher.definitions();
        let options = RoundOptions {
            streaming: self.settings.streaming,
            stream_partial_content: self.settings.stream_partial_content,
            stream_timeout: self.settings.stream_timeout,
            model_timeout: self.settings.model_timeout,
        };

        loop {
            if ctx.rounds_exhausted() {
                warn!(
                    conversation_id = %ctx.conversation_id(),
                    max_rounds = ctx.max_rounds(),
                    "Round budget exhausted"
                );
                return Exit::Budget(Error::MaxRoundsExceeded {
                    max_rounds: ctx.max_rounds(),
                });
            }
            let cap = self.settings.max_consecutive_failed_rounds;
            if cap > 0 && ctx.failed_streak() >= cap {
                warn!(
                    conversation_id = %ctx.conversation_id(),
                    streak = ctx.failed_streak(),
                    "Tool batches keep failing"
                );
                return Exit::Budget(Error::ConsecutiveToolFailures {
                    streak: ctx.failed_streak(),
                });
            }

            let round = ctx.round();
            let call_number = ctx.record_model_call();
            debug!(
                conversation_id = %ctx.conversation_id(),
                round,
                call = call_number,
                state = %TurnState::Running,
                "Invoking model"
            );
            self.event_bus.publish(DomainEvent::RoundStarted {
                conversation_id: ctx.conversation_id().to_string(),
                round,
                timestamp: Utc::now(),
            });

            let request = ProviderRequest {
                model: self.model.clone(),
                messages: ctx.history().to_vec(),
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                tools: tools.clone(),
                tool_choice: self.settings.tool_choice,
                stream: self.settings.streaming,
            };

            let output = match run_round(self.provider.as_ref(), request, options, sink).await {
                Ok(output) => output,
                Err(e) => return Exit::Failed(e),
            };

            self.event_bus.publish(DomainEvent::ResponseGenerated {
                conversation_id: ctx.conversation_id().to_string(),
                model: output.model.clone().unwrap_or_else(|| self.model.clone()),
                tokens_used: output.message.usage.as_ref().map_or(0, |u| u.total_tokens),
                timestamp: Utc::now(),
            });

            let assistant = output.message.to_message();
            if let Err(e) = self.fold(ctx, assistant).await {
                return Exit::Failed(e);
            }

            if output.release.tool_calls.is_empty() {
                let held = output.release.joined_text();
                if !held.is_empty() {
                    sink.emit(AgentStreamEvent::Chunk { content: held }).await;
                }
                return Exit::Answer(output.message.content);
            }

            let calls = output.release.tool_calls;
            debug!(round, tool_calls = calls.len(), state = %TurnState::AwaitingTools, "Dispatching tool batch");
            sink.emit(AgentStreamEvent::ToolCalls {
                round,
                calls: calls.clone(),
            })
            .await;

            match self.run_batch(ctx, &batches, &calls, sink).await {
                Ok(Some(exit)) => return exit,
                Ok(None) => {}
                Err(e) => return Exit::Failed(e),
            }
        }
    }

    /// Dispatch one batch and fold its results. Returns an exit when a
    /// result asked for direct output.
    async fn run_batch(
        &self,
        ctx: &mut RoundContext,
        batches: &BatchDispatcher,
        calls: &[ToolCall],
        sink: &EventSink,
    ) -> Result<Option<Exit>, Error> {
        let dispatched = match batches.run(calls).await {
            Ok(dispatched) => dispatched,
            Err(e) => {
                // Every tool call in history needs an answer, or the next
                // request is rejected upstream.
                for call in calls {
                    let message = Message::tool_result(&call.id, format!("Error: {e}"))
                        .with_metadata("is_error", serde_json::Value::Bool(true));
                    self.fold(ctx, message).await?;
                }
                return Err(e.into());
            }
        };

        let any_success = dispatched.iter().any(|d| d.result.is_success());
        let mut direct: Option<(String, String)> = None;

        for d in &dispatched {
            let result = &d.result;
            self.event_bus.publish(DomainEvent::ToolExecuted {
                tool_name: result.name.clone(),
                call_id: result.call_id.clone(),
                success: result.is_success(),
                duration_ms: u64::try_from(d.duration.as_millis()).unwrap_or(u64::MAX),
                timestamp: Utc::now(),
            });
            sink.emit(AgentStreamEvent::ToolResult {
                id: result.call_id.clone(),
                name: result.name.clone(),
                output: result.output.content().to_string(),
                success: result.is_success(),
                direct_output: result.is_direct_output(),
            })
            .await;

            let mut message = Message::tool_result(&result.call_id, result.output.content());
            if !result.is_success() {
                message = message.with_metadata("is_error", serde_json::Value::Bool(true));
            }
            if result.is_direct_output() {
                message = message.with_metadata("direct_output", serde_json::Value::Bool(true));
                if direct.is_none() {
                    direct = Some((result.output.content().to_string(), result.name.clone()));
                }
            }
            self.fold(ctx, message).await?;
        }

        let advanced = ctx.record_batch(dispatched.len(), any_success);
        debug!(
            round = ctx.round(),
            advanced,
            failed_streak = ctx.failed_streak(),
            "Tool batch folded"
        );

        let Some((content, tool_name)) = direct else {
            return Ok(None);
        };

        info!(tool = %tool_name, "Tool requested direct output, ending turn");
        ctx.set_direct_output(content.clone());
        self.fold(ctx, Message::assistant(content.clone())).await?;
        Ok(Some(Exit::Direct { content, tool_name }))
    }

    /// Append a message to both the turn history and the memory.
    async fn fold(&self, ctx: &mut RoundContext, message: Message) -> Result<(), Error> {
        self.memory
            .append(ctx.conversation_id(), message.clone())
            .await?;
        ctx.push(message);
        Ok(())
    }

    /// Turn an exit into a report and emit the terminal event.
    async fn finish(&self, ctx: &RoundContext, exit: Exit, sink: &EventSink) -> TurnReport {
        let (state, output, error) = match exit {
            Exit::Answer(content) => {
                sink.emit(AgentStreamEvent::FinalAnswer {
                    content: content.clone(),
                    rounds: ctx.round(),
                    model_calls: ctx.model_calls(),
                })
                .await;
                (TurnState::TerminatedNormal, Some(content), None)
            }
            Exit::Direct { content, tool_name } => {
                sink.emit(AgentStreamEvent::DirectOutput {
                    content: content.clone(),
                    tool_name,
                })
                .await;
                (TurnState::TerminatedDirectOutput, Some(content), None)
            }
            Exit::Budget(e) => (TurnState::TerminatedMaxRounds, None, Some(e)),
            Exit::Failed(e) => (TurnState::Failed, None, Some(e)),
        };

        if let Some(e) = &error {
            warn!(
                conversation_id = %ctx.conversation_id(),
                state = %state,
                kind = ?e.kind(),
                error = %e,
                "Turn ended with error"
            );
            self.event_bus.publish(DomainEvent::ErrorOccurred {
                context: format!("turn {}", ctx.conversation_id()),
                error_message: e.to_string(),
                timestamp: Utc::now(),
            });
            sink.emit(AgentStreamEvent::Error {
                kind: e.kind(),
                message: e.user_message(),
            })
            .await;
        }

        self.event_bus.publish(DomainEvent::TurnFinished {
            conversation_id: ctx.conversation_id().to_string(),
            state: state.as_str().to_string(),
            rounds: ctx.round(),
            model_calls: ctx.model_calls(),
            timestamp: Utc::now(),
        });
        info!(
            conversation_id = %ctx.conversation_id(),
            state = %state,
            rounds = ctx.round(),
            model_calls = ctx.model_calls(),
            "Turn finished"
        );

        TurnReport {
            state,
            output,
            error,
            rounds: ctx.round(),
            model_calls: ctx.model_calls(),
            tool_calls_made: ctx.tool_calls_made(),
        }
    }
}

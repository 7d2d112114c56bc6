//! One model invocation: request → accumulated message → buffer release.
//!
//! Both model paths end in the same place. The streaming path feeds parsed
//! deltas through the accumulator and forwards text the buffer allows; the
//! complete path turns the finished message into an already-complete
//! accumulator. Either way the tool calls and the end marker go through the
//! buffer last, and what it releases decides the round.

use deltaflow_core::error::{Error, ProviderError};
use deltaflow_core::provider::{Provider, ProviderRequest};
use deltaflow_stream::{
    AccumulatedMessage, BufferState, DeltaAccumulator, Release, ResponseUnit, delta_stream,
};
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, trace};

use crate::stream_event::{AgentStreamEvent, EventSink};

/// How one round should talk to the model.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RoundOptions {
    pub streaming: bool,
    pub stream_partial_content: bool,
    pub stream_timeout: Duration,
    pub model_timeout: Duration,
}

/// What a finished round produced.
#[derive(Debug)]
pub(crate) struct RoundOutput {
    pub message: AccumulatedMessage,
    pub release: Release,
    /// Model that answered, when the provider reported one.
    pub model: Option<String>,
}

/// Run one model invocation to completion.
pub(crate) async fn run_round(
    provider: &dyn Provider,
    request: ProviderRequest,
    options: RoundOptions,
    sink: &EventSink,
) -> Result<RoundOutput, Error> {
    let mut buffer = BufferState::new(options.stream_partial_content);

    let (accumulator, model) = if options.streaming {
        let acc = consume_stream(provider, request, options, &mut buffer, sink).await?;
        (acc, None)
    } else {
        let response = tokio::time::timeout(options.model_timeout, provider.complete(request))
            .await
            .map_err(|_| {
                ProviderError::Timeout(format!(
                    "model call exceeded {}s",
                    options.model_timeout.as_secs()
                ))
            })??;
        let acc = DeltaAccumulator::from_complete(&response.message, response.usage.clone());
        if !acc.content().is_empty() {
            let decision = buffer.add_unit(&ResponseUnit::Text(acc.content().to_string()));
            if decision.emits_now() {
                sink.emit(AgentStreamEvent::Chunk {
                    content: acc.content().to_string(),
                })
                .await;
            }
        }
        (acc, Some(response.model))
    };

    let message = accumulator.build_message()?;
    for call in &message.tool_calls {
        buffer.add_unit(&ResponseUnit::ToolCall(call.clone()));
    }
    buffer.add_unit(&ResponseUnit::End);
    let release = buffer.release();

    debug!(
        finish = message.finish.map(|f| f.as_str()).unwrap_or("none"),
        tool_calls = release.tool_calls.len(),
        held_text = release.text.len(),
        "Round stream complete"
    );

    Ok(RoundOutput {
        message,
        release,
        model,
    })
}

/// Consume the raw feed under the stream timeout. The accumulator comes back
/// complete, implicitly if the feed ended without a finish signal.
async fn consume_stream(
    provider: &dyn Provider,
    request: ProviderRequest,
    options: RoundOptions,
    buffer: &mut BufferState,
    sink: &EventSink,
) -> Result<DeltaAccumulator, Error> {
    let mut acc = DeltaAccumulator::new();

    let consume = async {
        let feed = provider.stream(request).await?;
        let mut deltas = delta_stream(feed);

        while let Some(item) = deltas.next().await {
            acc.accumulate(item?);

            if let Some(text) = acc.new_content() {
                let unit = ResponseUnit::Text(text.to_string());
                if buffer.add_unit(&unit).emits_now() {
                    sink.emit(AgentStreamEvent::Chunk {
                        content: text.to_string(),
                    })
                    .await;
                }
            }

            if acc.is_complete() {
                trace!("Finish signal received");
                break;
            }
        }
        Ok::<(), Error>(())
    };

    tokio::time::timeout(options.stream_timeout, consume)
        .await
        .map_err(|_| {
            ProviderError::Timeout(format!(
                "stream exceeded {}s",
                options.stream_timeout.as_secs()
            ))
        })??;

    if !acc.is_complete() {
        acc.complete_implicitly();
    }
    Ok(acc)
}

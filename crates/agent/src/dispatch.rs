//! Fan-out/fan-in execution of one round's tool calls.
//!
//! Every call of a batch runs as its own task on the runtime, bounded by a
//! semaphore, so slow tools never sit on the stream-consumption path. The
//! batch completes only when every call has come back; results keep the
//! order of the calls, not the order of completion.

use deltaflow_core::error::ToolError;
use deltaflow_core::tool::{ToolCall, ToolDispatcher, ToolInvocationResult};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// One dispatched call and how long it took.
#[derive(Debug, Clone)]
pub struct DispatchedCall {
    pub result: ToolInvocationResult,
    pub duration: Duration,
}

/// Runs tool batches against a [`ToolDispatcher`].
///
/// Calls run as tasks on the current runtime. A dispatcher that blocks the
/// thread is not preempted by the call timeout; blocking tools belong on
/// `tokio::task::spawn_blocking`.
#[derive(Clone)]
pub struct BatchDispatcher {
    dispatcher: Arc<dyn ToolDispatcher>,
    permits: Arc<Semaphore>,
    call_timeout: Duration,
}

impl BatchDispatcher {
    pub fn new(
        dispatcher: Arc<dyn ToolDispatcher>,
        max_concurrent: usize,
        call_timeout: Duration,
    ) -> Self {
        Self {
            dispatcher,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            call_timeout,
        }
    }

    /// Dispatch every call and wait for all of them.
    ///
    /// A timed-out or panicking call becomes a failed result for that call
    /// alone; each call runs as its own task so a panic stays inside it. If
    /// the dispatch layer reports itself unavailable the batch
    /// still runs to completion, then the first such error is returned.
    pub async fn run(&self, calls: &[ToolCall]) -> Result<Vec<DispatchedCall>, ToolError> {
        let mut join_set = JoinSet::new();

        for (idx, call) in calls.iter().enumerate() {
            let dispatcher = Arc::clone(&self.dispatcher);
            let permits = Arc::clone(&self.permits);
            let call_timeout = self.call_timeout;
            let call = call.clone();

            join_set.spawn(async move {
                let outcome = dispatch_one(dispatcher, permits, call_timeout, &call).await;
                (idx, outcome)
            });
        }

        let mut slots: Vec<Option<Result<DispatchedCall, ToolError>>> =
            (0..calls.len()).map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((idx, outcome)) => slots[idx] = Some(outcome),
                Err(e) if e.is_panic() => warn!(error = %e, "Tool task panicked"),
                Err(e) => warn!(error = %e, "Tool task did not complete"),
            }
        }

        let mut results = Vec::with_capacity(calls.len());
        let mut outage = None;
        for (call, slot) in calls.iter().zip(slots) {
            match slot {
                Some(Ok(dispatched)) => results.push(dispatched),
                Some(Err(e)) => {
                    warn!(tool = %call.name, call_id = %call.id, error = %e, "Tool dispatch unavailable");
                    outage.get_or_insert(e);
                }
                None => results.push(DispatchedCall {
                    result: ToolInvocationResult::error(call, "Error: tool call aborted"),
                    duration: Duration::ZERO,
                }),
            }
        }

        match outage {
            Some(e) => Err(e),
            None => Ok(results),
        }
    }
}

async fn dispatch_one(
    dispatcher: Arc<dyn ToolDispatcher>,
    permits: Arc<Semaphore>,
    call_timeout: Duration,
    call: &ToolCall,
) -> Result<DispatchedCall, ToolError> {
    let _permit = permits
        .acquire_owned()
        .await
        .map_err(|e| ToolError::DispatchUnavailable(e.to_string()))?;

    let start = Instant::now();
    let result = match tokio::time::timeout(call_timeout, dispatcher.dispatch(call)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e @ ToolError::DispatchUnavailable(_))) => return Err(e),
        Ok(Err(e)) => ToolInvocationResult::error(call, format!("Error: {e}")),
        Err(_elapsed) => {
            let timeout_ms = u64::try_from(call_timeout.as_millis()).unwrap_or(u64::MAX);
            debug!(tool = %call.name, call_id = %call.id, timeout_ms, "Tool call timed out");
            let e = ToolError::Timeout {
                tool_name: call.name.clone(),
                timeout_ms,
            };
            ToolInvocationResult::error(call, format!("Error: {e}"))
        }
    };

    Ok(DispatchedCall {
        result,
        duration: start.elapsed(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{ScriptedDispatcher, ToolBehavior};

    fn call(id: &str, name: &str) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: name.into(),
            arguments: "{}".into(),
        }
    }

    fn batch(dispatcher: ScriptedDispatcher, timeout: Duration) -> BatchDispatcher {
        BatchDispatcher::new(Arc::new(dispatcher), 4, timeout)
    }

    #[tokio::test(start_paused = true)]
    async fn results_keep_call_order() {
        let dispatcher = ScriptedDispatcher::new()
            .with("slow", ToolBehavior::Slow(Duration::from_secs(2), "slow done".into()))
            .with("fast", ToolBehavior::Text("fast done".into()));
        let results = batch(dispatcher, Duration::from_secs(30))
            .run(&[call("a", "slow"), call("b", "fast")])
            .await
            .unwrap();

        assert_eq!(results[0].result.call_id, "a");
        assert_eq!(results[0].result.output.content(), "slow done");
        assert_eq!(results[1].result.call_id, "b");
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fails_only_that_call() {
        let dispatcher = ScriptedDispatcher::new()
            .with("stuck", ToolBehavior::Slow(Duration::from_secs(600), "never".into()))
            .with("ok", ToolBehavior::Text("fine".into()));
        let results = batch(dispatcher, Duration::from_secs(5))
            .run(&[call("a", "stuck"), call("b", "ok")])
            .await
            .unwrap();

        assert!(!results[0].result.is_success());
        assert!(results[0].result.output.content().contains("timed out"));
        assert!(results[1].result.is_success());
    }

    #[tokio::test]
    async fn panic_becomes_failed_result() {
        let dispatcher = ScriptedDispatcher::new()
            .with("boom", ToolBehavior::Panic)
            .with("ok", ToolBehavior::Text("fine".into()));
        let results = batch(dispatcher, Duration::from_secs(5))
            .run(&[call("a", "boom"), call("b", "ok")])
            .await
            .unwrap();

        assert!(!results[0].result.is_success());
        assert!(results[1].result.is_success());
    }

    #[tokio::test]
    async fn outage_fails_batch_after_siblings_finish() {
        let dispatcher = Arc::new(
            ScriptedDispatcher::new()
                .with("down", ToolBehavior::Outage)
                .with("ok", ToolBehavior::Text("fine".into())),
        );
        let runner = BatchDispatcher::new(dispatcher.clone(), 4, Duration::from_secs(5));
        let err = runner
            .run(&[call("a", "down"), call("b", "ok")])
            .await
            .unwrap_err();

        assert!(matches!(err, ToolError::DispatchUnavailable(_)));
        assert_eq!(dispatcher.dispatched().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_is_bounded() {
        let dispatcher = ScriptedDispatcher::new()
            .with("slow", ToolBehavior::Slow(Duration::from_secs(1), "done".into()));
        let runner = BatchDispatcher::new(Arc::new(dispatcher), 2, Duration::from_secs(30));
        let calls: Vec<_> = (0..4).map(|i| call(&format!("c{i}"), "slow")).collect();

        let start = tokio::time::Instant::now();
        let results = runner.run(&calls).await.unwrap();
        assert_eq!(results.len(), 4);
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn empty_batch_is_empty() {
        let results = batch(ScriptedDispatcher::new(), Duration::from_secs(1))
            .run(&[])
            .await
            .unwrap();
        assert!(results.is_empty());
    }
}

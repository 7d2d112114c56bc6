//! Delta parser: raw SSE lines in, [`StreamDelta`]s out.
//!
//! Stateless. Sentinel lines, blank lines, SSE comments and non-data fields
//! are dropped. A line that fails to decode is logged and dropped; upstream
//! providers occasionally emit partial or corrupted frames, and one bad frame
//! must not cost the whole response.

use deltaflow_core::error::ProviderError;
use deltaflow_core::provider::RawEventFeed;
use futures::{Stream, StreamExt};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, trace};

use crate::delta::StreamDelta;

/// The termination sentinel sent as the final `data:` payload.
pub const DONE_SENTINEL: &str = "[DONE]";

/// SSE fields that carry no payload for us.
const IGNORED_FIELDS: [&str; 3] = ["event:", "id:", "retry:"];

/// Parse one raw line. Returns `None` for anything that is not a usable delta.
pub fn parse_line(line: &str) -> Option<StreamDelta> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return None;
    }
    if IGNORED_FIELDS.iter().any(|f| line.starts_with(f)) {
        return None;
    }

    // `data:` with or without a space; bare lines are treated as payloads
    // (NDJSON-style feeds).
    let payload = line.strip_prefix("data:").map(str::trim_start).unwrap_or(line);
    if payload == DONE_SENTINEL {
        trace!("Stream termination sentinel");
        return None;
    }

    match StreamDelta::decode(payload) {
        Ok(delta) if delta.is_empty() => None,
        Ok(delta) => Some(delta),
        Err(e) => {
            debug!(error = %e, payload = %payload, "Dropping malformed stream unit");
            None
        }
    }
}

/// Parse a batch of lines lazily.
pub fn parse_lines<'a, I>(lines: I) -> impl Iterator<Item = StreamDelta> + 'a
where
    I: IntoIterator<Item = &'a str>,
    I::IntoIter: 'a,
{
    lines.into_iter().filter_map(parse_line)
}

/// Adapt a provider's raw event feed into a stream of deltas.
///
/// Transport errors from the feed pass through unchanged; decoding problems
/// never surface as errors.
pub fn delta_stream(
    feed: RawEventFeed,
) -> impl Stream<Item = Result<StreamDelta, ProviderError>> + Send + Unpin {
    ReceiverStream::new(feed).filter_map(|item| {
        futures::future::ready(match item {
            Ok(line) => parse_line(&line).map(Ok),
            Err(e) => Some(Err(e)),
        })
    })
}

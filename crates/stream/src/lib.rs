//! Streaming pipeline for deltaflow.
//!
//! Raw event lines flow through three stages, leaf to root:
//!
//! 1. [`parser`]: lines → [`StreamDelta`]s (stateless, tolerant of bad frames)
//! 2. [`accumulator`]: deltas → one [`AccumulatedMessage`] per round
//! 3. [`buffer`]: response units → [`Decision`]s about what the caller sees
//!
//! The accumulator and buffer are synchronous reducers; the round loop in
//! `deltaflow-agent` drives them from its async stream consumer.

pub mod accumulator;
pub mod buffer;
pub mod delta;
pub mod parser;

pub use accumulator::{
    AccumulatedMessage, DeltaAccumulator, MAX_TOOL_CALL_INDEX, ToolCallFragment,
};
pub use buffer::{BufferState, Decision, Release, ResponseUnit};
pub use delta::{FinishReason, StreamDelta, ToolCallDelta};
pub use parser::{DONE_SENTINEL, delta_stream, parse_line, parse_lines};

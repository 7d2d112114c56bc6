//! The round loop of deltaflow.
//!
//! A user turn alternates between model calls and tool batches:
//!
//! 1. **Build history** (system prompt + trimmed memory + the user message)
//! 2. **Call the model**, streaming or complete, through the accumulator
//!    and the buffering engine
//! 3. **If tool calls**: dispatch the batch concurrently, fold every result
//!    into history in call order, loop back to step 2
//! 4. **If text**: release it to the caller and end the turn
//!
//! The loop also ends on a direct-output tool result, an exhausted round
//! budget, too many failed batches in a row, or an unrecoverable error.

pub mod context;
pub mod dispatch;
pub mod orchestrator;
mod round;
pub mod state;
pub mod stream_event;

#[cfg(test)]
mod test_helpers;

pub use context::RoundContext;
pub use dispatch::{BatchDispatcher, DispatchedCall};
pub use orchestrator::RoundLoop;
pub use state::{TurnReport, TurnState};
pub use stream_event::AgentStreamEvent;

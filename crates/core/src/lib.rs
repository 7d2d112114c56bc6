//! # deltaflow Core
//!
//! Domain types, traits, and error definitions for the deltaflow agent runtime.
//! This crate has **no transport dependencies** — it defines the domain model
//! that the stream, agent, memory and provider crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator of the round loop is a trait here:
//! - [`Provider`] — the model endpoint (complete or raw event feed)
//! - [`ToolDispatcher`] — the external tool registry
//! - [`ConversationMemory`] — history storage and context trimming
//!
//! Implementations live in their respective crates, and tests swap in
//! scripted stand-ins.

pub mod error;
pub mod event;
pub mod memory;
pub mod message;
pub mod provider;
pub mod token;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ErrorKind, ProtocolError, Result};
pub use event::{DomainEvent, EventBus};
pub use memory::ConversationMemory;
pub use message::{ConversationId, Message, MessageToolCall, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, RawEventFeed, ToolChoice};
pub use tool::{Tool, ToolCall, ToolDispatcher, ToolInvocationResult, ToolOutput, ToolRegistry};

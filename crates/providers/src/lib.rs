//! LLM provider implementations for deltaflow.
//!
//! All providers implement the `deltaflow_core::Provider` trait. Streaming
//! providers hand back raw SSE lines; `deltaflow-stream` decodes them.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;

//! Error types for the deltaflow domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant, and every error can be
//! classified into an [`ErrorKind`] before it is shown to a caller.

use thiserror::Error;

/// The top-level error type for all deltaflow operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Stream protocol errors ---
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    // --- Memory errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Budget errors ---
    #[error("Maximum rounds exceeded: {max_rounds} rounds used")]
    MaxRoundsExceeded { max_rounds: u32 },

    #[error("Tool calls failed in {streak} consecutive rounds")]
    ConsecutiveToolFailures { streak: u32 },

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an error, used to decide retry behavior and
/// how much detail the caller gets to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Timeouts, connection loss, upstream HTTP failures.
    Transport,
    /// Malformed stream content or unparseable tool arguments.
    Protocol,
    /// Dispatch failures or tool-reported errors.
    Tool,
    /// Round budget exhausted.
    Budget,
    /// Missing or invalid identifiers and settings.
    Configuration,
    /// Storage failures and anything else.
    Internal,
}

/// Message shown to callers in place of internal error details.
pub const GENERIC_ERROR_MESSAGE: &str = "The request could not be completed. Please try again.";

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Provider(ProviderError::NotConfigured(_))
            | Self::Provider(ProviderError::AuthenticationFailed(_))
            | Self::Provider(ProviderError::ModelNotFound(_)) => ErrorKind::Configuration,
            Self::Provider(_) => ErrorKind::Transport,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Tool(_) => ErrorKind::Tool,
            Self::MaxRoundsExceeded { .. } | Self::ConsecutiveToolFailures { .. } => {
                ErrorKind::Budget
            }
            Self::Config { .. } => ErrorKind::Configuration,
            Self::Memory(_) => ErrorKind::Internal,
        }
    }

    /// Whether retrying the same request could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transport | ErrorKind::Tool)
    }

    /// Whether the error's detail text is safe to show to an end user.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Budget | ErrorKind::Configuration | ErrorKind::Tool
        )
    }

    /// The text a caller should see: detail for user-facing errors,
    /// [`GENERIC_ERROR_MESSAGE`] for everything else.
    pub fn user_message(&self) -> String {
        if self.is_user_facing() {
            self.to_string()
        } else {
            GENERIC_ERROR_MESSAGE.to_string()
        }
    }

    /// Shorthand for a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Violations of the streaming protocol that survive parser-level tolerance.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Malformed stream unit: {0}")]
    MalformedUnit(String),

    #[error("Tool call #{index} ({name}) has invalid arguments: {reason}")]
    InvalidToolArguments {
        index: usize,
        name: String,
        reason: String,
    },

    #[error("Tool call #{index} is missing a function name")]
    MissingToolName { index: usize },

    #[error("Message requested before the stream signalled completion")]
    Incomplete,
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name} — {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_ms}ms")]
    Timeout { tool_name: String, timeout_ms: u64 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool dispatch unavailable: {0}")]
    DispatchUnavailable(String),
}

//! Turn state machine states and the report a finished turn produces.

use deltaflow_core::Error;

/// Where a turn is in the round loop.
///
/// `Running` and `AwaitingTools` alternate until one of the terminal states
/// is reached. Nothing is issued for a turn once it is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Running,
    AwaitingTools,
    TerminatedNormal,
    TerminatedDirectOutput,
    TerminatedMaxRounds,
    Failed,
}

impl TurnState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running | Self::AwaitingTools)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::AwaitingTools => "awaiting_tools",
            Self::TerminatedNormal => "terminated_normal",
            Self::TerminatedDirectOutput => "terminated_direct_output",
            Self::TerminatedMaxRounds => "terminated_max_rounds",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TurnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome of one user turn.
#[derive(Debug)]
pub struct TurnReport {
    /// Always terminal.
    pub state: TurnState,
    /// Final answer or direct output, when the turn produced one.
    pub output: Option<String>,
    /// The originating error for `TerminatedMaxRounds` and `Failed`.
    pub error: Option<Error>,
    /// Rounds advanced (batches with at least one successful tool call).
    pub rounds: u32,
    pub model_calls: u32,
    pub tool_calls_made: u32,
}

impl TurnReport {
    pub fn is_success(&self) -> bool {
        matches!(
            self.state,
            TurnState::TerminatedNormal | TurnState::TerminatedDirectOutput
        )
    }

    /// The text to show the caller: the output, or the classified error
    /// message.
    pub fn display_text(&self) -> String {
        match (&self.output, &self.error) {
            (Some(output), _) => output.clone(),
            (None, Some(error)) => error.user_message(),
            (None, None) => String::new(),
        }
    }

    /// Collapse into a plain result.
    pub fn into_result(self) -> deltaflow_core::Result<String> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.output.unwrap_or_default()),
        }
    }
}

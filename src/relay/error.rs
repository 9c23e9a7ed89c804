//! Relay failure taxonomy

use thiserror::Error;

/// Message used when a failed run carries no provider detail
pub const GENERIC_RUN_FAILURE: &str = "Run failed";

/// Everything that can end a relay request early
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Assistant provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("Invalid thread: {0}")]
    InvalidThread(String),
    #[error("Unknown tool call function: {0}")]
    UnknownToolFunction(String),
    #[error("Malformed arguments for tool call {function}: {reason}")]
    MalformedToolArguments { function: String, reason: String },
    #[error("Tool {function} failed: {reason}")]
    ToolFailed { function: String, reason: String },
    #[error("Run requires an unsupported action")]
    UnsupportedAction,
    /// Provider-reported failure; displays the provider's message verbatim
    #[error("{0}")]
    RunFailed(String),
    #[error("Malformed assistant content: {0}")]
    MalformedContent(String),
    #[error("Run did not finish within {0} seconds")]
    RunTimeout(u64),
    #[error("Run requested tool outputs more than {0} times")]
    ActionLoopExceeded(u32),
    #[error("Thread {0} already has an active run")]
    ThreadBusy(String),
    #[error("Client disconnected")]
    ClientDisconnected,
}

impl RelayError {
    /// Stable name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::Configuration(_) => "configuration_error",
            Self::ProviderUnavailable(_) => "provider_unavailable",
            Self::InvalidThread(_) => "invalid_thread",
            Self::UnknownToolFunction(_) => "unknown_tool_function",
            Self::MalformedToolArguments { .. } => "malformed_tool_arguments",
            Self::ToolFailed { .. } => "tool_failed",
            Self::UnsupportedAction => "unsupported_action",
            Self::RunFailed(_) => "run_failed",
            Self::MalformedContent(_) => "malformed_content",
            Self::RunTimeout(_) => "run_timeout",
            Self::ActionLoopExceeded(_) => "action_loop_exceeded",
            Self::ThreadBusy(_) => "thread_busy",
            Self::ClientDisconnected => "client_disconnected",
        }
    }
}

//! Streaming relay core
//!
//! Bridges one browser turn onto a provider run: thread resolution, event
//! translation, tool-call rounds and terminal reporting. The fallback
//! poller shares the same provider client and content extraction.

mod content;
mod error;
mod poller;
mod session;
mod tools;
mod translator;

#[cfg(test)]
pub mod testing;

pub use error::RelayError;
pub use poller::StatusReport;
pub use session::RelayService;
pub use tools::ToolRegistry;

use crate::assistant::RunStatus;
use serde::Serialize;

/// One chat turn as submitted by the browser
#[derive(Debug, Clone)]
pub struct ChatInput {
    /// Thread to continue; `None` starts a new conversation
    pub thread_id: Option<String>,
    pub message: String,
}

/// Identifiers reported before any text
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    pub thread_id: String,
    /// Id of the user message that started the turn
    pub message_id: String,
}

/// Terminal outcome of a session that did not error
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayResult {
    pub thread_id: String,
    pub message_id: String,
    pub run_id: Option<String>,
    #[serde(rename = "status")]
    pub final_status: Option<RunStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Ordered output of a session: `Metadata`, any number of `Text`, then
/// exactly one of `Done` or `Error`.
#[derive(Debug, Clone)]
pub enum RelayFrame {
    Metadata(SessionMetadata),
    Text(String),
    Done(RelayResult),
    Error(String),
}

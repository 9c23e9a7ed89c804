//! Wire types for the hosted assistant API

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Provider-side conversation container
#[derive(Debug, Clone, Deserialize)]
pub struct Thread {
    pub id: String,
}

/// Message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

/// A message appended to a thread.
///
/// `content` stays untyped: the provider sends an array of typed parts,
/// and the two consumers disagree on what to do when it isn't one.
#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    #[serde(default)]
    pub content: Value,
}

/// One page of `GET /threads/{id}/messages`
#[derive(Debug, Clone, Deserialize)]
pub struct MessageList {
    pub data: Vec<Message>,
}

/// Run lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Cancelled,
    Failed,
    Completed,
    Incomplete,
    Expired,
    #[serde(other)]
    Unknown,
}

impl RunStatus {
    /// Statuses after which the provider will not change the run again
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::Failed | Self::Completed | Self::Incomplete | Self::Expired
        )
    }

    /// Still being worked on by the provider
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Queued | Self::InProgress)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::RequiresAction => "requires_action",
            Self::Cancelling => "cancelling",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
            Self::Completed => "completed",
            Self::Incomplete => "incomplete",
            Self::Expired => "expired",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single execution of the assistant against a thread
#[derive(Debug, Clone, Deserialize)]
pub struct Run {
    pub id: String,
    pub thread_id: String,
    pub status: RunStatus,
    #[serde(default)]
    pub required_action: Option<RequiredAction>,
    #[serde(default)]
    pub last_error: Option<RunError>,
}

impl Run {
    /// Tool calls awaiting output, if the run is paused on `submit_tool_outputs`
    pub fn pending_tool_calls(&self) -> Option<&[ToolCall]> {
        match &self.required_action {
            Some(RequiredAction::SubmitToolOutputs { submit_tool_outputs }) => {
                Some(&submit_tool_outputs.tool_calls)
            }
            _ => None,
        }
    }
}

/// Error detail attached to a failed run
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Action the caller must take before the run can continue
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequiredAction {
    SubmitToolOutputs {
        submit_tool_outputs: SubmitToolOutputs,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitToolOutputs {
    pub tool_calls: Vec<ToolCall>,
}

/// Function invocation requested by the assistant
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments, as produced by the model
    pub arguments: String,
}

/// Output for one tool call, keyed by its id
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolOutput {
    pub tool_call_id: String,
    pub output: String,
}

/// Incremental message content delivered while a run streams
#[derive(Debug, Clone, Deserialize)]
pub struct MessageDelta {
    #[serde(default)]
    pub id: String,
    pub delta: MessageDeltaBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageDeltaBody {
    #[serde(default)]
    pub content: Value,
}

/// Error object sent by the provider as an `error` stream event
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderError {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
}

/// Envelope used by non-2xx JSON responses
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorEnvelope {
    pub error: ProviderError,
}

/// One decoded event from a run stream
#[derive(Debug, Clone)]
pub enum AssistantEvent {
    /// Any `thread.run.*` event; carries the full run snapshot
    Run(Run),
    /// `thread.message.delta`
    MessageDelta(MessageDelta),
    /// `error`
    Error(ProviderError),
    /// `done`
    Done,
    /// Run steps, message lifecycle and anything unrecognised
    Ignored(String),
}

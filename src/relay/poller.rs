//! Fallback status poller
//!
//! Stateless single-shot check of a run; the caller decides the cadence.
//! Unlike the streaming path, unreadable assistant content degrades to a
//! fixed apology instead of failing the request.

use super::content::text_content;
use super::error::RelayError;
use crate::assistant::{AssistantApi, AssistantError, MessageRole, RunStatus};
use serde::Serialize;

/// Reply used when a completed run has no readable assistant answer
pub const APOLOGY: &str = "I apologize, but I couldn't process your request properly.";

/// Result of one status poll
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub status: RunStatus,
    pub completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<PolledMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Final assistant answer extracted from a completed run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolledMessage {
    pub role: MessageRole,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl PolledMessage {
    fn apology(id: Option<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: APOLOGY.to_string(),
            id,
        }
    }
}

pub async fn poll_status(
    api: &dyn AssistantApi,
    thread_id: &str,
    run_id: &str,
) -> Result<StatusReport, RelayError> {
    let run = api
        .poll_run_status(thread_id, run_id)
        .await
        .map_err(|e| lookup_error(thread_id, run_id, e))?;

    if run.status.is_pending() {
        return Ok(StatusReport {
            status: run.status,
            completed: false,
            message: None,
            error: None,
        });
    }

    if run.status != RunStatus::Completed {
        tracing::warn!(thread_id = %thread_id, run_id = %run_id, status = %run.status, "Polled run did not complete");
        return Ok(StatusReport {
            status: run.status,
            completed: true,
            message: None,
            error: Some(format!("Run ended with status: {}", run.status)),
        });
    }

    let messages = api
        .list_messages(thread_id)
        .await
        .map_err(|e| lookup_error(thread_id, run_id, e))?;

    let message = match messages.into_iter().find(|m| m.role == MessageRole::Assistant) {
        None => {
            tracing::warn!(thread_id = %thread_id, run_id = %run_id, "Completed run has no assistant message");
            PolledMessage::apology(None)
        }
        Some(m) => match text_content(&m.content) {
            Ok(content) => PolledMessage {
                role: MessageRole::Assistant,
                content,
                id: Some(m.id),
            },
            Err(e) => {
                tracing::warn!(thread_id = %thread_id, message_id = %m.id, error = %e, "Unreadable assistant message");
                PolledMessage::apology(Some(m.id))
            }
        },
    };

    Ok(StatusReport {
        status: run.status,
        completed: true,
        message: Some(message),
        error: None,
    })
}

fn lookup_error(thread_id: &str, run_id: &str, e: AssistantError) -> RelayError {
    tracing::error!(thread_id = %thread_id, run_id = %run_id, error = %e, kind = ?e.kind, "Status poll failed");
    if e.kind.is_rejection() {
        RelayError::InvalidThread(e.message)
    } else {
        RelayError::ProviderUnavailable(e.message)
    }
}

//! Remote assistant provider client
//!
//! Typed wrapper over the hosted assistant API: threads, messages, and runs
//! that stream their progress as server-sent events.

mod client;
mod error;
mod sse;
mod types;

pub use client::OpenAIAssistantClient;
pub use error::{AssistantError, AssistantErrorKind};
pub use types::*;

use async_trait::async_trait;
use futures::stream::Stream;
use std::pin::Pin;
use std::sync::Arc;

/// Ordered stream of decoded run events. Dropping it releases the connection.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<AssistantEvent, AssistantError>> + Send>>;

/// Operations the relay needs from the provider
#[async_trait]
pub trait AssistantApi: Send + Sync {
    /// Create an empty thread
    async fn create_thread(&self) -> Result<Thread, AssistantError>;

    /// Append a message to a thread
    async fn post_message(
        &self,
        thread_id: &str,
        role: MessageRole,
        content: &str,
    ) -> Result<Message, AssistantError>;

    /// Start a run on a thread and stream its events
    async fn start_run_stream(
        &self,
        thread_id: &str,
        assistant_id: &str,
    ) -> Result<EventStream, AssistantError>;

    /// Resume a run paused in `requires_action`
    async fn submit_tool_outputs_stream(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<EventStream, AssistantError>;

    /// Single-shot read of a run
    async fn poll_run_status(&self, thread_id: &str, run_id: &str) -> Result<Run, AssistantError>;

    /// Messages on a thread, newest first
    async fn list_messages(&self, thread_id: &str) -> Result<Vec<Message>, AssistantError>;
}

#[async_trait]
impl<T: AssistantApi + ?Sized> AssistantApi for Arc<T> {
    async fn create_thread(&self) -> Result<Thread, AssistantError> {
        (**self).create_thread().await
    }

    async fn post_message(
        &self,
        thread_id: &str,
        role: MessageRole,
        content: &str,
    ) -> Result<Message, AssistantError> {
        (**self).post_message(thread_id, role, content).await
    }

    async fn start_run_stream(
        &self,
        thread_id: &str,
        assistant_id: &str,
    ) -> Result<EventStream, AssistantError> {
        (**self).start_run_stream(thread_id, assistant_id).await
    }

    async fn submit_tool_outputs_stream(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<EventStream, AssistantError> {
        (**self)
            .submit_tool_outputs_stream(thread_id, run_id, outputs)
            .await
    }

    async fn poll_run_status(&self, thread_id: &str, run_id: &str) -> Result<Run, AssistantError> {
        (**self).poll_run_status(thread_id, run_id).await
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<Message>, AssistantError> {
        (**self).list_messages(thread_id).await
    }
}

//! Run event translator
//!
//! Consumes one provider event stream and turns it into outbound text
//! frames, remembering the last run snapshot it saw.

use super::content::text_content;
use super::error::RelayError;
use super::RelayFrame;
use crate::assistant::{AssistantError, AssistantErrorKind, AssistantEvent, EventStream, Run};
use futures::StreamExt;
use tokio::sync::mpsc;

/// Forwards text deltas to the outbound channel in arrival order
pub struct RunTranslator {
    outbound: mpsc::Sender<RelayFrame>,
}

impl RunTranslator {
    pub fn new(outbound: mpsc::Sender<RelayFrame>) -> Self {
        Self { outbound }
    }

    /// Drive `events` to completion.
    ///
    /// Returns the last run snapshot, or `None` if the stream never reported
    /// one. The stream is dropped on every return path; a closed outbound
    /// channel stops reading immediately.
    pub async fn forward(&self, mut events: EventStream) -> Result<Option<Run>, RelayError> {
        let mut run: Option<Run> = None;

        loop {
            let next = tokio::select! {
                biased;
                () = self.outbound.closed() => return Err(RelayError::ClientDisconnected),
                next = events.next() => next,
            };

            let Some(event) = next else { break };

            match event.map_err(stream_error)? {
                AssistantEvent::Run(snapshot) => {
                    if run.as_ref().map(|r| r.status) != Some(snapshot.status) {
                        tracing::debug!(
                            thread_id = %snapshot.thread_id,
                            run_id = %snapshot.id,
                            status = %snapshot.status,
                            "Run status changed"
                        );
                    }
                    run = Some(snapshot);
                }
                AssistantEvent::MessageDelta(delta) => {
                    let text = text_content(&delta.delta.content)?;
                    if !text.is_empty() {
                        tracing::trace!(message_id = %delta.id, bytes = text.len(), "Forwarding text delta");
                        self.outbound
                            .send(RelayFrame::Text(text))
                            .await
                            .map_err(|_| RelayError::ClientDisconnected)?;
                    }
                }
                AssistantEvent::Error(error) => {
                    tracing::warn!(
                        run_id = run.as_ref().map(|r| r.id.as_str()),
                        code = error.code.as_deref(),
                        error = %error.message,
                        "Provider reported a stream error"
                    );
                    return Err(RelayError::ProviderUnavailable(error.message));
                }
                AssistantEvent::Done => break,
                AssistantEvent::Ignored(_) => {}
            }
        }

        Ok(run)
    }
}

fn stream_error(e: AssistantError) -> RelayError {
    match e.kind {
        AssistantErrorKind::Decode => RelayError::MalformedContent(e.message),
        _ => RelayError::ProviderUnavailable(e.message),
    }
}

//! Relay session controller
//!
//! One user turn end-to-end: resolve the thread, post the message, start
//! the run, then alternate between streaming and tool resolution until the
//! run reaches a terminal status.

use super::error::{RelayError, GENERIC_RUN_FAILURE};
use super::poller::{poll_status, StatusReport};
use super::tools::ToolRegistry;
use super::translator::RunTranslator;
use super::{ChatInput, RelayFrame, RelayResult, SessionMetadata};
use crate::assistant::{AssistantApi, AssistantError, EventStream, MessageRole, Run, RunStatus};
use crate::config::RelayLimits;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Outbound frames buffered between the relay task and the HTTP body
const FRAME_BUFFER: usize = 4;

/// An opened session: metadata plus the ordered frame stream
#[derive(Debug)]
pub struct RelaySession {
    pub metadata: SessionMetadata,
    /// Starts with [`RelayFrame::Metadata`] and ends with `Done` or `Error`
    pub frames: mpsc::Receiver<RelayFrame>,
}

/// Entry point for chat turns and status polls
pub struct RelayService {
    api: Arc<dyn AssistantApi>,
    tools: ToolRegistry,
    assistant_id: Option<String>,
    limits: RelayLimits,
    active_threads: Arc<Mutex<HashSet<String>>>,
}

impl RelayService {
    pub fn new(
        api: Arc<dyn AssistantApi>,
        tools: ToolRegistry,
        assistant_id: Option<String>,
        limits: RelayLimits,
    ) -> Self {
        Self {
            api,
            tools,
            assistant_id,
            limits,
            active_threads: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Open a session for one user turn.
    ///
    /// Everything up to and including the run start happens here, so those
    /// failures reach the caller before any frame is produced. Streaming then
    /// continues on a spawned task feeding the returned receiver. One
    /// deadline of `run_timeout` covers both parts.
    pub async fn open(&self, input: ChatInput) -> Result<RelaySession, RelayError> {
        if input.message.trim().is_empty() {
            return Err(RelayError::InvalidInput("message must not be empty".to_string()));
        }

        let assistant_id = self
            .assistant_id
            .clone()
            .ok_or_else(|| RelayError::Configuration("ASSISTANT_ID is not set".to_string()))?;

        let timeout = self.limits.run_timeout;
        let deadline = Instant::now() + timeout;
        let turn = tokio::time::timeout_at(deadline, self.start_turn(&assistant_id, input))
            .await
            .map_err(|_| {
                tracing::error!(timeout_secs = timeout.as_secs(), "Provider did not start the run in time");
                RelayError::RunTimeout(timeout.as_secs())
            })??;

        let (tx, rx) = mpsc::channel(FRAME_BUFFER);
        tx.send(RelayFrame::Metadata(turn.metadata.clone()))
            .await
            .map_err(|_| RelayError::ClientDisconnected)?;

        let driver = SessionDriver {
            api: self.api.clone(),
            tools: self.tools.clone(),
            limits: self.limits,
            deadline,
            metadata: turn.metadata.clone(),
            outbound: tx,
            last_run: None,
            _guard: turn.guard,
        };
        tokio::spawn(driver.run(turn.events));

        Ok(RelaySession {
            metadata: turn.metadata,
            frames: rx,
        })
    }

    /// Resolve the thread, claim it, post the message and start the run
    async fn start_turn(&self, assistant_id: &str, input: ChatInput) -> Result<StartedTurn, RelayError> {
        let thread_id = match input.thread_id.filter(|id| !id.trim().is_empty()) {
            Some(id) => id,
            None => {
                let thread = self.api.create_thread().await.map_err(|e| {
                    tracing::error!(error = %e, kind = ?e.kind, "Failed to create thread");
                    RelayError::ProviderUnavailable(e.message)
                })?;
                tracing::info!(thread_id = %thread.id, "Created thread");
                thread.id
            }
        };

        let guard = ActiveThreadGuard::acquire(&self.active_threads, &thread_id)?;

        let message = self
            .api
            .post_message(&thread_id, MessageRole::User, &input.message)
            .await
            .map_err(|e| {
                tracing::error!(thread_id = %thread_id, error = %e, kind = ?e.kind, "Failed to post message");
                thread_error(e)
            })?;

        let events = self
            .api
            .start_run_stream(&thread_id, assistant_id)
            .await
            .map_err(|e| {
                tracing::error!(thread_id = %thread_id, error = %e, kind = ?e.kind, "Failed to start run");
                thread_error(e)
            })?;

        Ok(StartedTurn {
            metadata: SessionMetadata {
                thread_id,
                message_id: message.id,
            },
            guard,
            events,
        })
    }

    /// Non-streaming status check for a run
    pub async fn poll(&self, thread_id: &str, run_id: &str) -> Result<StatusReport, RelayError> {
        poll_status(self.api.as_ref(), thread_id, run_id).await
    }
}

/// Rejected references are the caller's fault; anything else is the provider's
fn thread_error(e: AssistantError) -> RelayError {
    if e.kind.is_rejection() {
        RelayError::InvalidThread(e.message)
    } else {
        RelayError::ProviderUnavailable(e.message)
    }
}

/// A thread claimed for this turn with its run stream open
struct StartedTurn {
    metadata: SessionMetadata,
    guard: ActiveThreadGuard,
    events: EventStream,
}

/// Control state of a running session
enum Phase {
    Streaming(EventStream),
    ResolvingTools(Run),
    Finished(Run),
}

struct SessionDriver {
    api: Arc<dyn AssistantApi>,
    tools: ToolRegistry,
    limits: RelayLimits,
    /// Shared with the run start in `open`
    deadline: Instant,
    metadata: SessionMetadata,
    outbound: mpsc::Sender<RelayFrame>,
    /// Id and status of the most recent run snapshot, for logging
    last_run: Option<(String, RunStatus)>,
    _guard: ActiveThreadGuard,
}

impl SessionDriver {
    async fn run(mut self, events: EventStream) {
        let timeout = self.limits.run_timeout;
        let outcome = match tokio::time::timeout_at(self.deadline, self.drive(events)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(RelayError::RunTimeout(timeout.as_secs())),
        };

        let (run_id, status) = match &self.last_run {
            Some((id, status)) => (Some(id.clone()), Some(*status)),
            None => (None, None),
        };

        match outcome {
            Ok(run) => {
                let error_message = (run.status != RunStatus::Completed).then(|| {
                    tracing::warn!(
                        thread_id = %self.metadata.thread_id,
                        run_id = %run.id,
                        status = %run.status,
                        "Run ended without completing"
                    );
                    format!("Run ended with status: {}", run.status)
                });
                tracing::info!(
                    thread_id = %self.metadata.thread_id,
                    run_id = %run.id,
                    status = %run.status,
                    "Relay session finished"
                );
                let result = RelayResult {
                    thread_id: self.metadata.thread_id.clone(),
                    message_id: self.metadata.message_id.clone(),
                    run_id: Some(run.id),
                    final_status: Some(run.status),
                    error_message,
                };
                let _ = self.outbound.send(RelayFrame::Done(result)).await;
            }
            Err(RelayError::ClientDisconnected) => {
                tracing::info!(
                    thread_id = %self.metadata.thread_id,
                    run_id = run_id.as_deref(),
                    "Client disconnected, relay stopped"
                );
            }
            Err(e) => {
                tracing::error!(
                    thread_id = %self.metadata.thread_id,
                    run_id = run_id.as_deref(),
                    status = status.map(RunStatus::as_str),
                    kind = e.kind(),
                    error = %e,
                    "Relay session failed"
                );
                let _ = self.outbound.send(RelayFrame::Error(e.to_string())).await;
            }
        }
    }

    async fn drive(&mut self, events: EventStream) -> Result<Run, RelayError> {
        let translator = RunTranslator::new(self.outbound.clone());
        let mut phase = Phase::Streaming(events);
        let mut action_rounds = 0u32;

        loop {
            phase = match phase {
                Phase::Streaming(events) => {
                    let run = translator.forward(events).await?.ok_or_else(|| {
                        RelayError::ProviderUnavailable(
                            "event stream ended before a run was reported".to_string(),
                        )
                    })?;
                    self.last_run = Some((run.id.clone(), run.status));

                    match run.status {
                        RunStatus::RequiresAction => Phase::ResolvingTools(run),
                        status if status.is_terminal() => Phase::Finished(run),
                        status => {
                            return Err(RelayError::ProviderUnavailable(format!(
                                "event stream ended while run was {status}"
                            )))
                        }
                    }
                }
                Phase::ResolvingTools(run) => {
                    action_rounds += 1;
                    if action_rounds > self.limits.max_action_rounds {
                        return Err(RelayError::ActionLoopExceeded(self.limits.max_action_rounds));
                    }

                    let calls = run.pending_tool_calls().ok_or(RelayError::UnsupportedAction)?;
                    tracing::info!(
                        thread_id = %self.metadata.thread_id,
                        run_id = %run.id,
                        tool_calls = calls.len(),
                        round = action_rounds,
                        "Run requires tool outputs"
                    );

                    let outputs = self.tools.resolve(calls).await?;
                    let events = self
                        .api
                        .submit_tool_outputs_stream(&self.metadata.thread_id, &run.id, &outputs)
                        .await
                        .map_err(|e| RelayError::ProviderUnavailable(e.message))?;
                    Phase::Streaming(events)
                }
                Phase::Finished(run) => {
                    if run.status == RunStatus::Failed {
                        let last_error = run.last_error.unwrap_or_default();
                        tracing::warn!(
                            thread_id = %self.metadata.thread_id,
                            run_id = %run.id,
                            code = last_error.code.as_deref(),
                            "Provider reported run failure"
                        );
                        let message = last_error
                            .message
                            .filter(|m| !m.is_empty())
                            .unwrap_or_else(|| GENERIC_RUN_FAILURE.to_string());
                        return Err(RelayError::RunFailed(message));
                    }
                    return Ok(run);
                }
            };
        }
    }
}

/// Marks a thread as having an open session in this process until dropped
struct ActiveThreadGuard {
    threads: Arc<Mutex<HashSet<String>>>,
    thread_id: String,
}

impl ActiveThreadGuard {
    fn acquire(threads: &Arc<Mutex<HashSet<String>>>, thread_id: &str) -> Result<Self, RelayError> {
        let inserted = threads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(thread_id.to_string());
        if !inserted {
            tracing::warn!(thread_id = %thread_id, "Rejected concurrent session on thread");
            return Err(RelayError::ThreadBusy(thread_id.to_string()));
        }
        Ok(Self {
            threads: threads.clone(),
            thread_id: thread_id.to_string(),
        })
    }
}

impl Drop for ActiveThreadGuard {
    fn drop(&mut self) {
        self.threads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.thread_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::AssistantErrorKind;
    use crate::relay::testing::{
        delta_event, failed_run_event, requires_action_event, run_event, tool_call, ApiCall,
        EchoTool, MockAssistant,
    };
    use std::time::Duration;

    fn service(mock: &Arc<MockAssistant>) -> RelayService {
        service_with(mock, ToolRegistry::new(), RelayLimits::default())
    }

    fn service_with(mock: &Arc<MockAssistant>, tools: ToolRegistry, limits: RelayLimits) -> RelayService {
        RelayService::new(mock.clone(), tools, Some("asst_test".to_string()), limits)
    }

    fn input(thread_id: Option<&str>, message: &str) -> ChatInput {
        ChatInput {
            thread_id: thread_id.map(str::to_string),
            message: message.to_string(),
        }
    }

    async fn collect(mut session: RelaySession) -> Vec<RelayFrame> {
        let mut frames = Vec::new();
        while let Some(frame) = session.frames.recv().await {
            frames.push(frame);
        }
        frames
    }

    fn texts(frames: &[RelayFrame]) -> Vec<&str> {
        frames
            .iter()
            .filter_map(|f| match f {
                RelayFrame::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    fn completed_turn(mock: &MockAssistant) {
        mock.queue_run(vec![
            run_event("run_1", RunStatus::Queued),
            run_event("run_1", RunStatus::InProgress),
            delta_event("Hel"),
            delta_event("lo"),
            run_event("run_1", RunStatus::Completed),
        ]);
    }

    #[tokio::test]
    async fn new_thread_is_created_once_and_reported_first() {
        let mock = Arc::new(MockAssistant::new());
        completed_turn(&mock);

        let session = service(&mock).open(input(None, "Hi")).await.unwrap();
        assert_eq!(session.metadata.thread_id, "thread_1");
        let frames = collect(session).await;

        match &frames[0] {
            RelayFrame::Metadata(meta) => {
                assert_eq!(meta.thread_id, "thread_1");
                assert_eq!(meta.message_id, "msg_user_1");
            }
            other => panic!("expected metadata first, got {other:?}"),
        }
        assert_eq!(mock.count(|c| matches!(c, ApiCall::CreateThread)), 1);
    }

    #[tokio::test]
    async fn existing_thread_is_reused() {
        let mock = Arc::new(MockAssistant::new());
        completed_turn(&mock);

        let session = service(&mock)
            .open(input(Some("thread_existing"), "Hello again"))
            .await
            .unwrap();
        collect(session).await;

        assert_eq!(mock.count(|c| matches!(c, ApiCall::CreateThread)), 0);
        assert!(mock.calls().contains(&ApiCall::PostMessage {
            thread_id: "thread_existing".to_string(),
            content: "Hello again".to_string(),
        }));
    }

    #[tokio::test]
    async fn missing_assistant_id_fails_before_any_provider_call() {
        let mock = Arc::new(MockAssistant::new());
        let service = RelayService::new(mock.clone(), ToolRegistry::new(), None, RelayLimits::default());

        let err = service.open(input(None, "Hi")).await.unwrap_err();
        assert!(matches!(err, RelayError::Configuration(_)));
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn empty_message_is_rejected() {
        let mock = Arc::new(MockAssistant::new());
        let err = service(&mock).open(input(None, "   ")).await.unwrap_err();
        assert!(matches!(err, RelayError::InvalidInput(_)));
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn deltas_stream_in_order_and_session_completes() {
        let mock = Arc::new(MockAssistant::new());
        completed_turn(&mock);

        let frames = collect(service(&mock).open(input(None, "Hi")).await.unwrap()).await;

        assert_eq!(texts(&frames), vec!["Hel", "lo"]);
        match frames.last() {
            Some(RelayFrame::Done(result)) => {
                assert_eq!(result.final_status, Some(RunStatus::Completed));
                assert_eq!(result.run_id.as_deref(), Some("run_1"));
                assert!(result.error_message.is_none());
            }
            other => panic!("expected done frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_tool_aborts_without_submitting() {
        let mock = Arc::new(MockAssistant::new());
        mock.queue_run(vec![
            run_event("run_1", RunStatus::Queued),
            requires_action_event("run_1", vec![tool_call("call_1", "lookup", "{}")]),
        ]);

        let frames = collect(service(&mock).open(input(None, "Find it")).await.unwrap()).await;

        match frames.last() {
            Some(RelayFrame::Error(message)) => {
                assert_eq!(message, "Unknown tool call function: lookup");
            }
            other => panic!("expected error frame, got {other:?}"),
        }
        assert_eq!(mock.count(|c| matches!(c, ApiCall::SubmitToolOutputs { .. })), 0);
    }

    #[tokio::test]
    async fn failed_run_reports_provider_message() {
        let mock = Arc::new(MockAssistant::new());
        mock.queue_run(vec![
            run_event("run_1", RunStatus::InProgress),
            failed_run_event("run_1", Some("rate limited")),
        ]);

        let frames = collect(service(&mock).open(input(None, "Hi")).await.unwrap()).await;
        assert!(matches!(frames.last(), Some(RelayFrame::Error(m)) if m == "rate limited"));
    }

    #[tokio::test]
    async fn failed_run_without_detail_uses_generic_message() {
        let mock = Arc::new(MockAssistant::new());
        mock.queue_run(vec![failed_run_event("run_1", None)]);

        let frames = collect(service(&mock).open(input(None, "Hi")).await.unwrap()).await;
        assert!(matches!(frames.last(), Some(RelayFrame::Error(m)) if m == GENERIC_RUN_FAILURE));
    }

    #[tokio::test]
    async fn cancelled_run_finalizes_normally() {
        let mock = Arc::new(MockAssistant::new());
        mock.queue_run(vec![run_event("run_1", RunStatus::Cancelled)]);

        let frames = collect(service(&mock).open(input(None, "Hi")).await.unwrap()).await;
        assert!(matches!(
            frames.last(),
            Some(RelayFrame::Done(r))
                if r.final_status == Some(RunStatus::Cancelled)
                    && r.error_message.as_deref() == Some("Run ended with status: cancelled")
        ));
    }

    #[tokio::test]
    async fn registered_tool_outputs_are_submitted_and_streaming_resumes() {
        let mock = Arc::new(MockAssistant::new());
        mock.queue_run(vec![
            delta_event("Let me check. "),
            requires_action_event("run_1", vec![tool_call("call_1", "echo", r#"{"q":1}"#)]),
        ]);
        mock.queue_resume(vec![
            run_event("run_1", RunStatus::InProgress),
            delta_event("Found it."),
            run_event("run_1", RunStatus::Completed),
        ]);

        let mut tools = ToolRegistry::new();
        tools.register("echo", Arc::new(EchoTool));

        let frames = collect(
            service_with(&mock, tools, RelayLimits::default())
                .open(input(None, "Look it up"))
                .await
                .unwrap(),
        )
        .await;

        assert_eq!(texts(&frames), vec!["Let me check. ", "Found it."]);
        assert!(matches!(frames.last(), Some(RelayFrame::Done(_))));
        assert!(mock.calls().iter().any(|c| matches!(
            c,
            ApiCall::SubmitToolOutputs { run_id, outputs, .. }
                if run_id == "run_1" && outputs.len() == 1 && outputs[0].tool_call_id == "call_1"
        )));
    }

    #[tokio::test]
    async fn endless_action_loop_is_bounded() {
        let mock = Arc::new(MockAssistant::new());
        let pause = || requires_action_event("run_1", vec![tool_call("call_1", "echo", "{}")]);
        mock.queue_run(vec![pause()]);
        mock.queue_resume(vec![pause()]);
        mock.queue_resume(vec![pause()]);

        let mut tools = ToolRegistry::new();
        tools.register("echo", Arc::new(EchoTool));
        let limits = RelayLimits {
            max_action_rounds: 2,
            ..RelayLimits::default()
        };

        let frames = collect(service_with(&mock, tools, limits).open(input(None, "loop")).await.unwrap()).await;

        assert!(matches!(
            frames.last(),
            Some(RelayFrame::Error(m)) if m == &RelayError::ActionLoopExceeded(2).to_string()
        ));
        assert_eq!(mock.count(|c| matches!(c, ApiCall::SubmitToolOutputs { .. })), 2);
    }

    #[tokio::test]
    async fn stalled_run_times_out_and_releases_stream() {
        let mock = Arc::new(MockAssistant::new());
        let flag = mock.queue_pending_run();
        let limits = RelayLimits {
            run_timeout: Duration::from_millis(50),
            ..RelayLimits::default()
        };

        let frames = collect(
            service_with(&mock, ToolRegistry::new(), limits)
                .open(input(None, "Hi"))
                .await
                .unwrap(),
        )
        .await;

        assert!(matches!(frames.last(), Some(RelayFrame::Error(m)) if m.contains("did not finish")));
        assert!(flag.dropped());
    }

    #[tokio::test]
    async fn run_start_that_never_answers_times_out_and_frees_thread() {
        let mock = Arc::new(MockAssistant::new());
        mock.stall_next_run_start();
        let limits = RelayLimits {
            run_timeout: Duration::from_millis(50),
            ..RelayLimits::default()
        };
        let relay = service_with(&mock, ToolRegistry::new(), limits);

        let err = relay.open(input(Some("thread_a"), "Hi")).await.unwrap_err();
        assert!(matches!(err, RelayError::RunTimeout(_)));

        completed_turn(&mock);
        let frames = collect(relay.open(input(Some("thread_a"), "Again")).await.unwrap()).await;
        assert_eq!(texts(&frames), vec!["Hel", "lo"]);
        assert!(matches!(frames.last(), Some(RelayFrame::Done(_))));
    }

    #[tokio::test]
    async fn stream_ending_mid_run_is_an_error() {
        let mock = Arc::new(MockAssistant::new());
        mock.queue_run(vec![run_event("run_1", RunStatus::InProgress), delta_event("partial")]);

        let frames = collect(service(&mock).open(input(None, "Hi")).await.unwrap()).await;
        assert_eq!(texts(&frames), vec!["partial"]);
        assert!(matches!(frames.last(), Some(RelayFrame::Error(m)) if m.contains("in_progress")));
    }

    #[tokio::test]
    async fn unknown_thread_maps_to_invalid_thread() {
        let mock = Arc::new(MockAssistant::new());
        mock.fail_post_message(AssistantError::not_found("No thread found with id 'nope'."));

        let err = service(&mock).open(input(Some("nope"), "Hi")).await.unwrap_err();
        assert!(matches!(err, RelayError::InvalidThread(_)));
        assert_eq!(mock.count(|c| matches!(c, ApiCall::StartRun { .. })), 0);
    }

    #[tokio::test]
    async fn thread_creation_failure_is_provider_unavailable() {
        let mock = Arc::new(MockAssistant::new());
        mock.fail_create_thread(AssistantError::new(AssistantErrorKind::Network, "connection refused"));

        let err = service(&mock).open(input(None, "Hi")).await.unwrap_err();
        assert!(matches!(err, RelayError::ProviderUnavailable(_)));
    }

    #[tokio::test]
    async fn concurrent_session_on_same_thread_is_rejected_until_finished() {
        let mock = Arc::new(MockAssistant::new());
        let flag = mock.queue_pending_run();
        completed_turn(&mock);
        let service = service(&mock);

        let first = service.open(input(Some("thread_busy"), "one")).await.unwrap();
        let err = service.open(input(Some("thread_busy"), "two")).await.unwrap_err();
        assert!(matches!(err, RelayError::ThreadBusy(_)));

        // Dropping the receiver disconnects the first session and frees the thread
        drop(first);
        let mut second = None;
        for _ in 0..100 {
            match service.open(input(Some("thread_busy"), "three")).await {
                Ok(session) => {
                    second = Some(session);
                    break;
                }
                Err(RelayError::ThreadBusy(_)) => tokio::time::sleep(Duration::from_millis(5)).await,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert!(flag.dropped());

        let frames = collect(second.expect("thread was never released")).await;
        assert!(matches!(frames.last(), Some(RelayFrame::Done(_))));
    }
}

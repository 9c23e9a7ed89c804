//! In-memory test doubles for the relay
//!
//! `MockAssistant` replays queued event streams and records every call, so
//! session tests can assert on what was (and was not) sent to the provider.

use super::tools::ToolHandler;
use crate::assistant::{
    AssistantApi, AssistantError, AssistantEvent, EventStream, Message, MessageDelta, MessageRole,
    Run, RunStatus, Thread, ToolCall, ToolOutput,
};
use async_trait::async_trait;
use futures::stream::{self, Stream};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

// ============================================================================
// Mock provider
// ============================================================================

/// Provider call as observed by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    CreateThread,
    PostMessage {
        thread_id: String,
        content: String,
    },
    StartRun {
        thread_id: String,
        assistant_id: String,
    },
    SubmitToolOutputs {
        thread_id: String,
        run_id: String,
        outputs: Vec<ToolOutput>,
    },
    PollRun {
        thread_id: String,
        run_id: String,
    },
    ListMessages {
        thread_id: String,
    },
}

/// Scripted provider
#[derive(Default)]
pub struct MockAssistant {
    runs: Mutex<VecDeque<EventStream>>,
    resumes: Mutex<VecDeque<EventStream>>,
    polled_run: Mutex<Option<Result<Run, AssistantError>>>,
    messages: Mutex<Vec<Message>>,
    create_error: Mutex<Option<AssistantError>>,
    post_error: Mutex<Option<AssistantError>>,
    stall_run_start: AtomicBool,
    threads_created: AtomicUsize,
    messages_posted: AtomicUsize,
    calls: Mutex<Vec<ApiCall>>,
}

impl MockAssistant {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the event stream returned by the next run start
    pub fn queue_run(&self, events: Vec<AssistantEvent>) {
        self.runs.lock().unwrap().push_back(from_events(events));
    }

    /// Queue a run start whose stream never yields; the flag reports when it is dropped
    pub fn queue_pending_run(&self) -> DropFlag {
        let flag = DropFlag::default();
        self.runs
            .lock()
            .unwrap()
            .push_back(flag.wrap(stream::pending()));
        flag
    }

    /// Queue the event stream returned by the next tool-output submission
    pub fn queue_resume(&self, events: Vec<AssistantEvent>) {
        self.resumes.lock().unwrap().push_back(from_events(events));
    }

    pub fn set_polled_run(&self, result: Result<Run, AssistantError>) {
        *self.polled_run.lock().unwrap() = Some(result);
    }

    pub fn set_messages(&self, messages: Vec<Message>) {
        *self.messages.lock().unwrap() = messages;
    }

    pub fn fail_create_thread(&self, error: AssistantError) {
        *self.create_error.lock().unwrap() = Some(error);
    }

    pub fn fail_post_message(&self, error: AssistantError) {
        *self.post_error.lock().unwrap() = Some(error);
    }

    /// The next run start never answers
    pub fn stall_next_run_start(&self) {
        self.stall_run_start.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, predicate: impl Fn(&ApiCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| predicate(c)).count()
    }

    fn record(&self, call: ApiCall) {
        self.calls.lock().unwrap().push(call);
    }
}

fn from_events(events: Vec<AssistantEvent>) -> EventStream {
    Box::pin(stream::iter(events.into_iter().map(Ok)))
}

#[async_trait]
impl AssistantApi for MockAssistant {
    async fn create_thread(&self) -> Result<Thread, AssistantError> {
        self.record(ApiCall::CreateThread);
        if let Some(error) = self.create_error.lock().unwrap().take() {
            return Err(error);
        }
        let n = self.threads_created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Thread {
            id: format!("thread_{n}"),
        })
    }

    async fn post_message(
        &self,
        thread_id: &str,
        role: MessageRole,
        content: &str,
    ) -> Result<Message, AssistantError> {
        self.record(ApiCall::PostMessage {
            thread_id: thread_id.to_string(),
            content: content.to_string(),
        });
        if let Some(error) = self.post_error.lock().unwrap().take() {
            return Err(error);
        }
        let n = self.messages_posted.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(message(&format!("msg_user_{n}"), role, json!([])))
    }

    async fn start_run_stream(
        &self,
        thread_id: &str,
        assistant_id: &str,
    ) -> Result<EventStream, AssistantError> {
        self.record(ApiCall::StartRun {
            thread_id: thread_id.to_string(),
            assistant_id: assistant_id.to_string(),
        });
        if self.stall_run_start.swap(false, Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        self.runs
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AssistantError::network("No mock run queued"))
    }

    async fn submit_tool_outputs_stream(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<EventStream, AssistantError> {
        self.record(ApiCall::SubmitToolOutputs {
            thread_id: thread_id.to_string(),
            run_id: run_id.to_string(),
            outputs: outputs.to_vec(),
        });
        self.resumes
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AssistantError::network("No mock resume queued"))
    }

    async fn poll_run_status(&self, thread_id: &str, run_id: &str) -> Result<Run, AssistantError> {
        self.record(ApiCall::PollRun {
            thread_id: thread_id.to_string(),
            run_id: run_id.to_string(),
        });
        self.polled_run
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Err(AssistantError::network("No mock run status set")))
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<Message>, AssistantError> {
        self.record(ApiCall::ListMessages {
            thread_id: thread_id.to_string(),
        });
        Ok(self.messages.lock().unwrap().clone())
    }
}

// ============================================================================
// Stream drop detection
// ============================================================================

/// Observes whether a wrapped stream has been released
#[derive(Debug, Clone, Default)]
pub struct DropFlag(Arc<AtomicBool>);

impl DropFlag {
    pub fn wrap<S>(&self, inner: S) -> EventStream
    where
        S: Stream<Item = Result<AssistantEvent, AssistantError>> + Send + 'static,
    {
        Box::pin(Guarded {
            inner: Box::pin(inner),
            dropped: self.0.clone(),
        })
    }

    pub fn dropped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct Guarded {
    inner: EventStream,
    dropped: Arc<AtomicBool>,
}

impl Stream for Guarded {
    type Item = Result<AssistantEvent, AssistantError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl Drop for Guarded {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn run(id: &str, status: RunStatus) -> Run {
    serde_json::from_value(json!({
        "id": id,
        "thread_id": "thread_1",
        "status": status,
    }))
    .unwrap()
}

pub fn run_event(id: &str, status: RunStatus) -> AssistantEvent {
    AssistantEvent::Run(run(id, status))
}

pub fn failed_run_event(id: &str, message: Option<&str>) -> AssistantEvent {
    let last_error = message.map(|m| json!({ "code": "server_error", "message": m }));
    AssistantEvent::Run(
        serde_json::from_value(json!({
            "id": id,
            "thread_id": "thread_1",
            "status": "failed",
            "last_error": last_error,
        }))
        .unwrap(),
    )
}

pub fn requires_action_event(id: &str, calls: Vec<ToolCall>) -> AssistantEvent {
    let tool_calls: Vec<Value> = calls
        .into_iter()
        .map(|c| {
            json!({
                "id": c.id,
                "type": "function",
                "function": { "name": c.function.name, "arguments": c.function.arguments },
            })
        })
        .collect();
    AssistantEvent::Run(
        serde_json::from_value(json!({
            "id": id,
            "thread_id": "thread_1",
            "status": "requires_action",
            "required_action": {
                "type": "submit_tool_outputs",
                "submit_tool_outputs": { "tool_calls": tool_calls },
            },
        }))
        .unwrap(),
    )
}

pub fn delta_event(text: &str) -> AssistantEvent {
    let delta: MessageDelta = serde_json::from_value(json!({
        "id": "msg_asst_1",
        "delta": { "content": [{ "index": 0, "type": "text", "text": { "value": text } }] },
    }))
    .unwrap();
    AssistantEvent::MessageDelta(delta)
}

pub fn tool_call(id: &str, name: &str, arguments: &str) -> ToolCall {
    serde_json::from_value(json!({
        "id": id,
        "type": "function",
        "function": { "name": name, "arguments": arguments },
    }))
    .unwrap()
}

pub fn message(id: &str, role: MessageRole, content: Value) -> Message {
    Message {
        id: id.to_string(),
        role,
        content,
    }
}

/// Assistant message with plain text parts
pub fn text_message(id: &str, parts: &[&str]) -> Message {
    let content: Vec<Value> = parts
        .iter()
        .map(|p| json!({ "type": "text", "text": { "value": p, "annotations": [] } }))
        .collect();
    message(id, MessageRole::Assistant, Value::Array(content))
}

// ============================================================================
// Tool handlers
// ============================================================================

/// Returns its arguments re-serialized
pub struct EchoTool;

#[async_trait]
impl ToolHandler for EchoTool {
    async fn call(&self, arguments: Value) -> Result<String, String> {
        serde_json::to_string(&arguments).map_err(|e| e.to_string())
    }
}

/// Always fails with the given reason
pub struct FailingTool(pub String);

#[async_trait]
impl ToolHandler for FailingTool {
    async fn call(&self, _arguments: Value) -> Result<String, String> {
        Err(self.0.clone())
    }
}

//! `OpenAI` Assistants v2 client

use super::error::AssistantError;
use super::sse::event_stream;
use super::types::{ErrorEnvelope, Message, MessageList, MessageRole, Run, Thread, ToolOutput};
use super::{AssistantApi, EventStream};
use crate::config::AssistantConfig;
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::{Duration, Instant};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Applies to non-streaming calls only; streams are bounded by the session
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MESSAGE_PAGE_SIZE: u32 = 20;

/// HTTP implementation of [`AssistantApi`]
pub struct OpenAIAssistantClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAIAssistantClient {
    pub fn new(config: &AssistantConfig) -> Result<Self, AssistantError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| AssistantError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{path}", self.base_url))
            .bearer_auth(&self.api_key)
            .header("OpenAI-Beta", "assistants=v2")
    }

    /// Send and map non-2xx responses to classified errors
    async fn send(&self, builder: RequestBuilder, op: &'static str) -> Result<Response, AssistantError> {
        let start = Instant::now();
        let response = builder.send().await.map_err(|e| {
            tracing::warn!(op, error = %e, "Assistant request failed to send");
            AssistantError::from(e)
        })?;

        let status = response.status();
        tracing::debug!(
            op,
            status = status.as_u16(),
            duration_ms = %start.elapsed().as_millis(),
            "Assistant request completed"
        );

        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .map_err(|e| AssistantError::network(format!("Failed to read response: {e}")))?;
        let message = serde_json::from_str::<ErrorEnvelope>(&body)
            .map_or(body, |envelope| envelope.error.message);

        let err = AssistantError::from_status(status.as_u16(), &message);
        tracing::warn!(
            op,
            status = status.as_u16(),
            kind = ?err.kind,
            retryable = err.kind.is_retryable(),
            error = %err,
            "Assistant request rejected"
        );
        Err(err)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        op: &'static str,
    ) -> Result<T, AssistantError> {
        let response = self.send(builder.timeout(REQUEST_TIMEOUT), op).await?;
        let body = response
            .text()
            .await
            .map_err(|e| AssistantError::network(format!("Failed to read response: {e}")))?;
        serde_json::from_str(&body)
            .map_err(|e| AssistantError::decode(format!("Failed to parse {op} response: {e}")))
    }

    async fn send_stream(
        &self,
        builder: RequestBuilder,
        op: &'static str,
    ) -> Result<EventStream, AssistantError> {
        let response = self
            .send(builder.header(ACCEPT, "text/event-stream"), op)
            .await?;
        Ok(event_stream(response.bytes_stream()))
    }
}

#[async_trait]
impl AssistantApi for OpenAIAssistantClient {
    async fn create_thread(&self) -> Result<Thread, AssistantError> {
        self.send_json(self.request(Method::POST, "/threads").json(&json!({})), "create_thread")
            .await
    }

    async fn post_message(
        &self,
        thread_id: &str,
        role: MessageRole,
        content: &str,
    ) -> Result<Message, AssistantError> {
        let builder = self
            .request(Method::POST, &format!("/threads/{thread_id}/messages"))
            .json(&json!({ "role": role, "content": content }));
        self.send_json(builder, "post_message").await
    }

    async fn start_run_stream(
        &self,
        thread_id: &str,
        assistant_id: &str,
    ) -> Result<EventStream, AssistantError> {
        let builder = self
            .request(Method::POST, &format!("/threads/{thread_id}/runs"))
            .json(&json!({ "assistant_id": assistant_id, "stream": true }));
        self.send_stream(builder, "start_run").await
    }

    async fn submit_tool_outputs_stream(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<EventStream, AssistantError> {
        let builder = self
            .request(
                Method::POST,
                &format!("/threads/{thread_id}/runs/{run_id}/submit_tool_outputs"),
            )
            .json(&json!({ "tool_outputs": outputs, "stream": true }));
        self.send_stream(builder, "submit_tool_outputs").await
    }

    async fn poll_run_status(&self, thread_id: &str, run_id: &str) -> Result<Run, AssistantError> {
        let builder = self.request(Method::GET, &format!("/threads/{thread_id}/runs/{run_id}"));
        self.send_json(builder, "retrieve_run").await
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<Message>, AssistantError> {
        let builder = self
            .request(Method::GET, &format!("/threads/{thread_id}/messages"))
            .query(&[("order", "desc".to_string()), ("limit", MESSAGE_PAGE_SIZE.to_string())]);
        let page: MessageList = self.send_json(builder, "list_messages").await?;
        Ok(page.data)
    }
}

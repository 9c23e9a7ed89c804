//! Decoding of the provider's server-sent event stream

use super::error::AssistantError;
use super::types::{AssistantEvent, MessageDelta, ProviderError, Run};
use super::EventStream;
use futures::stream::{Stream, StreamExt};
use std::collections::VecDeque;

/// One raw SSE frame: an optional event name and its joined data lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental SSE decoder.
///
/// Bytes are buffered until a full line is available, so chunk boundaries
/// may fall anywhere, including inside a multi-byte character.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every frame it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if let Some(frame) = self.process_line(&String::from_utf8_lossy(&line)) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flush whatever is left once the byte stream ends
    pub fn finish(&mut self) -> Option<SseFrame> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest).trim_end_matches('\r').to_string();
            if let Some(frame) = self.process_line(&line) {
                return Some(frame);
            }
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {} // id, retry
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if self.data.is_empty() && event.is_none() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame { event, data })
    }
}

/// Interpret a raw frame as an assistant stream event
pub fn decode_event(frame: &SseFrame) -> Result<AssistantEvent, AssistantError> {
    let Some(name) = frame.event.as_deref() else {
        return Ok(if frame.data.trim() == "[DONE]" {
            AssistantEvent::Done
        } else {
            AssistantEvent::Ignored(String::new())
        });
    };

    match name {
        "done" => Ok(AssistantEvent::Done),
        "error" => {
            let error = serde_json::from_str::<ProviderError>(&frame.data).unwrap_or_else(|_| {
                ProviderError {
                    message: frame.data.clone(),
                    code: None,
                }
            });
            Ok(AssistantEvent::Error(error))
        }
        "thread.message.delta" => serde_json::from_str::<MessageDelta>(&frame.data)
            .map(AssistantEvent::MessageDelta)
            .map_err(|e| AssistantError::decode(format!("Malformed message delta: {e}"))),
        _ if name.starts_with("thread.run.step.") => Ok(AssistantEvent::Ignored(name.to_string())),
        _ if name.starts_with("thread.run.") => serde_json::from_str::<Run>(&frame.data)
            .map(AssistantEvent::Run)
            .map_err(|e| AssistantError::decode(format!("Malformed run event {name}: {e}"))),
        _ => Ok(AssistantEvent::Ignored(name.to_string())),
    }
}

struct DecodeState<S> {
    inner: S,
    decoder: SseDecoder,
    pending: VecDeque<SseFrame>,
    exhausted: bool,
}

/// Turn a response body into a stream of decoded assistant events.
///
/// A transport error ends the stream after being yielded.
pub fn event_stream<S, B, E>(body: S) -> EventStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<AssistantError> + Send + 'static,
{
    let state = DecodeState {
        inner: Box::pin(body),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        exhausted: false,
    };

    let stream = futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(frame) = st.pending.pop_front() {
                return Some((decode_event(&frame), st));
            }
            if st.exhausted {
                return None;
            }
            match st.inner.next().await {
                Some(Ok(chunk)) => st.pending.extend(st.decoder.push(chunk.as_ref())),
                Some(Err(e)) => {
                    st.exhausted = true;
                    return Some((Err(e.into()), st));
                }
                None => {
                    st.exhausted = true;
                    st.pending.extend(st.decoder.finish());
                }
            }
        }
    });

    Box::pin(stream)
}

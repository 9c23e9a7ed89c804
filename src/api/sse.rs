//! Server-Sent Events framing for relay sessions

use crate::relay::RelayFrame;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

/// Turn a session's frame channel into an SSE response.
///
/// The stream ends when the session task drops its sender, right after the
/// terminal frame. Dropping the response drops the receiver, which the
/// session observes as a disconnect.
pub fn relay_stream(
    frames: mpsc::Receiver<RelayFrame>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = ReceiverStream::new(frames).map(|frame| Ok(frame_to_axum(frame)));

    Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

fn frame_to_axum(frame: RelayFrame) -> Event {
    let (event_type, data) = match frame {
        RelayFrame::Metadata(metadata) => (
            "metadata",
            serde_json::to_value(metadata).unwrap_or(Value::Null),
        ),
        RelayFrame::Text(value) => ("text", json!({ "value": value })),
        RelayFrame::Done(result) => ("done", serde_json::to_value(result).unwrap_or(Value::Null)),
        RelayFrame::Error(error) => ("error", json!({ "error": error })),
    };

    Event::default().event(event_type).data(data.to_string())
}

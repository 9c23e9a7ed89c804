//! Text extraction from assistant message content

use super::error::RelayError;
use serde_json::Value;

/// Concatenate the text parts of a message's content, in order.
///
/// Content must be an array of part objects. Parts of other types (images,
/// file citations) are skipped, as are text parts without a string value,
/// which the provider sends in annotation-only deltas.
pub fn text_content(content: &Value) -> Result<String, RelayError> {
    let parts = content
        .as_array()
        .ok_or_else(|| RelayError::MalformedContent(format!("expected an array, got {}", kind_of(content))))?;

    let mut text = String::new();
    for part in parts {
        let part = part
            .as_object()
            .ok_or_else(|| RelayError::MalformedContent(format!("expected a part object, got {}", kind_of(part))))?;

        if part.get("type").and_then(Value::as_str) != Some("text") {
            continue;
        }
        if let Some(value) = part
            .get("text")
            .and_then(|t| t.get("value"))
            .and_then(Value::as_str)
        {
            text.push_str(value);
        }
    }
    Ok(text)
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

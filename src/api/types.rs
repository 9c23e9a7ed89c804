//! API request and response types

use serde::{Deserialize, Serialize};

/// Body of `POST /api/chat`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Body of `POST /api/chat/status`. Both fields are required; they are
/// optional here so a missing one is a 400 rather than an extractor error.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRequest {
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub run_id: Option<String>,
}

/// Body of `POST /api/validate-invite`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteRequest {
    #[serde(default)]
    pub invite_code: String,
}

#[derive(Debug, Serialize)]
pub struct InviteResponse {
    pub valid: bool,
    pub message: &'static str,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

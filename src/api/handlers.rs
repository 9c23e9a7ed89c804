//! HTTP request handlers

use super::assets::{serve_page, serve_static};
use super::auth::{require_session, validate_invite};
use super::sse::relay_stream;
use super::types::{ChatRequest, ErrorResponse, StatusRequest};
use super::AppState;
use crate::relay::{ChatInput, RelayError, StatusReport};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::WithRejection;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let chat_pages = Router::new()
        .route("/chat", get(serve_chat))
        .route("/chat/*path", get(serve_chat))
        .route_layer(middleware::from_fn(require_session));

    Router::new()
        // Entry page with the invite form
        .route("/", get(serve_entry))
        .merge(chat_pages)
        // Static assets (embedded or filesystem fallback)
        .route("/assets/*path", get(serve_static))
        // Streaming chat
        .route("/api/chat", post(start_chat))
        // Non-streaming fallback
        .route("/api/chat/status", post(check_status))
        // Credential gate
        .route("/api/validate-invite", post(validate_invite))
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// Pages
// ============================================================

async fn serve_entry() -> Response {
    serve_page("index.html")
}

async fn serve_chat() -> Response {
    serve_page("chat.html")
}

// ============================================================
// Chat
// ============================================================

async fn start_chat(
    State(state): State<AppState>,
    WithRejection(Json(req), _): WithRejection<Json<ChatRequest>, AppError>,
) -> Result<Response, AppError> {
    let input = ChatInput {
        thread_id: req.thread_id,
        message: req.message.unwrap_or_default(),
    };

    let session = state.relay.open(input).await?;
    tracing::info!(
        thread_id = %session.metadata.thread_id,
        message_id = %session.metadata.message_id,
        "Chat stream opened"
    );

    Ok(relay_stream(session.frames).into_response())
}

async fn check_status(
    State(state): State<AppState>,
    WithRejection(Json(req), _): WithRejection<Json<StatusRequest>, AppError>,
) -> Result<Json<StatusReport>, AppError> {
    let non_empty = |field: Option<String>| field.filter(|v| !v.trim().is_empty());
    let (Some(thread_id), Some(run_id)) = (non_empty(req.thread_id), non_empty(req.run_id)) else {
        return Err(AppError::BadRequest(
            "threadId and runId are required".to_string(),
        ));
    };

    let report = state.relay.poll(&thread_id, &run_id).await?;
    Ok(Json(report))
}

async fn get_version() -> &'static str {
    concat!("assistant-relay ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    Conflict(String),
    Internal(String),
}

impl From<RelayError> for AppError {
    fn from(e: RelayError) -> Self {
        match e {
            RelayError::ThreadBusy(_) => AppError::Conflict(e.to_string()),
            _ => AppError::Internal(e.to_string()),
        }
    }
}

/// Unreadable request bodies are reported like any other pre-stream failure
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::warn!(status = %rejection.status(), error = %rejection.body_text(), "Rejected request body");
        AppError::Internal(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}

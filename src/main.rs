//! Assistant relay - streaming bridge to a hosted assistant
//!
//! Serves a small chat UI behind an invite code and relays assistant runs
//! to the browser as server-sent events.

mod api;
mod assistant;
mod config;
mod relay;

use api::{create_router, AppState};
use assistant::OpenAIAssistantClient;
use config::RelayConfig;
use relay::{RelayService, ToolRegistry};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "assistant_relay=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = RelayConfig::from_env();
    tracing::info!(?config, "Loaded configuration");

    if config.assistant.api_key.is_empty() {
        tracing::warn!("OPENAI_API_KEY is not set; provider calls will be rejected");
    }
    if config.assistant.assistant_id.is_none() {
        tracing::warn!("ASSISTANT_ID is not set; chat requests will fail");
    }
    if config.gate.invite_code.is_none() {
        tracing::warn!("INVITE_CODE is not set; every invite code will be rejected");
    }

    let client = OpenAIAssistantClient::new(&config.assistant)?;
    let tools = ToolRegistry::new();
    tracing::info!(tools = ?tools, "Tool registry initialized");

    let relay = RelayService::new(
        Arc::new(client),
        tools,
        config.assistant.assistant_id.clone(),
        config.limits,
    );
    let state = AppState::new(relay, config.gate.clone());

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let compression = CompressionLayer::new()
        .gzip(true)
        .br(true)
        .deflate(true)
        .zstd(true);

    let app = create_router(state)
        .layer(cors)
        .layer(compression)
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "Assistant relay listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

//! HTTP API for the assistant relay
//!
//! Streaming chat, status polling, the invite gate and the two pages.

mod assets;
mod auth;
mod handlers;
mod sse;
mod types;

pub use handlers::create_router;

use crate::config::GateConfig;
use crate::relay::RelayService;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<RelayService>,
    pub gate: Arc<GateConfig>,
}

impl AppState {
    pub fn new(relay: RelayService, gate: GateConfig) -> Self {
        Self {
            relay: Arc::new(relay),
            gate: Arc::new(gate),
        }
    }
}

//! Tool-call resolution
//!
//! Maps each pending tool call of a paused run to an output using a
//! registry of handlers keyed by function name. The deployed registry is
//! empty, so every tool call currently fails the session.

use super::error::RelayError;
use crate::assistant::{ToolCall, ToolOutput};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Implementation of one assistant function
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run with parsed arguments, returning the output string for the provider
    async fn call(&self, arguments: Value) -> Result<String, String>;
}

/// Function name to handler mapping
#[derive(Clone, Default)]
pub struct ToolRegistry {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn ToolHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Produce outputs for a whole batch of tool calls.
    ///
    /// All-or-nothing: the first call that cannot be resolved aborts the
    /// batch and nothing is returned for submission.
    pub async fn resolve(&self, calls: &[ToolCall]) -> Result<Vec<ToolOutput>, RelayError> {
        let mut outputs = Vec::with_capacity(calls.len());

        for call in calls {
            let name = &call.function.name;
            let arguments: Value = serde_json::from_str(&call.function.arguments).map_err(|e| {
                RelayError::MalformedToolArguments {
                    function: name.clone(),
                    reason: e.to_string(),
                }
            })?;

            let handler = self.handlers.get(name).ok_or_else(|| {
                tracing::error!(tool_call_id = %call.id, function = %name, "No handler registered for tool call");
                RelayError::UnknownToolFunction(name.clone())
            })?;

            let output = handler
                .call(arguments)
                .await
                .map_err(|reason| RelayError::ToolFailed {
                    function: name.clone(),
                    reason,
                })?;

            tracing::debug!(tool_call_id = %call.id, function = %name, "Tool call resolved");
            outputs.push(ToolOutput {
                tool_call_id: call.id.clone(),
                output,
            });
        }

        Ok(outputs)
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("handlers", &self.names())
            .finish()
    }
}

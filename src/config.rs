//! Process configuration
//!
//! Read once at start-up and threaded through the components that need it.

use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_MAX_ACTION_ROUNDS: u32 = 8;

/// Credentials and endpoint for the hosted assistant provider
#[derive(Clone, Default)]
pub struct AssistantConfig {
    pub api_key: String,
    pub base_url: String,
    /// Assistant identity. `None` makes every chat start fail fast.
    pub assistant_id: Option<String>,
}

impl std::fmt::Debug for AssistantConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssistantConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("assistant_id", &self.assistant_id)
            .finish()
    }
}

/// Limits applied to one streamed relay session
#[derive(Debug, Clone, Copy)]
pub struct RelayLimits {
    /// Wall-clock cap for streaming plus all tool rounds
    pub run_timeout: Duration,
    /// Maximum number of `requires_action` rounds per session
    pub max_action_rounds: u32,
}

impl Default for RelayLimits {
    fn default() -> Self {
        Self {
            run_timeout: DEFAULT_RUN_TIMEOUT,
            max_action_rounds: DEFAULT_MAX_ACTION_ROUNDS,
        }
    }
}

/// Invite-code gate settings
#[derive(Clone, Default)]
pub struct GateConfig {
    /// Shared invite secret. `None` rejects every code.
    pub invite_code: Option<String>,
    pub secure_cookies: bool,
}

impl std::fmt::Debug for GateConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GateConfig")
            .field("invite_code", &self.invite_code.as_ref().map(|_| "<redacted>"))
            .field("secure_cookies", &self.secure_cookies)
            .finish()
    }
}

/// Full service configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub port: u16,
    pub assistant: AssistantConfig,
    pub limits: RelayLimits,
    pub gate: GateConfig,
}

impl RelayConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let port = var("RELAY_PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let run_timeout = var("RELAY_RUN_TIMEOUT_SECS")
            .and_then(|s| s.parse().ok())
            .map_or(DEFAULT_RUN_TIMEOUT, Duration::from_secs);

        let max_action_rounds = var("RELAY_MAX_ACTION_ROUNDS")
            .and_then(|n| n.parse().ok())
            .unwrap_or(DEFAULT_MAX_ACTION_ROUNDS);

        let secure_cookies = var("RELAY_SECURE_COOKIES")
            .and_then(|v| v.parse::<bool>().ok())
            .unwrap_or(false);

        Self {
            port,
            assistant: AssistantConfig {
                api_key: var("OPENAI_API_KEY").unwrap_or_default(),
                base_url: var("OPENAI_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                    .trim_end_matches('/')
                    .to_string(),
                assistant_id: var("ASSISTANT_ID"),
            },
            limits: RelayLimits {
                run_timeout,
                max_action_rounds,
            },
            gate: GateConfig {
                invite_code: var("INVITE_CODE"),
                secure_cookies,
            },
        }
    }
}

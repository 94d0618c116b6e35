//! Config schema types (agents, bindings, delivery tuning, supervisor).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Account wildcard accepted in binding matches.
pub const WILDCARD: &str = "*";

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrellisConfig {
    /// Global default agent (routing tier 5).
    pub default_agent: Option<String>,
    /// Known agents, keyed by agent id.
    pub agents: HashMap<String, AgentConfig>,
    /// Ordered binding list; definition order is the in-tier tie-break.
    pub bindings: Vec<BindingConfig>,
    pub delivery: DeliveryConfig,
    pub supervisor: SupervisorConfig,
}

/// One configured agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Model/config reference handed to the agent runtime.
    pub model: Option<String>,
    pub system_prompt: Option<String>,
}

/// One routing rule mapping channel/account/peer criteria to an agent.
///
/// `account` defaults to `"*"`. A binding with `peer_id` set matches one
/// exact peer (tier 1); one with only `peer_parent` set scopes to a
/// guild/team (tier 2); with neither it matches at account or channel
/// level (tiers 3/4) depending on whether `account` is exact or `"*"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BindingConfig {
    pub agent: String,
    pub channel: String,
    pub account: String,
    /// Peer kind constraint: "direct", "group", or "channel".
    pub peer_kind: Option<String>,
    pub peer_id: Option<String>,
    pub peer_parent: Option<String>,
}

impl Default for BindingConfig {
    fn default() -> Self {
        Self {
            agent: String::new(),
            channel: String::new(),
            account: WILDCARD.to_string(),
            peer_kind: None,
            peer_id: None,
            peer_parent: None,
        }
    }
}

/// Outbound delivery tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Attempts per chunk before it is marked permanently failed.
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Bounded per-account send queue depth.
    pub queue_capacity: usize,
    /// How long a caller blocks on a full queue before `QueueTimeout`.
    pub queue_timeout_ms: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_backoff_ms: 500,
            max_backoff_ms: 30_000,
            queue_capacity: 64,
            queue_timeout_ms: 5_000,
        }
    }
}

/// Supervisor health-window tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Sliding window length for the error-rate computation.
    pub error_window_secs: u64,
    /// Error rate at which a running account is marked degraded.
    pub degraded_error_rate: f64,
    /// Minimum samples in the window before the rate is meaningful.
    pub min_window_samples: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            error_window_secs: 60,
            degraded_error_rate: 0.5,
            min_window_samples: 5,
        }
    }
}

//! Configuration validation.
//!
//! Produces structured diagnostics instead of failing fast, so a control
//! surface can show everything wrong with a config at once.

use std::collections::HashSet;

use crate::schema::{TrellisConfig, WILDCARD};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted path, e.g. "bindings[2].agent".
    pub path: String,
    pub message: String,
}

impl Diagnostic {
    fn error(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            path: path.into(),
            message: message.into(),
        }
    }

    fn warning(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            path: path.into(),
            message: message.into(),
        }
    }
}

const PEER_KINDS: &[&str] = &["direct", "group", "channel"];

/// Validate a loaded config, returning all diagnostics found.
#[must_use]
pub fn validate(cfg: &TrellisConfig) -> Vec<Diagnostic> {
    let mut out = Vec::new();

    if let Some(agent) = &cfg.default_agent
        && !cfg.agents.contains_key(agent)
    {
        out.push(Diagnostic::error(
            "default_agent",
            format!("references unknown agent '{agent}'"),
        ));
    }

    let mut seen_matches: HashSet<String> = HashSet::new();
    for (i, binding) in cfg.bindings.iter().enumerate() {
        let path = format!("bindings[{i}]");

        if binding.agent.trim().is_empty() {
            out.push(Diagnostic::error(format!("{path}.agent"), "empty agent id"));
        } else if !cfg.agents.contains_key(&binding.agent) {
            out.push(Diagnostic::error(
                format!("{path}.agent"),
                format!("references unknown agent '{}'", binding.agent),
            ));
        }

        if binding.channel.trim().is_empty() {
            out.push(Diagnostic::error(
                format!("{path}.channel"),
                "empty channel id",
            ));
        }
        if binding.channel == WILDCARD {
            out.push(Diagnostic::error(
                format!("{path}.channel"),
                "channel wildcard is not supported; use default_agent for the global fallback",
            ));
        }

        if let Some(kind) = &binding.peer_kind
            && !PEER_KINDS.contains(&kind.as_str())
        {
            out.push(Diagnostic::error(
                format!("{path}.peer_kind"),
                format!("unknown peer kind '{kind}' (expected one of {PEER_KINDS:?})"),
            ));
        }
        if binding.peer_id.is_some() && binding.peer_kind.is_none() {
            out.push(Diagnostic::error(
                format!("{path}.peer_kind"),
                "peer_id requires peer_kind",
            ));
        }
        if binding.peer_id.is_some() && binding.peer_parent.is_some() {
            out.push(Diagnostic::warning(
                format!("{path}.peer_parent"),
                "peer_parent is ignored when peer_id is set (exact match wins)",
            ));
        }

        // Duplicate match criteria: only the first definition can ever win.
        let fingerprint = format!(
            "{}|{}|{:?}|{:?}|{:?}",
            binding.channel, binding.account, binding.peer_kind, binding.peer_id,
            binding.peer_parent
        );
        if !seen_matches.insert(fingerprint) {
            out.push(Diagnostic::warning(
                path,
                "duplicate match criteria; earlier binding always wins",
            ));
        }
    }

    let d = &cfg.delivery;
    if d.max_attempts == 0 {
        out.push(Diagnostic::error(
            "delivery.max_attempts",
            "must be at least 1",
        ));
    }
    if d.queue_capacity == 0 {
        out.push(Diagnostic::error(
            "delivery.queue_capacity",
            "must be at least 1",
        ));
    }
    if d.max_backoff_ms < d.base_backoff_ms {
        out.push(Diagnostic::error(
            "delivery.max_backoff_ms",
            "must be >= base_backoff_ms",
        ));
    }

    let s = &cfg.supervisor;
    if !(0.0..=1.0).contains(&s.degraded_error_rate) {
        out.push(Diagnostic::error(
            "supervisor.degraded_error_rate",
            "must be within 0.0..=1.0",
        ));
    }

    out
}

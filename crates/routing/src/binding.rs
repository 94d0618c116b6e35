use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use tracing::warn;

use {
    trellis_common::PeerKind,
    trellis_config::{BindingConfig, TrellisConfig, WILDCARD},
};

use crate::error::{Error, Result};

/// Peer constraint of a tier-1 binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSelector {
    pub kind: PeerKind,
    pub id: String,
}

/// One compiled routing rule.
#[derive(Debug, Clone)]
pub struct Binding {
    pub agent_id: String,
    pub channel_id: String,
    /// Exact account id or [`WILDCARD`].
    pub account_id: String,
    /// Tier-1 exact peer constraint.
    pub peer: Option<PeerSelector>,
    /// Tier-2 parent (guild/team) constraint; unused when `peer` is set.
    pub peer_parent: Option<String>,
}

impl Binding {
    /// Compile a config-level binding into a match rule.
    pub fn from_config(cfg: &BindingConfig) -> Result<Self> {
        if cfg.agent.trim().is_empty() {
            return Err(Error::invalid_binding("<unset>", "empty agent id"));
        }
        if cfg.channel.trim().is_empty() || cfg.channel == WILDCARD {
            return Err(Error::invalid_binding(
                &cfg.agent,
                "binding requires a concrete channel id",
            ));
        }

        let peer = match (&cfg.peer_id, &cfg.peer_kind) {
            (Some(id), Some(kind)) => Some(PeerSelector {
                kind: parse_peer_kind(&cfg.agent, kind)?,
                id: id.clone(),
            }),
            (Some(_), None) => {
                return Err(Error::invalid_binding(&cfg.agent, "peer_id requires peer_kind"));
            },
            (None, _) => None,
        };

        Ok(Self {
            agent_id: cfg.agent.clone(),
            channel_id: cfg.channel.clone(),
            account_id: cfg.account.clone(),
            // Exact peer match takes the parent constraint out of play.
            peer_parent: if peer.is_some() {
                None
            } else {
                cfg.peer_parent.clone()
            },
            peer,
        })
    }

    #[must_use]
    pub fn is_wildcard_account(&self) -> bool {
        self.account_id == WILDCARD
    }
}

fn parse_peer_kind(agent_id: &str, raw: &str) -> Result<PeerKind> {
    match raw {
        "direct" => Ok(PeerKind::Direct),
        "group" => Ok(PeerKind::Group),
        "channel" => Ok(PeerKind::Channel),
        other => Err(Error::invalid_binding(
            agent_id,
            format!("unknown peer kind '{other}'"),
        )),
    }
}

/// Routing outcome: the responsible agent and its resolved model reference.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct AgentTarget {
    pub agent_id: String,
    pub model: Option<String>,
}

/// One immutable binding snapshot: the ordered rule list, the global
/// default, and per-agent model references for target resolution.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    pub(crate) ordered: Vec<Binding>,
    pub(crate) default_agent: Option<String>,
    pub(crate) models: HashMap<String, Option<String>>,
}

impl Bindings {
    /// Compile a snapshot from config. Invalid bindings are skipped with a
    /// warning; valid siblings are unaffected.
    #[must_use]
    pub fn from_config(cfg: &TrellisConfig) -> Self {
        let mut ordered = Vec::with_capacity(cfg.bindings.len());
        for binding in &cfg.bindings {
            match Binding::from_config(binding) {
                Ok(b) => ordered.push(b),
                Err(e) => warn!(error = %e, "skipping invalid binding"),
            }
        }
        let models = cfg
            .agents
            .iter()
            .map(|(id, a)| (id.clone(), a.model.clone()))
            .collect();
        Self {
            ordered,
            default_agent: cfg.default_agent.clone(),
            models,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub(crate) fn target(&self, agent_id: &str) -> AgentTarget {
        AgentTarget {
            agent_id: agent_id.to_string(),
            model: self.models.get(agent_id).cloned().flatten(),
        }
    }
}

/// Read-mostly handle to the current binding snapshot.
///
/// Readers take an `Arc` and keep routing against it; `store` swaps the
/// whole snapshot atomically, so a reload never tears an in-flight
/// decision.
#[derive(Default)]
pub struct SharedBindings {
    inner: RwLock<Arc<Bindings>>,
}

impl SharedBindings {
    #[must_use]
    pub fn new(bindings: Bindings) -> Self {
        Self {
            inner: RwLock::new(Arc::new(bindings)),
        }
    }

    /// Current snapshot; consistent for as long as the caller holds it.
    #[must_use]
    pub fn load(&self) -> Arc<Bindings> {
        Arc::clone(&self.inner.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Replace the snapshot. In-flight readers keep their old `Arc`.
    pub fn store(&self, bindings: Bindings) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(bindings);
    }
}

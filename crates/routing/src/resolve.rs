use trellis_common::MessageEnvelope;

use crate::{
    binding::{AgentTarget, Binding, Bindings},
    error::{Error, Result},
};

/// Resolve which agent handles `envelope`, walking the binding cascade.
///
/// Pure: no I/O, no side effects; for a fixed snapshot a given envelope
/// always resolves to the same target or the same [`Error::Unrouted`].
pub fn resolve_agent(envelope: &MessageEnvelope, bindings: &Bindings) -> Result<AgentTarget> {
    // Tier 1: exact peer match.
    for b in bindings.ordered.iter().filter(|b| b.peer.is_some()) {
        let matches_peer = b.peer.as_ref().is_some_and(|peer| {
            peer.kind == envelope.peer.kind && peer.id == envelope.peer.id
        });
        if matches_peer && channel_account_match(b, envelope) {
            return Ok(bindings.target(&b.agent_id));
        }
    }

    // Tier 2: parent-scoped match (guild/team).
    if let Some(parent) = envelope.peer.parent_id.as_deref() {
        for b in bindings.ordered.iter().filter(|b| b.peer.is_none()) {
            if b.peer_parent.as_deref() == Some(parent) && channel_account_match(b, envelope) {
                return Ok(bindings.target(&b.agent_id));
            }
        }
    }

    // Tiers 3 and 4: account-level, then channel-wildcard.
    let unconstrained = || {
        bindings
            .ordered
            .iter()
            .filter(|b| b.peer.is_none() && b.peer_parent.is_none())
            .filter(|b| b.channel_id == envelope.channel_id)
    };
    for b in unconstrained() {
        if !b.is_wildcard_account() && b.account_id == envelope.account_id {
            return Ok(bindings.target(&b.agent_id));
        }
    }
    for b in unconstrained() {
        if b.is_wildcard_account() {
            return Ok(bindings.target(&b.agent_id));
        }
    }

    // Tier 5: global default.
    if let Some(agent) = &bindings.default_agent {
        return Ok(bindings.target(agent));
    }

    Err(Error::Unrouted {
        channel_id: envelope.channel_id.clone(),
        account_id: envelope.account_id.clone(),
        peer_id: envelope.peer.id.clone(),
    })
}

fn channel_account_match(binding: &Binding, envelope: &MessageEnvelope) -> bool {
    binding.channel_id == envelope.channel_id
        && (binding.is_wildcard_account() || binding.account_id == envelope.account_id)
}

use serde::{Deserialize, Serialize};

use trellis_common::{MessageEnvelope, PeerKind};

/// Deterministic composite address for one conversation.
///
/// Rendered form: `agent:channel:account:chat_type:peer`, with `:` and
/// whitespace inside segments replaced by `-` so the rendered key parses
/// back unambiguously. The key is an address only; the core never owns the
/// state behind it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub agent_id: String,
    pub channel_id: String,
    pub account_id: String,
    pub chat_type: PeerKind,
    pub peer_id: String,
}

impl SessionKey {
    #[must_use]
    pub fn new(
        agent_id: impl Into<String>,
        channel_id: impl Into<String>,
        account_id: impl Into<String>,
        chat_type: PeerKind,
        peer_id: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: sanitize(&agent_id.into()),
            channel_id: sanitize(&channel_id.into()),
            account_id: sanitize(&account_id.into()),
            chat_type,
            peer_id: sanitize(&peer_id.into()),
        }
    }

    /// Derive the key for `envelope` handled by `agent_id`.
    #[must_use]
    pub fn for_envelope(agent_id: &str, envelope: &MessageEnvelope) -> Self {
        Self::new(
            agent_id,
            &envelope.channel_id,
            &envelope.account_id,
            envelope.peer.kind,
            &envelope.peer.id,
        )
    }

    /// Parse a rendered key back into its parts.
    #[must_use]
    pub fn parse(rendered: &str) -> Option<Self> {
        let mut parts = rendered.split(':');
        let agent_id = parts.next()?.to_string();
        let channel_id = parts.next()?.to_string();
        let account_id = parts.next()?.to_string();
        let chat_type = match parts.next()? {
            "direct" => PeerKind::Direct,
            "group" => PeerKind::Group,
            "channel" => PeerKind::Channel,
            _ => return None,
        };
        let peer_id = parts.next()?.to_string();
        if parts.next().is_some() || peer_id.is_empty() {
            return None;
        }
        Some(Self {
            agent_id,
            channel_id,
            account_id,
            chat_type,
            peer_id,
        })
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}",
            self.agent_id, self.channel_id, self.account_id, self.chat_type, self.peer_id
        )
    }
}

fn sanitize(segment: &str) -> String {
    segment
        .chars()
        .map(|c| if c == ':' || c.is_whitespace() { '-' } else { c })
        .collect()
}

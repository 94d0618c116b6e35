//! Inbound event normalization.
//!
//! Converts a platform-specific event (parsed by the plugin's messaging
//! adapter) into a canonical [`MessageEnvelope`], validating its shape and
//! stamping a copy of the channel's capability descriptor so downstream
//! consumers never need a registry lookup.

use {chrono::Utc, serde_json::Value, tracing::debug, uuid::Uuid};

use trellis_common::{ContentSegment, MessageEnvelope, PeerKind};

use crate::{
    error::{Error, Result},
    plugin::{ChannelPlugin, InboundMessage},
};

/// Normalize one inbound event for `account_id` on `plugin`'s channel.
///
/// Malformed or unrecognized events yield [`Error::Normalization`]; the
/// caller drops the message with the structured reason and processing of
/// other messages is unaffected.
pub fn normalize_event(
    plugin: &dyn ChannelPlugin,
    account_id: &str,
    payload: &Value,
) -> Result<MessageEnvelope> {
    let channel_id = plugin.id();
    let messaging = plugin
        .messaging()
        .ok_or_else(|| Error::normalization(channel_id, account_id, "no messaging adapter"))?;

    let inbound = messaging
        .parse_event(account_id, payload)
        .map_err(|e| Error::normalization(channel_id, account_id, e))?;
    validate_inbound(channel_id, account_id, &inbound)?;

    let envelope = MessageEnvelope {
        id: Uuid::new_v4(),
        channel_id: channel_id.to_string(),
        account_id: account_id.to_string(),
        peer: inbound.peer,
        sender_id: inbound.sender_id,
        sender_name: inbound.sender_name,
        timestamp: inbound.timestamp.unwrap_or_else(Utc::now),
        segments: inbound.segments,
        thread_id: inbound.thread_id,
        message_id: inbound.message_id,
        capabilities: plugin.capabilities(),
    };
    debug!(
        channel = channel_id,
        account_id,
        envelope_id = %envelope.id,
        peer_id = %envelope.peer.id,
        segments = envelope.segments.len(),
        "inbound event normalized"
    );
    Ok(envelope)
}

fn validate_inbound(channel_id: &str, account_id: &str, inbound: &InboundMessage) -> Result<()> {
    let fail = |reason: &str| Err(Error::normalization(channel_id, account_id, reason));

    if inbound.sender_id.trim().is_empty() {
        return fail("empty sender id");
    }
    if inbound.peer.id.trim().is_empty() {
        return fail("empty peer id");
    }
    if let Some(parent) = &inbound.peer.parent_id {
        if parent.trim().is_empty() {
            return fail("blank peer parent id");
        }
        if inbound.peer.kind == PeerKind::Direct {
            return fail("direct peer with a parent id");
        }
    }
    if inbound.segments.is_empty() {
        return fail("no content segments");
    }
    for segment in &inbound.segments {
        match segment {
            ContentSegment::Text { text } => {
                if text.trim().is_empty() {
                    return fail("empty text segment");
                }
            },
            ContentSegment::Attachment { attachment } => {
                if attachment.url.trim().is_empty() {
                    return fail("attachment without url");
                }
            },
        }
    }
    Ok(())
}

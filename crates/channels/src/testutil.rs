//! Mock plugin for contract, normalizer, and orchestration tests.
//!
//! Compiled unconditionally so downstream crates can drive a full
//! inbound-to-outbound path without a live platform.

use {
    anyhow::Result, async_trait::async_trait, serde_json::Value, std::sync::Arc,
    tokio::sync::Notify,
};

use trellis_common::{AttachmentRef, ChannelCapabilities, ContentSegment, MediaKind, Peer, PeerKind};

use crate::plugin::{
    ChannelGateway, ChannelHealthSnapshot, ChannelMessaging, ChannelOutbound, ChannelPlugin,
    InboundMessage, ReplyContext, SendError, SentMessage,
};

pub struct MockPluginSpec {
    pub id: String,
    pub capabilities: ChannelCapabilities,
    pub gateway: bool,
    pub messaging: bool,
    pub outbound: bool,
    /// When set, `start_account` parks on the gate until it is notified,
    /// so tests can observe an account mid-start.
    pub start_gate: Option<Arc<Notify>>,
}

impl MockPluginSpec {
    pub fn complete(id: &str) -> Self {
        Self {
            id: id.to_string(),
            capabilities: ChannelCapabilities::default(),
            gateway: true,
            messaging: true,
            outbound: true,
            start_gate: None,
        }
    }
}

pub struct MockPlugin {
    spec: MockPluginSpec,
    gateway: MockGateway,
    messaging: MockMessaging,
    outbound: MockOutbound,
}

impl MockPlugin {
    pub fn new(spec: MockPluginSpec) -> Self {
        let gateway = MockGateway {
            start_gate: spec.start_gate.clone(),
        };
        Self {
            spec,
            gateway,
            messaging: MockMessaging,
            outbound: MockOutbound,
        }
    }
}

impl ChannelPlugin for MockPlugin {
    fn id(&self) -> &str {
        &self.spec.id
    }

    fn name(&self) -> &str {
        "Mock"
    }

    fn capabilities(&self) -> ChannelCapabilities {
        self.spec.capabilities.clone()
    }

    fn gateway(&self) -> Option<&dyn ChannelGateway> {
        if self.spec.gateway {
            Some(&self.gateway)
        } else {
            None
        }
    }

    fn messaging(&self) -> Option<&dyn ChannelMessaging> {
        if self.spec.messaging {
            Some(&self.messaging)
        } else {
            None
        }
    }

    fn outbound(&self) -> Option<&dyn ChannelOutbound> {
        if self.spec.outbound {
            Some(&self.outbound)
        } else {
            None
        }
    }
}

struct MockGateway {
    start_gate: Option<Arc<Notify>>,
}

#[async_trait]
impl ChannelGateway for MockGateway {
    async fn start_account(&self, _account_id: &str, _config: Value) -> Result<()> {
        if let Some(gate) = &self.start_gate {
            gate.notified().await;
        }
        Ok(())
    }

    async fn stop_account(&self, _account_id: &str) -> Result<()> {
        Ok(())
    }

    async fn probe(&self, account_id: &str) -> Result<ChannelHealthSnapshot> {
        Ok(ChannelHealthSnapshot {
            connected: true,
            account_id: account_id.to_string(),
            details: None,
        })
    }
}

struct MockMessaging;

impl ChannelMessaging for MockMessaging {
    /// Reads a flat JSON shape: `peer_kind`, `peer_id`, `parent_id`,
    /// `sender_id`, `text`, `attachment_bytes`, `thread_id`, `message_id`.
    /// Missing fields default to empty so normalizer validation is what
    /// rejects them; `{"malformed": true}` fails parsing itself.
    fn parse_event(&self, _account_id: &str, payload: &Value) -> Result<InboundMessage> {
        if payload.get("malformed").and_then(Value::as_bool) == Some(true) {
            anyhow::bail!("unrecognized event shape");
        }
        let str_field = |key: &str| {
            payload
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let opt_field = |key: &str| {
            payload
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        let kind = match str_field("peer_kind").as_str() {
            "group" => PeerKind::Group,
            "channel" => PeerKind::Channel,
            _ => PeerKind::Direct,
        };
        let mut segments = Vec::new();
        if payload.get("text").is_some() {
            segments.push(ContentSegment::Text {
                text: str_field("text"),
            });
        }
        if let Some(size) = payload.get("attachment_bytes").and_then(Value::as_u64) {
            segments.push(ContentSegment::Attachment {
                attachment: AttachmentRef {
                    id: "att-1".into(),
                    kind: MediaKind::Image,
                    url: str_field("attachment_url"),
                    mime_type: "image/png".into(),
                    size_bytes: size,
                    file_name: None,
                },
            });
        }

        Ok(InboundMessage {
            peer: Peer {
                kind,
                id: str_field("peer_id"),
                parent_id: opt_field("parent_id"),
            },
            sender_id: str_field("sender_id"),
            sender_name: opt_field("sender_name"),
            timestamp: None,
            segments,
            thread_id: opt_field("thread_id"),
            message_id: opt_field("message_id"),
        })
    }

    fn normalize_target(&self, raw: &str) -> Result<Peer> {
        Ok(Peer::direct(raw.trim_start_matches('@')))
    }
}

struct MockOutbound;

#[async_trait]
impl ChannelOutbound for MockOutbound {
    async fn send_text(
        &self,
        _account_id: &str,
        _to: &Peer,
        _text: &str,
        _reply: &ReplyContext,
    ) -> std::result::Result<SentMessage, SendError> {
        Ok(SentMessage::default())
    }

    async fn send_attachment(
        &self,
        _account_id: &str,
        _to: &Peer,
        _attachment: &AttachmentRef,
        _caption: Option<&str>,
        _reply: &ReplyContext,
    ) -> std::result::Result<SentMessage, SendError> {
        Ok(SentMessage::default())
    }
}

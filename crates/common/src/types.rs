use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    uuid::Uuid,
};

/// What kind of conversation a peer represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerKind {
    /// One-on-one conversation with a single user.
    Direct,
    /// Multi-user group chat.
    Group,
    /// Broadcast-style channel (announcements, rooms).
    Channel,
}

impl PeerKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Group => "group",
            Self::Channel => "channel",
        }
    }
}

impl std::fmt::Display for PeerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The remote end of a conversation, as the platform identifies it.
///
/// `parent_id` carries the enclosing guild/team/server where the platform
/// has one; it is what parent-scoped bindings match against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Peer {
    pub kind: PeerKind,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl Peer {
    #[must_use]
    pub fn direct(id: impl Into<String>) -> Self {
        Self {
            kind: PeerKind::Direct,
            id: id.into(),
            parent_id: None,
        }
    }

    #[must_use]
    pub fn group(id: impl Into<String>, parent_id: Option<String>) -> Self {
        Self {
            kind: PeerKind::Group,
            id: id.into(),
            parent_id,
        }
    }

    #[must_use]
    pub fn channel(id: impl Into<String>, parent_id: Option<String>) -> Self {
        Self {
            kind: PeerKind::Channel,
            id: id.into(),
            parent_id,
        }
    }
}

/// Broad media category, used to look up per-channel media limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Audio,
    Video,
    Document,
}

impl MediaKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Document => "document",
        }
    }
}

/// Reference to an attachment held outside the core (URL or data URI).
///
/// The core never owns attachment bytes; it validates the declared size
/// against channel media limits and hands the reference to the adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub id: String,
    pub kind: MediaKind,
    pub url: String,
    pub mime_type: String,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

/// One ordered piece of message content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentSegment {
    Text { text: String },
    Attachment { attachment: AttachmentRef },
}

/// Markup language a channel accepts for formatted text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkupDialect {
    Html,
    Markdown,
    #[default]
    Plain,
}

/// Per-channel feature flags and limits, published by each plugin.
///
/// A copy travels inside every envelope so downstream consumers never need
/// a registry lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelCapabilities {
    #[serde(default)]
    pub supports_threads: bool,
    #[serde(default)]
    pub supports_reactions: bool,
    /// Replies can reference an earlier platform message id.
    #[serde(default)]
    pub supports_replies: bool,
    #[serde(default)]
    pub supports_polls: bool,
    #[serde(default)]
    pub supports_captions: bool,
    /// Attachments may be sent concurrently with text chunks.
    #[serde(default)]
    pub independent_attachments: bool,
    /// Chunk boundaries must not fall inside atomic markup tokens.
    #[serde(default)]
    pub markup_safe_chunking: bool,
    pub max_text_length: usize,
    #[serde(default)]
    pub markup: MarkupDialect,
}

impl Default for ChannelCapabilities {
    fn default() -> Self {
        Self {
            supports_threads: false,
            supports_reactions: false,
            supports_replies: false,
            supports_polls: false,
            supports_captions: false,
            independent_attachments: false,
            markup_safe_chunking: false,
            max_text_length: 4096,
            markup: MarkupDialect::Plain,
        }
    }
}

/// Identifies one channel account, the unit of connection lifecycle and
/// outbound send lanes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountRef {
    pub channel_id: String,
    pub account_id: String,
}

impl AccountRef {
    #[must_use]
    pub fn new(channel_id: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            account_id: account_id.into(),
        }
    }
}

impl std::fmt::Display for AccountRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.channel_id, self.account_id)
    }
}

/// Canonical form of one inbound message, independent of platform.
///
/// Created per inbound event, consumed once by routing; never persisted by
/// the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub id: Uuid,
    pub channel_id: String,
    pub account_id: String,
    pub peer: Peer,
    pub sender_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub segments: Vec<ContentSegment>,
    /// Platform thread the message arrived in, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    /// Platform message id, used for reply correlation on the way back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Copy of the channel's capability descriptor at normalization time.
    pub capabilities: ChannelCapabilities,
}

impl MessageEnvelope {
    #[must_use]
    pub fn account(&self) -> AccountRef {
        AccountRef::new(self.channel_id.clone(), self.account_id.clone())
    }

    /// Concatenated text of all text segments, in order.
    #[must_use]
    pub fn text(&self) -> String {
        let mut out = String::new();
        for seg in &self.segments {
            if let ContentSegment::Text { text } = seg {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(text);
            }
        }
        out
    }

    pub fn attachments(&self) -> impl Iterator<Item = &AttachmentRef> {
        self.segments.iter().filter_map(|seg| match seg {
            ContentSegment::Attachment { attachment } => Some(attachment),
            ContentSegment::Text { .. } => None,
        })
    }
}

/// Agent output addressed back to a channel peer, before chunking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub id: Uuid,
    pub channel_id: String,
    pub account_id: String,
    pub peer: Peer,
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
    /// Platform message id to attach a reply reference to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// Thread to continue, when the channel supports threading.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

impl OutboundMessage {
    /// Build a reply to `envelope`, carrying over thread and reply
    /// correlation from the inbound side.
    #[must_use]
    pub fn reply_to(envelope: &MessageEnvelope, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel_id: envelope.channel_id.clone(),
            account_id: envelope.account_id.clone(),
            peer: envelope.peer.clone(),
            text: text.into(),
            attachments: Vec::new(),
            reply_to: envelope.message_id.clone(),
            thread_id: envelope.thread_id.clone(),
        }
    }

    #[must_use]
    pub fn account(&self) -> AccountRef {
        AccountRef::new(self.channel_id.clone(), self.account_id.clone())
    }
}

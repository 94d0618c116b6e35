use {
    anyhow::Result,
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    serde_json::Value,
    std::time::Duration,
};

use trellis_common::{AttachmentRef, ChannelCapabilities, ContentSegment, Peer};

/// Platform-parsed inbound message, before the normalizer validates it and
/// stamps capability context. Produced by [`ChannelMessaging::parse_event`].
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub peer: Peer,
    pub sender_id: String,
    pub sender_name: Option<String>,
    /// Platform timestamp; the normalizer fills in "now" when absent.
    pub timestamp: Option<DateTime<Utc>>,
    pub segments: Vec<ContentSegment>,
    pub thread_id: Option<String>,
    /// Platform message id, kept for reply correlation.
    pub message_id: Option<String>,
}

/// Reply/thread correlation for an outbound send, already reduced to what
/// the target channel supports.
#[derive(Debug, Clone, Default)]
pub struct ReplyContext {
    pub reply_to: Option<String>,
    pub thread_id: Option<String>,
}

/// Result of a successful adapter send.
#[derive(Debug, Clone, Default)]
pub struct SentMessage {
    /// Platform id of the sent message, when the platform reports one.
    pub message_id: Option<String>,
}

/// Failure modes an outbound adapter reports. The delivery pipeline keys
/// its retry decisions off this classification.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// Platform asked us to back off; the whole account lane defers.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// Network/timeout class failure, worth retrying with backoff.
    #[error("transient send failure: {message}")]
    Transient { message: String },

    /// Payload rejected by the platform; retrying cannot help.
    #[error("send rejected: {message}")]
    Rejected { message: String },

    /// Credentials refused; terminal for this chunk.
    #[error("authentication failed: {message}")]
    Auth { message: String },
}

impl SendError {
    #[must_use]
    pub fn transient(message: impl std::fmt::Display) -> Self {
        Self::Transient {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn rejected(message: impl std::fmt::Display) -> Self {
        Self::Rejected {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn auth(message: impl std::fmt::Display) -> Self {
        Self::Auth {
            message: message.to_string(),
        }
    }

    /// Terminal errors short-circuit retries for the affected chunk only.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected { .. } | Self::Auth { .. })
    }
}

/// Channel account health snapshot.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChannelHealthSnapshot {
    pub connected: bool,
    pub account_id: String,
    pub details: Option<String>,
}

/// Connection lifecycle for a channel's accounts. Mandatory adapter.
#[async_trait]
pub trait ChannelGateway: Send + Sync {
    /// Open the platform connection for an account.
    async fn start_account(&self, account_id: &str, config: Value) -> Result<()>;

    /// Close the platform connection for an account.
    async fn stop_account(&self, account_id: &str) -> Result<()>;

    /// Probe account health.
    async fn probe(&self, account_id: &str) -> Result<ChannelHealthSnapshot>;
}

/// Platform event parsing and send-target normalization. Mandatory adapter.
///
/// Both operations are pure; all I/O belongs to the gateway and outbound
/// adapters.
pub trait ChannelMessaging: Send + Sync {
    /// Parse an opaque platform event into an [`InboundMessage`].
    fn parse_event(&self, account_id: &str, payload: &Value) -> Result<InboundMessage>;

    /// Normalize a user-supplied target (handle, raw id) into a [`Peer`].
    fn normalize_target(&self, raw: &str) -> Result<Peer>;
}

/// Send messages to a channel. Mandatory adapter.
#[async_trait]
pub trait ChannelOutbound: Send + Sync {
    /// Send one already-chunked, already-formatted text chunk.
    async fn send_text(
        &self,
        account_id: &str,
        to: &Peer,
        text: &str,
        reply: &ReplyContext,
    ) -> std::result::Result<SentMessage, SendError>;

    /// Send one attachment, with an optional caption where supported.
    async fn send_attachment(
        &self,
        account_id: &str,
        to: &Peer,
        attachment: &AttachmentRef,
        caption: Option<&str>,
        reply: &ReplyContext,
    ) -> std::result::Result<SentMessage, SendError>;

    /// Send a "typing" indicator. No-op by default.
    async fn send_typing(
        &self,
        _account_id: &str,
        _to: &Peer,
    ) -> std::result::Result<(), SendError> {
        Ok(())
    }
}

// ── Optional adapters ───────────────────────────────────────────────────────

/// Validate account configuration before start.
pub trait ChannelConfig: Send + Sync {
    fn validate_config(&self, config: &Value) -> Result<()>;
}

/// Interactive first-run setup (token exchange, QR pairing bootstrap).
#[async_trait]
pub trait ChannelSetup: Send + Sync {
    async fn begin_setup(&self, account_id: &str) -> Result<Value>;
}

/// Per-account inbound access policy.
pub trait ChannelSecurity: Send + Sync {
    fn access_policy(&self, account_id: &str) -> crate::gating::AccessPolicy;
}

/// Device pairing/confirmation codes.
#[async_trait]
pub trait ChannelPairing: Send + Sync {
    async fn confirm_pairing(&self, account_id: &str, code: &str) -> Result<bool>;
}

/// Enumerate peers visible to an account.
#[async_trait]
pub trait ChannelDirectory: Send + Sync {
    async fn list_peers(&self, account_id: &str) -> Result<Vec<Peer>>;
}

/// Resolve free-form handles ("@name") to peers.
#[async_trait]
pub trait ChannelResolver: Send + Sync {
    async fn resolve_handle(&self, account_id: &str, handle: &str) -> Result<Option<Peer>>;
}

/// Group membership queries.
#[async_trait]
pub trait ChannelGroups: Send + Sync {
    async fn group_members(&self, account_id: &str, group_id: &str) -> Result<Vec<String>>;
}

/// Thread management, for platforms that can open threads on demand.
#[async_trait]
pub trait ChannelThreading: Send + Sync {
    /// Open a thread under `peer`, returning its platform thread id.
    async fn open_thread(&self, account_id: &str, peer: &Peer, title: &str) -> Result<String>;
}

/// Message-level actions (reactions, pinning).
#[async_trait]
pub trait ChannelActions: Send + Sync {
    async fn react(
        &self,
        account_id: &str,
        peer: &Peer,
        message_id: &str,
        emoji: &str,
    ) -> Result<()>;
}

/// Core channel plugin trait. Each messaging platform implements this.
///
/// Mandatory adapters return `Option` so the registry can reject an
/// incomplete bundle at registration time instead of panicking at call
/// time; a registered plugin is guaranteed to have all three.
pub trait ChannelPlugin: Send + Sync {
    /// Channel identifier (e.g. "telegram", "discord").
    fn id(&self) -> &str;

    /// Human-readable channel name.
    fn name(&self) -> &str;

    /// Capability descriptor for this channel.
    fn capabilities(&self) -> ChannelCapabilities;

    // Mandatory adapters, validated at registration.
    fn gateway(&self) -> Option<&dyn ChannelGateway>;
    fn messaging(&self) -> Option<&dyn ChannelMessaging>;
    fn outbound(&self) -> Option<&dyn ChannelOutbound>;

    // Optional adapters.
    fn config(&self) -> Option<&dyn ChannelConfig> {
        None
    }
    fn setup(&self) -> Option<&dyn ChannelSetup> {
        None
    }
    fn security(&self) -> Option<&dyn ChannelSecurity> {
        None
    }
    fn pairing(&self) -> Option<&dyn ChannelPairing> {
        None
    }
    fn directory(&self) -> Option<&dyn ChannelDirectory> {
        None
    }
    fn resolver(&self) -> Option<&dyn ChannelResolver> {
        None
    }
    fn groups(&self) -> Option<&dyn ChannelGroups> {
        None
    }
    fn threading(&self) -> Option<&dyn ChannelThreading> {
        None
    }
    fn actions(&self) -> Option<&dyn ChannelActions> {
        None
    }
}

//! Shared types used across all trellis crates.
//!
//! The canonical envelope and outbound message forms live here so that the
//! plugin contract, routing engine, and delivery pipeline agree on one
//! platform-independent representation.

pub mod types;

pub use types::{
    AccountRef, AttachmentRef, ChannelCapabilities, ContentSegment, MarkupDialect, MediaKind,
    MessageEnvelope, OutboundMessage, Peer, PeerKind,
};

/// Seconds since the Unix epoch, saturating at zero on clock skew.
#[must_use]
pub fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

//! Attachment validation against per-channel media limits.

use {
    std::collections::HashMap,
    trellis_common::{AttachmentRef, MediaKind},
    crate::receipt::FailureKind,
};

/// Limits one channel enforces for one media kind.
#[derive(Clone, Debug, Default)]
pub struct MediaConstraints {
    pub max_size_bytes: Option<u64>,
    pub max_duration_secs: Option<u64>,
    /// Accepted mime types; empty means anything goes.
    pub formats: Vec<String>,
}

/// Lookup of media constraints by channel and kind. Channels without an
/// entry accept everything.
pub trait MediaLimits: Send + Sync {
    fn constraints(&self, channel_id: &str, kind: MediaKind) -> Option<MediaConstraints>;
}

/// Table-backed limits, built once at startup.
#[derive(Clone, Debug, Default)]
pub struct StaticMediaLimits {
    table: HashMap<(String, MediaKind), MediaConstraints>,
}

impl StaticMediaLimits {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(
        mut self,
        channel_id: impl Into<String>,
        kind: MediaKind,
        constraints: MediaConstraints,
    ) -> Self {
        self.table.insert((channel_id.into(), kind), constraints);
        self
    }
}

impl MediaLimits for StaticMediaLimits {
    fn constraints(&self, channel_id: &str, kind: MediaKind) -> Option<MediaConstraints> {
        self.table.get(&(channel_id.to_string(), kind)).cloned()
    }
}

/// Check one attachment against channel limits before any send attempt.
/// Returns the failure that should be recorded, or `None` when the
/// attachment is acceptable.
pub(crate) fn check_attachment(
    limits: &dyn MediaLimits,
    channel_id: &str,
    attachment: &AttachmentRef,
) -> Option<(FailureKind, String)> {
    let constraints = limits.constraints(channel_id, attachment.kind)?;

    if let Some(max) = constraints.max_size_bytes {
        if attachment.size_bytes > max {
            return Some((
                FailureKind::SizeExceeded,
                format!("{} bytes exceeds limit of {max}", attachment.size_bytes),
            ));
        }
    }

    if !constraints.formats.is_empty()
        && !constraints.formats.iter().any(|f| f == &attachment.mime_type)
    {
        return Some((
            FailureKind::Terminal,
            format!("unsupported format {}", attachment.mime_type),
        ));
    }

    None
}

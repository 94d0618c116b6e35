//! Per-item delivery accounting.

use {
    chrono::{DateTime, Utc},
    serde::Serialize,
    trellis_common::AccountRef,
    uuid::Uuid,
};

/// Why an item ended in `Failed`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The channel rejected the item and a retry cannot help.
    Terminal,
    /// Transient failures persisted through every allowed attempt.
    Exhausted,
    /// An attachment exceeded the channel's size or format limits.
    SizeExceeded,
    /// Rate limiting persisted through every allowed attempt.
    RateLimited,
    /// The account was stopped while the item was pending.
    ChannelStopped,
    /// The account was not running when delivery was attempted.
    ChannelUnavailable,
    /// The send queue stayed full past the configured timeout.
    QueueTimeout,
}

/// Lifecycle of a single chunk or attachment.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum ItemStatus {
    Pending,
    Sent,
    Retrying,
    Failed { kind: FailureKind },
}

impl ItemStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::Failed { .. })
    }
}

/// What a receipt entry tracks.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ItemKind {
    /// Ordinal position of the text chunk within the message.
    TextChunk { index: usize },
    Attachment { id: String },
}

#[derive(Clone, Debug, Serialize)]
pub struct ReceiptEntry {
    pub kind:       ItemKind,
    pub status:     ItemStatus,
    /// Send attempts consumed, including the successful one.
    pub attempts:   u32,
    pub updated_at: DateTime<Utc>,
    /// Channel-provided detail for failures, when available.
    pub detail:     Option<String>,
}

impl ReceiptEntry {
    #[must_use]
    pub fn pending(kind: ItemKind) -> Self {
        Self {
            kind,
            status: ItemStatus::Pending,
            attempts: 0,
            updated_at: Utc::now(),
            detail: None,
        }
    }

    pub fn set_status(&mut self, status: ItemStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// Outcome of delivering one outbound message. Every chunk and attachment
/// the message expanded into has exactly one entry, in send order.
#[derive(Clone, Debug, Serialize)]
pub struct DeliveryReceipt {
    pub outbound_id: Uuid,
    pub account:     AccountRef,
    pub entries:     Vec<ReceiptEntry>,
    pub started_at:  DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl DeliveryReceipt {
    /// A receipt where every item failed the same way, used when delivery
    /// could not start at all.
    #[must_use]
    pub fn all_failed(
        outbound_id: Uuid,
        account: AccountRef,
        kinds: Vec<ItemKind>,
        failure: FailureKind,
    ) -> Self {
        let now = Utc::now();
        let entries = kinds
            .into_iter()
            .map(|kind| ReceiptEntry {
                kind,
                status: ItemStatus::Failed { kind: failure },
                attempts: 0,
                updated_at: now,
                detail: None,
            })
            .collect();
        Self {
            outbound_id,
            account,
            entries,
            started_at: now,
            finished_at: now,
        }
    }

    #[must_use]
    pub fn all_sent(&self) -> bool {
        self.entries.iter().all(|e| e.status == ItemStatus::Sent)
    }

    #[must_use]
    pub fn sent_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.status == ItemStatus::Sent)
            .count()
    }

    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.status, ItemStatus::Failed { .. }))
            .count()
    }
}

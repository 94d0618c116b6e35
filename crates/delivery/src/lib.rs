//! Outbound delivery pipeline.
//!
//! Takes an [`trellis_common::OutboundMessage`], chunks and formats it for
//! the target channel's capabilities, validates attachments against media
//! limits, and drives every chunk/attachment through a per-item retry state
//! machine to a terminal status. Partial success is a first-class outcome:
//! the pipeline never fails a whole message atomically, it reports a
//! per-item [`DeliveryReceipt`].
//!
//! Sends for one channel account flow through a bounded [`SendLane`], which
//! preserves chunk order, applies backpressure, and turns a stop into
//! `ChannelStopped` receipts for queued-but-unissued work.

pub mod chunk;
pub mod error;
pub mod format;
pub mod media;
pub mod pipeline;
pub mod queue;
pub mod receipt;
pub mod retry;

pub use {
    chunk::chunk_text,
    error::{Error, Result},
    format::render_markup,
    media::{MediaConstraints, MediaLimits, StaticMediaLimits},
    pipeline::DeliveryPipeline,
    queue::SendLane,
    receipt::{DeliveryReceipt, FailureKind, ItemKind, ItemStatus, ReceiptEntry},
    retry::{RetryDecision, RetryPolicy},
};

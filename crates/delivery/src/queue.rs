//! Per-account send lanes.
//!
//! Every channel account gets one bounded lane. Messages queue in arrival
//! order and a single worker drives them through the pipeline one at a
//! time, so chunk order is preserved across messages too. A full queue
//! pushes back on the caller instead of buffering without bound.

use {
    std::{sync::Arc, time::Duration},
    tokio::sync::{mpsc, oneshot},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info},
    trellis_channels::ChannelOutbound,
    trellis_common::{AccountRef, ChannelCapabilities, OutboundMessage},
    crate::{
        chunk::chunk_text,
        error::{Error, Result},
        format::render_markup,
        pipeline::DeliveryPipeline,
        receipt::{DeliveryReceipt, FailureKind, ItemKind},
    },
};

struct Job {
    outbound: OutboundMessage,
    reply_tx: oneshot::Sender<DeliveryReceipt>,
}

/// Bounded, ordered send queue for one channel account.
pub struct SendLane {
    account:       AccountRef,
    tx:            mpsc::Sender<Job>,
    cancel:        CancellationToken,
    queue_timeout: Duration,
}

impl SendLane {
    /// Start the lane worker. The lane owns its cancellation token; `stop`
    /// fails everything still queued while in-flight sends finish.
    #[must_use]
    pub fn spawn(
        account: AccountRef,
        capabilities: ChannelCapabilities,
        adapter: Arc<dyn ChannelOutbound>,
        pipeline: Arc<DeliveryPipeline>,
        queue_capacity: usize,
        queue_timeout: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let cancel = CancellationToken::new();

        tokio::spawn(run_worker(
            account.clone(),
            capabilities,
            adapter,
            pipeline,
            rx,
            cancel.clone(),
        ));

        Self {
            account,
            tx,
            cancel,
            queue_timeout,
        }
    }

    /// Queue a message and wait for its receipt.
    ///
    /// Fails with `QueueTimeout` when the queue stays full past the
    /// configured timeout, and with `ChannelStopped` when the lane has
    /// been stopped.
    pub async fn submit(&self, outbound: OutboundMessage) -> Result<DeliveryReceipt> {
        if self.cancel.is_cancelled() {
            return Err(Error::ChannelStopped {
                account: self.account.clone(),
            });
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let job = Job { outbound, reply_tx };

        match self.tx.send_timeout(job, self.queue_timeout).await {
            Ok(()) => {},
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => {
                return Err(Error::QueueTimeout {
                    account: self.account.clone(),
                });
            },
            Err(mpsc::error::SendTimeoutError::Closed(_)) => {
                return Err(Error::ChannelStopped {
                    account: self.account.clone(),
                });
            },
        }

        reply_rx.await.map_err(|_| Error::ChannelStopped {
            account: self.account.clone(),
        })
    }

    /// Stop the lane. A send already handed to the adapter runs to
    /// completion; every queued message gets a `ChannelStopped` receipt.
    pub fn stop(&self) {
        info!(account = %self.account, "stopping send lane");
        self.cancel.cancel();
    }

    #[must_use]
    pub fn account(&self) -> &AccountRef {
        &self.account
    }
}

async fn run_worker(
    account: AccountRef,
    capabilities: ChannelCapabilities,
    adapter: Arc<dyn ChannelOutbound>,
    pipeline: Arc<DeliveryPipeline>,
    mut rx: mpsc::Receiver<Job>,
    cancel: CancellationToken,
) {
    loop {
        let job = tokio::select! {
            () = cancel.cancelled() => break,
            job = rx.recv() => match job {
                Some(job) => job,
                None => return,
            },
        };

        let receipt = pipeline
            .deliver(&job.outbound, &capabilities, adapter.as_ref(), &cancel)
            .await;
        // Receiver gone means the submitter gave up; nothing to do.
        let _ = job.reply_tx.send(receipt);
    }

    // Stopped: fail queued-but-unissued work instead of dropping it.
    rx.close();
    let mut drained = 0usize;
    while let Ok(job) = rx.try_recv() {
        let kinds = queued_item_kinds(&job.outbound, &capabilities);
        let receipt = DeliveryReceipt::all_failed(
            job.outbound.id,
            account.clone(),
            kinds,
            FailureKind::ChannelStopped,
        );
        let _ = job.reply_tx.send(receipt);
        drained += 1;
    }
    debug!(account = %account, drained, "send lane worker exited");
}

/// Item inventory for a message that never reached the pipeline.
fn queued_item_kinds(outbound: &OutboundMessage, caps: &ChannelCapabilities) -> Vec<ItemKind> {
    let rendered = render_markup(&outbound.text, caps.markup);
    let chunks = chunk_text(&rendered, caps.max_text_length, caps.markup_safe_chunking);
    let mut kinds: Vec<ItemKind> = (0..chunks.len())
        .map(|index| ItemKind::TextChunk { index })
        .collect();
    kinds.extend(outbound.attachments.iter().map(|a| ItemKind::Attachment {
        id: a.id.clone(),
    }));
    kinds
}

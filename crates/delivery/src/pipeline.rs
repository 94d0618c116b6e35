//! Chunked, retried delivery of one outbound message.

use {
    chrono::Utc,
    futures::future::join_all,
    std::sync::Arc,
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
    trellis_channels::{ChannelOutbound, ReplyContext, SendError, SentMessage},
    trellis_common::{ChannelCapabilities, OutboundMessage},
    crate::{
        chunk::chunk_text,
        format::render_markup,
        media::{MediaLimits, check_attachment},
        receipt::{DeliveryReceipt, FailureKind, ItemKind, ItemStatus, ReceiptEntry},
        retry::{RetryDecision, RetryPolicy},
    },
};

/// Drives one outbound message to a terminal per-item state.
///
/// Text chunks go out strictly in order. Attachments follow the text, in
/// parallel when the channel's capabilities allow it. A failed item never
/// aborts its siblings. Cancellation never tears down a send already
/// handed to the adapter; it fails items not yet issued as
/// `ChannelStopped` and cuts backoff waits short.
pub struct DeliveryPipeline {
    policy: RetryPolicy,
    media_limits: Arc<dyn MediaLimits>,
}

impl DeliveryPipeline {
    #[must_use]
    pub fn new(policy: RetryPolicy, media_limits: Arc<dyn MediaLimits>) -> Self {
        Self {
            policy,
            media_limits,
        }
    }

    pub async fn deliver(
        &self,
        outbound: &OutboundMessage,
        caps: &ChannelCapabilities,
        adapter: &dyn ChannelOutbound,
        cancel: &CancellationToken,
    ) -> DeliveryReceipt {
        let started_at = Utc::now();
        let account = outbound.account();

        let rendered = render_markup(&outbound.text, caps.markup);
        let chunks = chunk_text(&rendered, caps.max_text_length, caps.markup_safe_chunking);

        let reply = ReplyContext {
            reply_to: if caps.supports_replies {
                outbound.reply_to.clone()
            } else {
                None
            },
            thread_id: if caps.supports_threads {
                outbound.thread_id.clone()
            } else {
                None
            },
        };

        // Single attachment with at most one chunk of text collapses into
        // a captioned attachment send where the channel supports captions.
        let caption_path =
            caps.supports_captions && outbound.attachments.len() == 1 && chunks.len() <= 1;

        if !chunks.is_empty() || !outbound.attachments.is_empty() {
            // Best effort; a failed indicator never affects delivery.
            if let Err(e) = adapter
                .send_typing(&outbound.account_id, &outbound.peer)
                .await
            {
                debug!(account = %account, error = %e, "typing indicator failed");
            }
        }

        let mut entries = Vec::new();

        if caption_path {
            let attachment = &outbound.attachments[0];
            let caption = chunks.first().map(String::as_str);
            let mut entry = ReceiptEntry::pending(ItemKind::Attachment {
                id: attachment.id.clone(),
            });
            if let Some((kind, detail)) =
                check_attachment(self.media_limits.as_ref(), &outbound.channel_id, attachment)
            {
                entry.set_status(ItemStatus::Failed { kind });
                entry.detail = Some(detail);
            } else {
                self.run_item(&mut entry, cancel, || {
                    adapter.send_attachment(
                        &outbound.account_id,
                        &outbound.peer,
                        attachment,
                        caption,
                        &reply,
                    )
                })
                .await;
            }
            entries.push(entry);
        } else {
            for (index, chunk) in chunks.iter().enumerate() {
                let mut entry = ReceiptEntry::pending(ItemKind::TextChunk { index });
                if cancel.is_cancelled() {
                    entry.set_status(ItemStatus::Failed {
                        kind: FailureKind::ChannelStopped,
                    });
                    entries.push(entry);
                    continue;
                }
                self.run_item(&mut entry, cancel, || {
                    adapter.send_text(&outbound.account_id, &outbound.peer, chunk, &reply)
                })
                .await;
                entries.push(entry);
            }

            let mut attachment_entries = Vec::new();
            let mut pending = Vec::new();
            for attachment in &outbound.attachments {
                let mut entry = ReceiptEntry::pending(ItemKind::Attachment {
                    id: attachment.id.clone(),
                });
                if let Some((kind, detail)) = check_attachment(
                    self.media_limits.as_ref(),
                    &outbound.channel_id,
                    attachment,
                ) {
                    entry.set_status(ItemStatus::Failed { kind });
                    entry.detail = Some(detail);
                    attachment_entries.push(entry);
                } else {
                    pending.push((entry, attachment));
                }
            }

            if caps.independent_attachments {
                let sends = pending.into_iter().map(|(mut entry, attachment)| {
                    let reply = reply.clone();
                    async move {
                        self.run_item(&mut entry, cancel, || {
                            adapter.send_attachment(
                                &outbound.account_id,
                                &outbound.peer,
                                attachment,
                                None,
                                &reply,
                            )
                        })
                        .await;
                        entry
                    }
                });
                attachment_entries.extend(join_all(sends).await);
            } else {
                for (mut entry, attachment) in pending {
                    if cancel.is_cancelled() {
                        entry.set_status(ItemStatus::Failed {
                            kind: FailureKind::ChannelStopped,
                        });
                        attachment_entries.push(entry);
                        continue;
                    }
                    self.run_item(&mut entry, cancel, || {
                        adapter.send_attachment(
                            &outbound.account_id,
                            &outbound.peer,
                            attachment,
                            None,
                            &reply,
                        )
                    })
                    .await;
                    attachment_entries.push(entry);
                }
            }
            entries.extend(attachment_entries);
        }

        let receipt = DeliveryReceipt {
            outbound_id: outbound.id,
            account,
            entries,
            started_at,
            finished_at: Utc::now(),
        };

        if receipt.all_sent() {
            debug!(
                account = %receipt.account,
                items = receipt.entries.len(),
                "delivery complete"
            );
        } else {
            warn!(
                account = %receipt.account,
                sent = receipt.sent_count(),
                failed = receipt.failed_count(),
                "delivery finished with failures"
            );
        }
        receipt
    }

    /// Drive one item through send attempts until its status is terminal.
    ///
    /// A send already handed to the adapter runs to completion and its
    /// real outcome is recorded; cancellation only takes effect before
    /// an attempt is issued and during backoff waits.
    async fn run_item<F, Fut>(&self, entry: &mut ReceiptEntry, cancel: &CancellationToken, send: F)
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<SentMessage, SendError>>,
    {
        loop {
            if cancel.is_cancelled() {
                entry.set_status(ItemStatus::Failed {
                    kind: FailureKind::ChannelStopped,
                });
                return;
            }
            entry.attempts += 1;

            match send().await {
                Ok(_) => {
                    entry.set_status(ItemStatus::Sent);
                    return;
                },
                Err(error) => match self.policy.classify(&error, entry.attempts) {
                    RetryDecision::RetryAfter(delay) | RetryDecision::Defer(delay) => {
                        entry.set_status(ItemStatus::Retrying);
                        entry.detail = Some(error.to_string());
                        tokio::select! {
                            () = tokio::time::sleep(delay) => {},
                            () = cancel.cancelled() => {
                                entry.set_status(ItemStatus::Failed {
                                    kind: FailureKind::ChannelStopped,
                                });
                                return;
                            },
                        }
                    },
                    RetryDecision::Fail(kind) => {
                        entry.set_status(ItemStatus::Failed { kind });
                        entry.detail = Some(error.to_string());
                        return;
                    },
                },
            }
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        async_trait::async_trait,
        std::{
            sync::{
                Mutex,
                atomic::{AtomicU32, Ordering},
            },
            time::Duration,
        },
        trellis_channels::ReplyContext,
        trellis_common::{AttachmentRef, MarkupDialect, MediaKind, Peer},
        trellis_config::DeliveryConfig,
        uuid::Uuid,
        crate::media::{MediaConstraints, StaticMediaLimits},
    };

    /// Scripted adapter: each text send pops the next result from the
    /// script; attachments always succeed unless `fail_attachments`.
    struct ScriptedAdapter {
        script: Mutex<Vec<Result<(), SendError>>>,
        sent: Mutex<Vec<String>>,
        calls: AtomicU32,
    }

    impl ScriptedAdapter {
        fn new(script: Vec<Result<(), SendError>>) -> Self {
            Self {
                script: Mutex::new(script),
                sent: Mutex::new(Vec::new()),
                calls: AtomicU32::new(0),
            }
        }

        fn always_ok() -> Self {
            Self::new(Vec::new())
        }

        fn next(&self) -> Result<(), SendError> {
            let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
            if script.is_empty() {
                Ok(())
            } else {
                script.remove(0)
            }
        }
    }

    #[async_trait]
    impl ChannelOutbound for ScriptedAdapter {
        async fn send_text(
            &self,
            _account_id: &str,
            _to: &Peer,
            text: &str,
            _reply: &ReplyContext,
        ) -> Result<SentMessage, SendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.next().map(|()| {
                self.sent
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(text.to_string());
                SentMessage::default()
            })
        }

        async fn send_attachment(
            &self,
            _account_id: &str,
            _to: &Peer,
            attachment: &AttachmentRef,
            caption: Option<&str>,
            _reply: &ReplyContext,
        ) -> Result<SentMessage, SendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.next().map(|()| {
                let label = match caption {
                    Some(c) => format!("{}+{c}", attachment.id),
                    None => attachment.id.clone(),
                };
                self.sent
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(label);
                SentMessage::default()
            })
        }
    }

    fn pipeline() -> DeliveryPipeline {
        let config = DeliveryConfig {
            max_attempts: 3,
            base_backoff_ms: 1,
            max_backoff_ms: 10,
            ..DeliveryConfig::default()
        };
        DeliveryPipeline::new(
            RetryPolicy::from_config(&config),
            Arc::new(StaticMediaLimits::new()),
        )
    }

    fn outbound(text: &str) -> OutboundMessage {
        OutboundMessage {
            id: Uuid::new_v4(),
            channel_id: "mock".into(),
            account_id: "a1".into(),
            peer: Peer::direct("u1"),
            text: text.into(),
            attachments: Vec::new(),
            reply_to: None,
            thread_id: None,
        }
    }

    fn attachment(id: &str, size: u64) -> AttachmentRef {
        AttachmentRef {
            id: id.into(),
            kind: MediaKind::Image,
            url: format!("https://files/{id}"),
            mime_type: "image/png".into(),
            size_bytes: size,
            file_name: None,
        }
    }

    fn caps() -> ChannelCapabilities {
        ChannelCapabilities {
            max_text_length: 20,
            markup: MarkupDialect::Plain,
            ..ChannelCapabilities::default()
        }
    }

    #[tokio::test]
    async fn single_chunk_success() {
        let adapter = ScriptedAdapter::always_ok();
        let receipt = pipeline()
            .deliver(
                &outbound("hello"),
                &caps(),
                &adapter,
                &CancellationToken::new(),
            )
            .await;
        assert!(receipt.all_sent());
        assert_eq!(receipt.entries.len(), 1);
        assert_eq!(receipt.entries[0].attempts, 1);
    }

    #[tokio::test]
    async fn chunks_are_sent_in_order() {
        let adapter = ScriptedAdapter::always_ok();
        let msg = outbound("first part here and second part here and third part");
        let receipt = pipeline()
            .deliver(&msg, &caps(), &adapter, &CancellationToken::new())
            .await;
        assert!(receipt.all_sent());
        let sent = adapter.sent.lock().unwrap().clone();
        assert!(sent.len() >= 3);
        assert!(sent[0].starts_with("first"));
    }

    #[tokio::test]
    async fn partial_failure_spares_siblings() {
        // Chunk 2 of 3 is rejected; 1 and 3 still go out.
        let adapter = ScriptedAdapter::new(vec![
            Ok(()),
            Err(SendError::rejected("bad content")),
            Ok(()),
        ]);
        let msg = outbound("first part here and second part here and third part");
        let receipt = pipeline()
            .deliver(&msg, &caps(), &adapter, &CancellationToken::new())
            .await;
        assert_eq!(receipt.sent_count(), 2);
        assert_eq!(receipt.failed_count(), 1);
        assert_eq!(
            receipt.entries[1].status,
            ItemStatus::Failed {
                kind: FailureKind::Terminal
            }
        );
    }

    #[tokio::test]
    async fn transient_failures_retry_to_success() {
        let adapter = ScriptedAdapter::new(vec![
            Err(SendError::transient("blip")),
            Err(SendError::transient("blip")),
            Ok(()),
        ]);
        let receipt = pipeline()
            .deliver(
                &outbound("hello"),
                &caps(),
                &adapter,
                &CancellationToken::new(),
            )
            .await;
        assert!(receipt.all_sent());
        assert_eq!(receipt.entries[0].attempts, 3);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_rate_limited() {
        let rl = || SendError::RateLimited {
            retry_after: Duration::from_millis(1),
        };
        let adapter = ScriptedAdapter::new(vec![Err(rl()), Err(rl()), Err(rl())]);
        let receipt = pipeline()
            .deliver(
                &outbound("hello"),
                &caps(),
                &adapter,
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(
            receipt.entries[0].status,
            ItemStatus::Failed {
                kind: FailureKind::RateLimited
            }
        );
        assert_eq!(receipt.entries[0].attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_defers_for_the_channel_window() {
        let adapter = ScriptedAdapter::new(vec![
            Err(SendError::RateLimited {
                retry_after: Duration::from_secs(5),
            }),
            Ok(()),
        ]);
        let start = tokio::time::Instant::now();
        let receipt = pipeline()
            .deliver(
                &outbound("hello"),
                &caps(),
                &adapter,
                &CancellationToken::new(),
            )
            .await;
        assert!(receipt.all_sent());
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn oversized_attachment_fails_alone() {
        let limits = StaticMediaLimits::new().with(
            "mock",
            MediaKind::Image,
            MediaConstraints {
                max_size_bytes: Some(1024),
                ..MediaConstraints::default()
            },
        );
        let config = DeliveryConfig::default();
        let pipeline = DeliveryPipeline::new(RetryPolicy::from_config(&config), Arc::new(limits));

        let mut msg = outbound("hello");
        msg.attachments = vec![attachment("big", 4096), attachment("ok", 512)];
        let adapter = ScriptedAdapter::always_ok();
        let receipt = pipeline
            .deliver(&msg, &caps(), &adapter, &CancellationToken::new())
            .await;

        // Text chunk + small attachment sent; the oversized one failed.
        assert_eq!(receipt.sent_count(), 2);
        let failed = receipt
            .entries
            .iter()
            .find(|e| e.kind == ItemKind::Attachment { id: "big".into() })
            .unwrap();
        assert_eq!(
            failed.status,
            ItemStatus::Failed {
                kind: FailureKind::SizeExceeded
            }
        );
    }

    #[tokio::test]
    async fn caption_fast_path_collapses_to_one_send() {
        let mut capabilities = caps();
        capabilities.supports_captions = true;
        let mut msg = outbound("short caption");
        msg.attachments = vec![attachment("photo", 100)];

        let adapter = ScriptedAdapter::always_ok();
        let receipt = pipeline()
            .deliver(&msg, &capabilities, &adapter, &CancellationToken::new())
            .await;

        assert_eq!(receipt.entries.len(), 1);
        assert!(receipt.all_sent());
        let sent = adapter.sent.lock().unwrap().clone();
        assert_eq!(sent, vec!["photo+short caption"]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_marks_pending_items_stopped() {
        // First chunk hits a long rate-limit wait; cancel during it.
        let adapter = ScriptedAdapter::new(vec![Err(SendError::RateLimited {
            retry_after: Duration::from_secs(3600),
        })]);
        let cancel = CancellationToken::new();
        let msg = outbound("first part here and second part here and third part");

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let receipt = pipeline().deliver(&msg, &caps(), &adapter, &cancel).await;
        assert_eq!(receipt.sent_count(), 0);
        for entry in &receipt.entries {
            assert_eq!(
                entry.status,
                ItemStatus::Failed {
                    kind: FailureKind::ChannelStopped
                }
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn issued_send_finishes_after_cancellation() {
        struct SlowAdapter {
            sent: Mutex<Vec<String>>,
        }

        #[async_trait]
        impl ChannelOutbound for SlowAdapter {
            async fn send_text(
                &self,
                _account_id: &str,
                _to: &Peer,
                text: &str,
                _reply: &ReplyContext,
            ) -> Result<SentMessage, SendError> {
                tokio::time::sleep(Duration::from_secs(2)).await;
                self.sent
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(text.to_string());
                Ok(SentMessage::default())
            }

            async fn send_attachment(
                &self,
                _account_id: &str,
                _to: &Peer,
                _attachment: &AttachmentRef,
                _caption: Option<&str>,
                _reply: &ReplyContext,
            ) -> Result<SentMessage, SendError> {
                Ok(SentMessage::default())
            }
        }

        let adapter = SlowAdapter {
            sent: Mutex::new(Vec::new()),
        };
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            canceller.cancel();
        });

        // Two chunks: the first is already in the adapter when the stop
        // lands, the second has not been issued yet.
        let msg = outbound("first chunk here and second one");
        let receipt = pipeline().deliver(&msg, &caps(), &adapter, &cancel).await;

        assert_eq!(receipt.entries[0].status, ItemStatus::Sent);
        assert_eq!(
            receipt.entries[1].status,
            ItemStatus::Failed {
                kind: FailureKind::ChannelStopped
            }
        );
        assert_eq!(adapter.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reply_context_respects_capabilities() {
        struct CaptureReply {
            seen: Mutex<Option<ReplyContext>>,
        }

        #[async_trait]
        impl ChannelOutbound for CaptureReply {
            async fn send_text(
                &self,
                _account_id: &str,
                _to: &Peer,
                _text: &str,
                reply: &ReplyContext,
            ) -> Result<SentMessage, SendError> {
                *self.seen.lock().unwrap_or_else(|e| e.into_inner()) = Some(reply.clone());
                Ok(SentMessage::default())
            }

            async fn send_attachment(
                &self,
                _account_id: &str,
                _to: &Peer,
                _attachment: &AttachmentRef,
                _caption: Option<&str>,
                _reply: &ReplyContext,
            ) -> Result<SentMessage, SendError> {
                Ok(SentMessage::default())
            }
        }

        let adapter = CaptureReply {
            seen: Mutex::new(None),
        };
        let mut msg = outbound("hi");
        msg.reply_to = Some("m42".into());
        msg.thread_id = Some("t7".into());

        // Replies unsupported: the reference must be dropped, not passed.
        let receipt = pipeline()
            .deliver(&msg, &caps(), &adapter, &CancellationToken::new())
            .await;
        assert!(receipt.all_sent());
        let seen = adapter.seen.lock().unwrap().clone().unwrap();
        assert_eq!(seen.reply_to, None);
        assert_eq!(seen.thread_id, None);

        let mut capabilities = caps();
        capabilities.supports_replies = true;
        capabilities.supports_threads = true;
        pipeline()
            .deliver(&msg, &capabilities, &adapter, &CancellationToken::new())
            .await;
        let seen = adapter.seen.lock().unwrap().clone().unwrap();
        assert_eq!(seen.reply_to.as_deref(), Some("m42"));
        assert_eq!(seen.thread_id.as_deref(), Some("t7"));
    }
}

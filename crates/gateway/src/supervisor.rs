//! Channel account lifecycle and outbound send supervision.
//!
//! Each account moves through a small state machine; only `Running` and
//! `Degraded` accounts accept outbound work. Failures are tracked in a
//! sliding window per account, so one misbehaving account degrades alone
//! while its siblings keep flowing.

use {
    async_trait::async_trait,
    dashmap::DashMap,
    serde::Serialize,
    serde_json::Value,
    std::{collections::VecDeque, sync::Arc, time::Duration},
    tracing::{info, warn},
    trellis_channels::{
        ChannelHealthSnapshot, ChannelOutbound, ChannelPlugin, ChannelRegistry, ReplyContext,
        SendError, SentMessage,
    },
    trellis_common::{AccountRef, AttachmentRef, OutboundMessage, Peer, unix_now},
    trellis_config::{DeliveryConfig, SupervisorConfig},
    trellis_delivery::{DeliveryPipeline, DeliveryReceipt, MediaLimits, RetryPolicy, SendLane},
    crate::error::{Error, Result},
};

/// Lifecycle state of one channel account.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountState {
    Stopped,
    Starting,
    Running,
    /// Connected but erroring above the configured threshold.
    Degraded,
    Failed,
    Stopping,
}

impl AccountState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Degraded => "degraded",
            Self::Failed => "failed",
            Self::Stopping => "stopping",
        }
    }

    /// Only running and degraded accounts accept outbound work.
    #[must_use]
    pub fn accepts_sends(&self) -> bool {
        matches!(self, Self::Running | Self::Degraded)
    }
}

impl std::fmt::Display for AccountState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sliding window of send outcomes for degradation detection.
#[derive(Debug)]
struct ErrorWindow {
    events: VecDeque<(i64, bool)>,
    window_secs: u64,
    min_samples: usize,
    threshold: f64,
}

impl ErrorWindow {
    fn new(config: &SupervisorConfig) -> Self {
        Self {
            events: VecDeque::new(),
            window_secs: config.error_window_secs,
            min_samples: config.min_window_samples as usize,
            threshold: config.degraded_error_rate,
        }
    }

    fn record(&mut self, ok: bool, now: i64) {
        self.events.push_back((now, ok));
        self.prune(now);
    }

    fn prune(&mut self, now: i64) {
        let cutoff = now - self.window_secs as i64;
        while let Some(&(ts, _)) = self.events.front() {
            if ts < cutoff {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }

    /// Error rate over the window, once enough samples exist.
    fn error_rate(&mut self, now: i64) -> Option<f64> {
        self.prune(now);
        if self.events.len() < self.min_samples {
            return None;
        }
        let failures = self.events.iter().filter(|(_, ok)| !ok).count();
        Some(failures as f64 / self.events.len() as f64)
    }

    fn is_degraded(&mut self, now: i64) -> bool {
        self.error_rate(now)
            .is_some_and(|rate| rate >= self.threshold)
    }
}

struct AccountEntry {
    plugin: Arc<dyn ChannelPlugin>,
    state: AccountState,
    window: ErrorWindow,
    lane: Option<Arc<SendLane>>,
    /// Human-readable reason for a `Failed` state.
    failure: Option<String>,
}

/// Health of one supervised account.
#[derive(Debug, Serialize)]
pub struct AccountHealth {
    pub account: AccountRef,
    pub state: AccountState,
    pub error_rate: Option<f64>,
    pub failure: Option<String>,
    pub probe: Option<ChannelHealthSnapshot>,
}

/// Point-in-time gateway health.
#[derive(Debug, Serialize)]
pub struct GatewayHealth {
    pub accounts: Vec<AccountHealth>,
}

/// Bridges a registered plugin's outbound adapter into an owned handle
/// the send lane can keep.
struct PluginOutbound {
    plugin: Arc<dyn ChannelPlugin>,
}

#[async_trait]
impl ChannelOutbound for PluginOutbound {
    async fn send_text(
        &self,
        account_id: &str,
        to: &Peer,
        text: &str,
        reply: &ReplyContext,
    ) -> std::result::Result<SentMessage, SendError> {
        match self.plugin.outbound() {
            Some(outbound) => outbound.send_text(account_id, to, text, reply).await,
            // Registration validates the adapter; this is unreachable for
            // plugins that came through the registry.
            None => Err(SendError::rejected("plugin has no outbound adapter")),
        }
    }

    async fn send_attachment(
        &self,
        account_id: &str,
        to: &Peer,
        attachment: &AttachmentRef,
        caption: Option<&str>,
        reply: &ReplyContext,
    ) -> std::result::Result<SentMessage, SendError> {
        match self.plugin.outbound() {
            Some(outbound) => {
                outbound
                    .send_attachment(account_id, to, attachment, caption, reply)
                    .await
            },
            None => Err(SendError::rejected("plugin has no outbound adapter")),
        }
    }

    async fn send_typing(
        &self,
        account_id: &str,
        to: &Peer,
    ) -> std::result::Result<(), SendError> {
        match self.plugin.outbound() {
            Some(outbound) => outbound.send_typing(account_id, to).await,
            None => Ok(()),
        }
    }
}

/// Supervises channel accounts: lifecycle transitions, per-account send
/// lanes, and degradation tracking.
pub struct ChannelSupervisor {
    registry: Arc<ChannelRegistry>,
    accounts: DashMap<AccountRef, AccountEntry>,
    pipeline: Arc<DeliveryPipeline>,
    supervisor_config: SupervisorConfig,
    queue_capacity: usize,
    queue_timeout: Duration,
}

impl ChannelSupervisor {
    #[must_use]
    pub fn new(
        registry: Arc<ChannelRegistry>,
        delivery: &DeliveryConfig,
        supervisor_config: SupervisorConfig,
        media_limits: Arc<dyn MediaLimits>,
    ) -> Self {
        Self {
            registry,
            accounts: DashMap::new(),
            pipeline: Arc::new(DeliveryPipeline::new(
                RetryPolicy::from_config(delivery),
                media_limits,
            )),
            supervisor_config,
            queue_capacity: delivery.queue_capacity,
            queue_timeout: Duration::from_millis(delivery.queue_timeout_ms),
        }
    }

    /// Start one channel account and open its send lane.
    pub async fn start_account(
        &self,
        channel_id: &str,
        account_id: &str,
        config: Value,
    ) -> Result<()> {
        let plugin = self
            .registry
            .get(channel_id)
            .ok_or_else(|| Error::UnknownChannel {
                channel_id: channel_id.to_string(),
            })?;
        let account = AccountRef {
            channel_id: channel_id.to_string(),
            account_id: account_id.to_string(),
        };

        {
            let mut entry = self
                .accounts
                .entry(account.clone())
                .or_insert_with(|| AccountEntry {
                    plugin: plugin.clone(),
                    state: AccountState::Stopped,
                    window: ErrorWindow::new(&self.supervisor_config),
                    lane: None,
                    failure: None,
                });
            match entry.state {
                AccountState::Stopped | AccountState::Failed => {
                    entry.state = AccountState::Starting;
                    entry.failure = None;
                },
                from => {
                    return Err(Error::InvalidTransition {
                        account,
                        from: from.as_str(),
                        to: AccountState::Starting.as_str(),
                    });
                },
            }
        }

        info!(account = %account, "starting channel account");
        let started = match plugin.gateway() {
            Some(gateway) => gateway.start_account(account_id, config).await,
            None => Err(anyhow::anyhow!("plugin has no gateway adapter")),
        };

        match started {
            Ok(()) => {
                let superseded = match self.accounts.get_mut(&account) {
                    Some(mut entry) if entry.state == AccountState::Starting => {
                        entry.state = AccountState::Running;
                        entry.lane = Some(Arc::new(SendLane::spawn(
                            account.clone(),
                            plugin.capabilities(),
                            Arc::new(PluginOutbound {
                                plugin: plugin.clone(),
                            }),
                            self.pipeline.clone(),
                            self.queue_capacity,
                            self.queue_timeout,
                        )));
                        false
                    },
                    _ => true,
                };
                if superseded {
                    // A stop arrived while the platform connection was
                    // opening; close it again and leave the account down.
                    if let Some(gateway) = plugin.gateway() {
                        if let Err(e) = gateway.stop_account(account_id).await {
                            warn!(account = %account, error = %e, "stop after superseded start reported an error");
                        }
                    }
                    info!(account = %account, "start superseded by stop");
                    return Ok(());
                }
                info!(account = %account, "channel account running");
                Ok(())
            },
            Err(e) => {
                if let Some(mut entry) = self.accounts.get_mut(&account)
                    && entry.state == AccountState::Starting
                {
                    entry.state = AccountState::Failed;
                    entry.failure = Some(e.to_string());
                }
                warn!(account = %account, error = %e, "channel account failed to start");
                Err(Error::Adapter(e))
            },
        }
    }

    /// Stop one account: cancel its lane, close the platform connection.
    pub async fn stop_account(&self, account: &AccountRef) -> Result<()> {
        let (plugin, lane) = {
            let mut entry =
                self.accounts
                    .get_mut(account)
                    .ok_or_else(|| Error::AccountNotFound {
                        account: account.clone(),
                    })?;
            match entry.state {
                // A stop racing an in-flight start wins; the start path
                // notices the state change and closes its connection.
                AccountState::Starting
                | AccountState::Running
                | AccountState::Degraded
                | AccountState::Failed => {
                    entry.state = AccountState::Stopping;
                },
                AccountState::Stopped => return Ok(()),
                from => {
                    return Err(Error::InvalidTransition {
                        account: account.clone(),
                        from: from.as_str(),
                        to: AccountState::Stopping.as_str(),
                    });
                },
            }
            (entry.plugin.clone(), entry.lane.take())
        };

        if let Some(lane) = lane {
            lane.stop();
        }
        if let Some(gateway) = plugin.gateway() {
            if let Err(e) = gateway.stop_account(&account.account_id).await {
                warn!(account = %account, error = %e, "stop_account reported an error");
            }
        }
        if let Some(mut entry) = self.accounts.get_mut(account) {
            entry.state = AccountState::Stopped;
        }
        info!(account = %account, "channel account stopped");
        Ok(())
    }

    /// Queue an outbound message on its account's lane.
    ///
    /// Short-circuits with `ChannelUnavailable` when the account is not
    /// accepting sends, without consuming queue capacity.
    pub async fn send(&self, outbound: OutboundMessage) -> Result<DeliveryReceipt> {
        let account = outbound.account();
        let lane = {
            let entry = self
                .accounts
                .get(&account)
                .ok_or_else(|| Error::AccountNotFound {
                    account: account.clone(),
                })?;
            if !entry.state.accepts_sends() {
                return Err(Error::Delivery(
                    trellis_delivery::Error::ChannelUnavailable {
                        account: account.clone(),
                    },
                ));
            }
            entry.lane.clone().ok_or_else(|| {
                Error::Delivery(trellis_delivery::Error::ChannelUnavailable {
                    account: account.clone(),
                })
            })?
        };

        let receipt = lane.submit(outbound).await?;
        self.record_outcome(&account, receipt.failed_count() == 0);
        Ok(receipt)
    }

    /// Feed one send outcome into the account's error window and apply
    /// the Running/Degraded transition it implies.
    pub fn record_outcome(&self, account: &AccountRef, ok: bool) {
        let Some(mut entry) = self.accounts.get_mut(account) else {
            return;
        };
        let now = unix_now();
        entry.window.record(ok, now);
        let degraded = entry.window.is_degraded(now);
        match (entry.state, degraded) {
            (AccountState::Running, true) => {
                entry.state = AccountState::Degraded;
                warn!(
                    account = %account,
                    rate = entry.window.error_rate(now),
                    "account degraded"
                );
            },
            (AccountState::Degraded, false) => {
                entry.state = AccountState::Running;
                info!(account = %account, "account recovered");
            },
            _ => {},
        }
    }

    #[must_use]
    pub fn account_state(&self, account: &AccountRef) -> Option<AccountState> {
        self.accounts.get(account).map(|e| e.state)
    }

    /// Snapshot every supervised account, probing live connections.
    pub async fn health(&self) -> GatewayHealth {
        let mut targets = Vec::new();
        for mut entry in self.accounts.iter_mut() {
            let now = unix_now();
            let account = entry.key().clone();
            let rate = entry.window.error_rate(now);
            targets.push((
                account,
                entry.state,
                rate,
                entry.failure.clone(),
                entry.plugin.clone(),
            ));
        }

        let mut accounts = Vec::with_capacity(targets.len());
        for (account, state, error_rate, failure, plugin) in targets {
            let probe = if state.accepts_sends() {
                match plugin.gateway() {
                    Some(gateway) => gateway.probe(&account.account_id).await.ok(),
                    None => None,
                }
            } else {
                None
            };
            accounts.push(AccountHealth {
                account,
                state,
                error_rate,
                failure,
                probe,
            });
        }
        GatewayHealth { accounts }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        trellis_channels::testutil::{MockPlugin, MockPluginSpec},
        trellis_common::Peer,
        uuid::Uuid,
    };

    fn supervisor_with(plugin: MockPlugin) -> ChannelSupervisor {
        let registry = Arc::new(ChannelRegistry::new());
        registry.register(Arc::new(plugin)).unwrap();
        ChannelSupervisor::new(
            registry,
            &DeliveryConfig::default(),
            SupervisorConfig::default(),
            Arc::new(trellis_delivery::StaticMediaLimits::new()),
        )
    }

    fn outbound(channel: &str, account: &str) -> OutboundMessage {
        OutboundMessage {
            id: Uuid::new_v4(),
            channel_id: channel.into(),
            account_id: account.into(),
            peer: Peer::direct("u1"),
            text: "hello".into(),
            attachments: Vec::new(),
            reply_to: None,
            thread_id: None,
        }
    }

    #[tokio::test]
    async fn start_transitions_to_running() {
        let sup = supervisor_with(MockPlugin::new(MockPluginSpec::complete("mock")));
        sup.start_account("mock", "a1", Value::Null).await.unwrap();
        let account = AccountRef {
            channel_id: "mock".into(),
            account_id: "a1".into(),
        };
        assert_eq!(sup.account_state(&account), Some(AccountState::Running));
    }

    #[tokio::test]
    async fn unknown_channel_is_rejected() {
        let sup = supervisor_with(MockPlugin::new(MockPluginSpec::complete("mock")));
        let err = sup
            .start_account("nope", "a1", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownChannel { .. }));
    }

    #[tokio::test]
    async fn double_start_is_an_invalid_transition() {
        let sup = supervisor_with(MockPlugin::new(MockPluginSpec::complete("mock")));
        sup.start_account("mock", "a1", Value::Null).await.unwrap();
        let err = sup
            .start_account("mock", "a1", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn stop_while_starting_wins_the_race() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let mut spec = MockPluginSpec::complete("mock");
        spec.start_gate = Some(gate.clone());
        let sup = Arc::new(supervisor_with(MockPlugin::new(spec)));

        let starter = sup.clone();
        let starting =
            tokio::spawn(async move { starter.start_account("mock", "a1", Value::Null).await });
        tokio::task::yield_now().await;

        let account = AccountRef::new("mock", "a1");
        assert_eq!(sup.account_state(&account), Some(AccountState::Starting));
        sup.stop_account(&account).await.unwrap();
        assert_eq!(sup.account_state(&account), Some(AccountState::Stopped));

        // Let the in-flight start finish; the stop still wins.
        gate.notify_one();
        starting.await.unwrap().unwrap();
        assert_eq!(sup.account_state(&account), Some(AccountState::Stopped));
        let err = sup.send(outbound("mock", "a1")).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Delivery(trellis_delivery::Error::ChannelUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn send_to_stopped_account_is_unavailable() {
        let sup = supervisor_with(MockPlugin::new(MockPluginSpec::complete("mock")));
        sup.start_account("mock", "a1", Value::Null).await.unwrap();
        let account = AccountRef {
            channel_id: "mock".into(),
            account_id: "a1".into(),
        };
        sup.stop_account(&account).await.unwrap();
        assert_eq!(sup.account_state(&account), Some(AccountState::Stopped));

        let err = sup.send(outbound("mock", "a1")).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Delivery(trellis_delivery::Error::ChannelUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn send_to_unknown_account_is_not_found() {
        let sup = supervisor_with(MockPlugin::new(MockPluginSpec::complete("mock")));
        let err = sup.send(outbound("mock", "ghost")).await.unwrap_err();
        assert!(matches!(err, Error::AccountNotFound { .. }));
    }

    #[tokio::test]
    async fn running_account_delivers() {
        let sup = supervisor_with(MockPlugin::new(MockPluginSpec::complete("mock")));
        sup.start_account("mock", "a1", Value::Null).await.unwrap();
        let receipt = sup.send(outbound("mock", "a1")).await.unwrap();
        assert!(receipt.all_sent());
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let sup = supervisor_with(MockPlugin::new(MockPluginSpec::complete("mock")));
        sup.start_account("mock", "a1", Value::Null).await.unwrap();
        let account = AccountRef {
            channel_id: "mock".into(),
            account_id: "a1".into(),
        };
        sup.stop_account(&account).await.unwrap();
        sup.stop_account(&account).await.unwrap();
        assert_eq!(sup.account_state(&account), Some(AccountState::Stopped));
    }

    #[tokio::test]
    async fn restart_after_stop_works() {
        let sup = supervisor_with(MockPlugin::new(MockPluginSpec::complete("mock")));
        sup.start_account("mock", "a1", Value::Null).await.unwrap();
        let account = AccountRef {
            channel_id: "mock".into(),
            account_id: "a1".into(),
        };
        sup.stop_account(&account).await.unwrap();
        sup.start_account("mock", "a1", Value::Null).await.unwrap();
        assert_eq!(sup.account_state(&account), Some(AccountState::Running));
        assert!(sup.send(outbound("mock", "a1")).await.unwrap().all_sent());
    }

    #[tokio::test]
    async fn error_window_degrades_and_recovers() {
        let sup = supervisor_with(MockPlugin::new(MockPluginSpec::complete("mock")));
        sup.start_account("mock", "a1", Value::Null).await.unwrap();
        let account = AccountRef {
            channel_id: "mock".into(),
            account_id: "a1".into(),
        };

        // Default thresholds: 5 samples minimum, 50% failure rate.
        for _ in 0..5 {
            sup.record_outcome(&account, false);
        }
        assert_eq!(sup.account_state(&account), Some(AccountState::Degraded));

        for _ in 0..10 {
            sup.record_outcome(&account, true);
        }
        assert_eq!(sup.account_state(&account), Some(AccountState::Running));
    }

    #[tokio::test]
    async fn degradation_is_isolated_per_account() {
        let sup = supervisor_with(MockPlugin::new(MockPluginSpec::complete("mock")));
        sup.start_account("mock", "a1", Value::Null).await.unwrap();
        sup.start_account("mock", "a2", Value::Null).await.unwrap();

        let a1 = AccountRef {
            channel_id: "mock".into(),
            account_id: "a1".into(),
        };
        let a2 = AccountRef {
            channel_id: "mock".into(),
            account_id: "a2".into(),
        };
        for _ in 0..5 {
            sup.record_outcome(&a1, false);
        }
        assert_eq!(sup.account_state(&a1), Some(AccountState::Degraded));
        assert_eq!(sup.account_state(&a2), Some(AccountState::Running));

        // The degraded sibling still accepts sends; the healthy one is
        // untouched.
        assert!(sup.send(outbound("mock", "a1")).await.is_ok());
        assert!(sup.send(outbound("mock", "a2")).await.unwrap().all_sent());
    }

    #[tokio::test]
    async fn health_reports_every_account() {
        let sup = supervisor_with(MockPlugin::new(MockPluginSpec::complete("mock")));
        sup.start_account("mock", "a1", Value::Null).await.unwrap();
        sup.start_account("mock", "a2", Value::Null).await.unwrap();

        let health = sup.health().await;
        assert_eq!(health.accounts.len(), 2);
        for account in &health.accounts {
            assert_eq!(account.state, AccountState::Running);
            assert!(account.probe.as_ref().is_some_and(|p| p.connected));
        }
    }
}

//! Inbound event dispatch.
//!
//! One platform event travels: parse/normalize, access gating, binding
//! resolution, session addressing, agent turn, reply delivery. Turns for
//! the same session run one at a time; turns for different sessions are
//! free to interleave.

use {
    dashmap::DashMap,
    serde_json::Value,
    std::sync::Arc,
    tokio::sync::Mutex,
    tracing::{debug, info, warn},
    trellis_channels::{AccessDecision, AccessPolicy, ChannelRegistry, normalize_event},
    trellis_common::{MessageEnvelope, OutboundMessage},
    trellis_delivery::DeliveryReceipt,
    trellis_routing::{AgentTarget, SharedBindings, resolve_agent},
    trellis_sessions::{SessionKey, SessionStore},
    crate::{
        agent::AgentRuntime,
        error::{Error, Result},
        supervisor::ChannelSupervisor,
    },
};

/// Drives inbound platform events to agent replies.
pub struct InboundDispatcher {
    registry: Arc<ChannelRegistry>,
    bindings: Arc<SharedBindings>,
    sessions: Arc<dyn SessionStore>,
    agent: Arc<dyn AgentRuntime>,
    supervisor: Arc<ChannelSupervisor>,
    /// Bot handle used for group mention detection, without the `@`.
    bot_handle: Option<String>,
    turn_locks: DashMap<SessionKey, Arc<Mutex<()>>>,
}

impl InboundDispatcher {
    #[must_use]
    pub fn new(
        registry: Arc<ChannelRegistry>,
        bindings: Arc<SharedBindings>,
        sessions: Arc<dyn SessionStore>,
        agent: Arc<dyn AgentRuntime>,
        supervisor: Arc<ChannelSupervisor>,
    ) -> Self {
        Self {
            registry,
            bindings,
            sessions,
            agent,
            supervisor,
            bot_handle: None,
            turn_locks: DashMap::new(),
        }
    }

    #[must_use]
    pub fn with_bot_handle(mut self, handle: impl Into<String>) -> Self {
        self.bot_handle = Some(handle.into());
        self
    }

    /// Handle one raw platform event.
    ///
    /// Returns `Ok(None)` when the message was dropped on purpose (access
    /// gating, empty agent reply); errors are reserved for faults.
    pub async fn handle_event(
        &self,
        channel_id: &str,
        account_id: &str,
        payload: &Value,
    ) -> Result<Option<DeliveryReceipt>> {
        let plugin = self
            .registry
            .get(channel_id)
            .ok_or_else(|| Error::UnknownChannel {
                channel_id: channel_id.to_string(),
            })?;

        let envelope = normalize_event(plugin.as_ref(), account_id, payload)?;

        let policy = plugin
            .security()
            .map_or_else(AccessPolicy::default, |s| s.access_policy(account_id));
        let mentioned = self.is_mentioned(&envelope);
        if let AccessDecision::Deny { reason } =
            policy.evaluate(&envelope.peer, &envelope.sender_id, mentioned)
        {
            debug!(
                channel_id,
                account_id,
                sender_id = %envelope.sender_id,
                reason,
                "inbound message gated"
            );
            return Ok(None);
        }

        let target = resolve_agent(&envelope, &self.bindings.load())?;
        let session_key = SessionKey::for_envelope(&target.agent_id, &envelope);
        let handle = self.sessions.get_or_create(&session_key).await?;
        if handle.created {
            info!(session_key = %session_key, "session opened");
        }
        self.sessions.touch(&session_key).await?;

        let outcome = self.run_turn(&session_key, &target, &envelope).await;
        // Drop the lock slot once the last turn for this session is done,
        // otherwise the map grows by one mutex per conversation ever seen.
        self.turn_locks
            .remove_if(&session_key, |_, lock| Arc::strong_count(lock) == 1);
        outcome
    }

    /// One turn at a time per session; other sessions interleave freely.
    async fn run_turn(
        &self,
        session_key: &SessionKey,
        target: &AgentTarget,
        envelope: &MessageEnvelope,
    ) -> Result<Option<DeliveryReceipt>> {
        let lock = self
            .turn_locks
            .entry(session_key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _turn = lock.lock().await;

        let reply = self
            .agent
            .handle(session_key, target, envelope)
            .await
            .map_err(Error::Agent)?;
        if reply.trim().is_empty() {
            debug!(session_key = %session_key, "agent returned no reply");
            return Ok(None);
        }

        let outbound = OutboundMessage::reply_to(envelope, reply);
        let receipt = self.supervisor.send(outbound).await?;
        if !receipt.all_sent() {
            warn!(
                session_key = %session_key,
                failed = receipt.failed_count(),
                "reply delivered partially"
            );
        }
        Ok(Some(receipt))
    }

    fn is_mentioned(&self, envelope: &MessageEnvelope) -> bool {
        let Some(handle) = &self.bot_handle else {
            return false;
        };
        let needle = format!("@{}", handle.to_lowercase());
        envelope.text().to_lowercase().contains(&needle)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        async_trait::async_trait,
        serde_json::json,
        trellis_channels::testutil::{MockPlugin, MockPluginSpec},
        trellis_config::{DeliveryConfig, SupervisorConfig, TrellisConfig},
        trellis_delivery::StaticMediaLimits,
        trellis_routing::Bindings,
        trellis_sessions::MemorySessionStore,
    };

    struct ScriptedAgent {
        reply: String,
    }

    #[async_trait]
    impl AgentRuntime for ScriptedAgent {
        async fn handle(
            &self,
            _session: &SessionKey,
            target: &AgentTarget,
            envelope: &MessageEnvelope,
        ) -> anyhow::Result<String> {
            if self.reply.is_empty() {
                return Ok(String::new());
            }
            Ok(format!("{}: {} ({})", target.agent_id, self.reply, envelope.text()))
        }
    }

    struct Fixture {
        dispatcher: InboundDispatcher,
        sessions: Arc<MemorySessionStore>,
        supervisor: Arc<ChannelSupervisor>,
    }

    async fn fixture(reply: &str, default_agent: Option<&str>) -> Fixture {
        let registry = Arc::new(ChannelRegistry::new());
        registry
            .register(Arc::new(MockPlugin::new(MockPluginSpec::complete("mock"))))
            .unwrap();

        let supervisor = Arc::new(ChannelSupervisor::new(
            registry.clone(),
            &DeliveryConfig::default(),
            SupervisorConfig::default(),
            Arc::new(StaticMediaLimits::new()),
        ));
        supervisor
            .start_account("mock", "a1", Value::Null)
            .await
            .unwrap();

        let config = TrellisConfig {
            default_agent: default_agent.map(str::to_string),
            ..TrellisConfig::default()
        };
        let bindings = Arc::new(SharedBindings::new(Bindings::from_config(&config)));
        let sessions = Arc::new(MemorySessionStore::new());

        let dispatcher = InboundDispatcher::new(
            registry,
            bindings,
            sessions.clone(),
            Arc::new(ScriptedAgent {
                reply: reply.to_string(),
            }),
            supervisor.clone(),
        )
        .with_bot_handle("trellis");

        Fixture {
            dispatcher,
            sessions,
            supervisor,
        }
    }

    fn dm_event(sender: &str, text: &str) -> Value {
        json!({
            "peer_kind": "direct",
            "peer_id": sender,
            "sender_id": sender,
            "text": text,
            "message_id": "m1",
        })
    }

    #[tokio::test]
    async fn direct_message_round_trips_to_a_receipt() {
        let fx = fixture("hi", Some("helper")).await;
        let receipt = fx
            .dispatcher
            .handle_event("mock", "a1", &dm_event("u1", "hello"))
            .await
            .unwrap()
            .expect("expected a delivery receipt");
        assert!(receipt.all_sent());
        assert_eq!(fx.sessions.len(), 1);
    }

    #[tokio::test]
    async fn same_peer_reuses_the_session() {
        let fx = fixture("hi", Some("helper")).await;
        for _ in 0..3 {
            fx.dispatcher
                .handle_event("mock", "a1", &dm_event("u1", "hello"))
                .await
                .unwrap();
        }
        assert_eq!(fx.sessions.len(), 1);

        fx.dispatcher
            .handle_event("mock", "a1", &dm_event("u2", "hello"))
            .await
            .unwrap();
        assert_eq!(fx.sessions.len(), 2);
    }

    #[tokio::test]
    async fn turn_lock_slot_is_dropped_after_the_turn() {
        let fx = fixture("hi", Some("helper")).await;
        for _ in 0..3 {
            fx.dispatcher
                .handle_event("mock", "a1", &dm_event("u1", "hello"))
                .await
                .unwrap();
        }
        fx.dispatcher
            .handle_event("mock", "a1", &dm_event("u2", "hello"))
            .await
            .unwrap();

        // Sessions persist; the serialization map does not.
        assert_eq!(fx.sessions.len(), 2);
        assert!(fx.dispatcher.turn_locks.is_empty());
    }

    #[tokio::test]
    async fn unmentioned_group_message_is_gated() {
        let fx = fixture("hi", Some("helper")).await;
        let event = json!({
            "peer_kind": "group",
            "peer_id": "g1",
            "sender_id": "u1",
            "text": "just chatting",
        });
        let out = fx
            .dispatcher
            .handle_event("mock", "a1", &event)
            .await
            .unwrap();
        assert!(out.is_none());
        assert_eq!(fx.sessions.len(), 0);
    }

    #[tokio::test]
    async fn mentioned_group_message_goes_through() {
        let fx = fixture("hi", Some("helper")).await;
        let event = json!({
            "peer_kind": "group",
            "peer_id": "g1",
            "sender_id": "u1",
            "text": "hey @Trellis, help?",
        });
        let out = fx
            .dispatcher
            .handle_event("mock", "a1", &event)
            .await
            .unwrap();
        assert!(out.is_some());
    }

    #[tokio::test]
    async fn unroutable_message_is_an_error() {
        let fx = fixture("hi", None).await;
        let err = fx
            .dispatcher
            .handle_event("mock", "a1", &dm_event("u1", "hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Routing(_)));
    }

    #[tokio::test]
    async fn malformed_event_is_an_error() {
        let fx = fixture("hi", Some("helper")).await;
        let err = fx
            .dispatcher
            .handle_event("mock", "a1", &json!({"malformed": true}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Channel(_)));
    }

    #[tokio::test]
    async fn unknown_channel_is_an_error() {
        let fx = fixture("hi", Some("helper")).await;
        let err = fx
            .dispatcher
            .handle_event("ghost", "a1", &dm_event("u1", "hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownChannel { .. }));
    }

    #[tokio::test]
    async fn empty_agent_reply_sends_nothing() {
        let fx = fixture("", Some("helper")).await;
        let out = fx
            .dispatcher
            .handle_event("mock", "a1", &dm_event("u1", "hello"))
            .await
            .unwrap();
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn stopped_account_fails_delivery_not_dispatch() {
        let fx = fixture("hi", Some("helper")).await;
        let account = trellis_common::AccountRef::new("mock", "a1");
        fx.supervisor.stop_account(&account).await.unwrap();

        let err = fx
            .dispatcher
            .handle_event("mock", "a1", &dm_event("u1", "hello"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Delivery(trellis_delivery::Error::ChannelUnavailable { .. })
        ));
        // The turn still addressed its session before delivery failed.
        assert_eq!(fx.sessions.len(), 1);
    }
}

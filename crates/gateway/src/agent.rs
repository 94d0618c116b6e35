use {
    async_trait::async_trait,
    trellis_common::MessageEnvelope,
    trellis_routing::AgentTarget,
    trellis_sessions::SessionKey,
};

/// Seam to the agent backend.
///
/// The dispatcher hands over the resolved target, the session the
/// conversation belongs to, and the normalized envelope; the runtime
/// returns the reply text in canonical markdown. Everything about model
/// execution lives behind this trait.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    async fn handle(
        &self,
        session: &SessionKey,
        target: &AgentTarget,
        envelope: &MessageEnvelope,
    ) -> anyhow::Result<String>;
}

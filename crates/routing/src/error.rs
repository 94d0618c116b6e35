pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No binding tier matched and no default agent is configured. The
    /// message is dropped; the condition is surfaced for observability but
    /// is not fatal.
    #[error("no binding matched message on {channel_id}/{account_id} from peer '{peer_id}'")]
    Unrouted {
        channel_id: String,
        account_id: String,
        peer_id: String,
    },

    /// A binding definition could not be turned into a match rule.
    #[error("invalid binding for agent '{agent_id}': {reason}")]
    InvalidBinding { agent_id: String, reason: String },
}

impl Error {
    #[must_use]
    pub fn invalid_binding(agent_id: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::InvalidBinding {
            agent_id: agent_id.into(),
            reason: reason.to_string(),
        }
    }
}

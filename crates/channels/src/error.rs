/// Crate-wide result type for channel operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed channel errors shared across channel traits.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A plugin failed contract validation and was rejected from the
    /// registry. Other plugins are unaffected.
    #[error("plugin contract violation in '{plugin_id}': {reason}")]
    ContractViolation { plugin_id: String, reason: String },

    /// An inbound event could not be normalized; the message is dropped.
    #[error("normalization failed on {channel_id}/{account_id}: {reason}")]
    Normalization {
        channel_id: String,
        account_id: String,
        reason: String,
    },

    /// No plugin is registered under the given channel id.
    #[error("unknown channel: {channel_id}")]
    UnknownChannel { channel_id: String },

    /// JSON (de)serialization failed.
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

impl Error {
    #[must_use]
    pub fn contract_violation(plugin_id: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::ContractViolation {
            plugin_id: plugin_id.into(),
            reason: reason.to_string(),
        }
    }

    #[must_use]
    pub fn normalization(
        channel_id: impl Into<String>,
        account_id: impl Into<String>,
        reason: impl std::fmt::Display,
    ) -> Self {
        Self::Normalization {
            channel_id: channel_id.into(),
            account_id: account_id.into(),
            reason: reason.to_string(),
        }
    }

    #[must_use]
    pub fn unknown_channel(channel_id: impl Into<String>) -> Self {
        Self::UnknownChannel {
            channel_id: channel_id.into(),
        }
    }
}

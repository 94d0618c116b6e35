use trellis_common::AccountRef;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures raised before delivery starts. Per-item failures during
/// delivery are reported in the receipt, not here.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The target account is not running; the send was short-circuited.
    #[error("channel {account} is unavailable")]
    ChannelUnavailable { account: AccountRef },

    /// The bounded send queue stayed full past the configured timeout.
    #[error("send queue for {account} timed out")]
    QueueTimeout { account: AccountRef },

    /// The lane was stopped before the message could be queued.
    #[error("channel {account} stopped")]
    ChannelStopped { account: AccountRef },
}

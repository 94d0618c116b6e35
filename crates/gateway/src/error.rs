use trellis_common::AccountRef;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown channel '{channel_id}'")]
    UnknownChannel { channel_id: String },

    #[error("account {account} is not registered")]
    AccountNotFound { account: AccountRef },

    #[error("account {account} cannot move from {from} to {to}")]
    InvalidTransition {
        account: AccountRef,
        from:    &'static str,
        to:      &'static str,
    },

    #[error(transparent)]
    Channel(#[from] trellis_channels::Error),

    #[error(transparent)]
    Routing(#[from] trellis_routing::Error),

    #[error(transparent)]
    Delivery(#[from] trellis_delivery::Error),

    #[error("session store: {0}")]
    Session(#[from] trellis_sessions::Error),

    #[error("agent runtime: {0}")]
    Agent(#[source] anyhow::Error),

    #[error("channel adapter: {0}")]
    Adapter(#[source] anyhow::Error),
}

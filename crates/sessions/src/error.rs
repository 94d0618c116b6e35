pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The external store failed; the message carries the backend reason.
    #[error("session store failure: {0}")]
    Store(String),
}

impl Error {
    #[must_use]
    pub fn store(reason: impl std::fmt::Display) -> Self {
        Self::Store(reason.to_string())
    }
}

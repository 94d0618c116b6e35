use std::{
    collections::HashMap,
    sync::RwLock,
    time::{SystemTime, UNIX_EPOCH},
};

use {async_trait::async_trait, tracing::debug};

use crate::{Result, SessionKey};

/// Lightweight handle the store returns for an addressed session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub key: SessionKey,
    /// Whether this call created the session.
    pub created: bool,
    pub last_active: i64,
}

/// Addressing contract to the external session/state store.
///
/// The core only addresses sessions; history, compaction, and persistence
/// live behind this trait, owned externally.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Ensure a session exists for `key` and return its handle.
    async fn get_or_create(&self, key: &SessionKey) -> Result<SessionHandle>;

    /// Mark a session as active now.
    async fn touch(&self, key: &SessionKey) -> Result<()>;

    /// Retire a session. Idempotent; retiring an unknown key is a no-op.
    async fn retire(&self, key: &SessionKey) -> Result<()>;
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// In-memory store for embedding and tests. Not durable by design.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<SessionKey, i64>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get_or_create(&self, key: &SessionKey) -> Result<SessionHandle> {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        let now = unix_now();
        let created = !sessions.contains_key(key);
        let last_active = *sessions.entry(key.clone()).or_insert(now);
        if created {
            debug!(session_key = %key, "session created");
        }
        Ok(SessionHandle {
            key: key.clone(),
            created,
            last_active,
        })
    }

    async fn touch(&self, key: &SessionKey) -> Result<()> {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.insert(key.clone(), unix_now());
        Ok(())
    }

    async fn retire(&self, key: &SessionKey) -> Result<()> {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        if sessions.remove(key).is_some() {
            debug!(session_key = %key, "session retired");
        }
        Ok(())
    }
}

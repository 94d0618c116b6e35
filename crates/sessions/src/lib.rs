//! Session addressing.
//!
//! The core holds no conversation state: it derives a stable composite
//! [`SessionKey`] for every (agent, channel, account, chat type, peer)
//! tuple and talks to an external store through the [`SessionStore`]
//! addressing contract. Identical tuples always produce identical keys, so
//! external storage can be swapped without affecting routing or delivery.

pub mod error;
pub mod key;
pub mod store;

pub use {
    error::{Error, Result},
    key::SessionKey,
    store::{MemorySessionStore, SessionHandle, SessionStore},
};

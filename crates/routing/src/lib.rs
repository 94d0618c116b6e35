//! Route inbound messages to agents.
//!
//! Binding cascade (precedence, first match within a tier wins, definition
//! order is the in-tier tie-break):
//! 1. Exact peer binding (channel + account-or-wildcard + peer kind/id)
//! 2. Parent-scoped binding (guild/team id, no peer id constraint)
//! 3. Account binding (channel + exact account)
//! 4. Channel binding (channel + wildcard account)
//! 5. Default agent (`default_agent`)
//!
//! Resolution is a pure function of `(envelope, snapshot)`; the snapshot is
//! immutable and swapped whole on reload, so an in-flight decision never
//! sees a torn binding list.

pub mod binding;
pub mod error;
pub mod resolve;

pub use {
    binding::{AgentTarget, Binding, Bindings, PeerSelector, SharedBindings},
    error::{Error, Result},
    resolve::resolve_agent,
};

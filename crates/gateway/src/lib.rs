//! Gateway orchestration.
//!
//! Wires the registry, router, session store, and delivery lanes into a
//! running service: the [`ChannelSupervisor`] owns channel account
//! lifecycles and outbound lanes, and the [`InboundDispatcher`] carries a
//! platform event all the way to an agent reply.

pub mod agent;
pub mod dispatch;
pub mod error;
pub mod supervisor;

pub use {
    agent::AgentRuntime,
    dispatch::InboundDispatcher,
    error::{Error, Result},
    supervisor::{AccountHealth, AccountState, ChannelSupervisor, GatewayHealth},
};

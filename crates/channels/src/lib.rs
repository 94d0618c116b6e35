//! Channel plugin contract and registry.
//!
//! Each messaging platform integration implements [`ChannelPlugin`] with
//! mandatory adapters for gateway lifecycle, outbound delivery, and
//! messaging (event parsing / target normalization), plus optional adapters
//! for setup, security, threading, and friends. The registry validates the
//! contract at registration time and hands out immutable snapshots so
//! concurrent readers never observe a partial reload.

pub mod error;
pub mod gating;
pub mod normalize;
pub mod plugin;
pub mod registry;
pub mod testutil;

pub use {
    error::{Error, Result},
    gating::{AccessDecision, AccessPolicy, DmPolicy, GroupPolicy, MentionMode},
    normalize::normalize_event,
    plugin::{
        ChannelGateway, ChannelHealthSnapshot, ChannelMessaging, ChannelOutbound, ChannelPlugin,
        InboundMessage, ReplyContext, SendError, SentMessage,
    },
    registry::{ChannelRegistry, RegistrySnapshot},
};

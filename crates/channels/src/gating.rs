//! Inbound access gating.
//!
//! Evaluated after normalization and before routing: a denied message is
//! dropped with a structured reason and never reaches an agent.

use serde::{Deserialize, Serialize};

use trellis_common::{Peer, PeerKind};

/// Mention activation mode for group chats.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MentionMode {
    /// Bot must be @mentioned to respond.
    #[default]
    Mention,
    /// Bot responds to all messages.
    Always,
    /// Bot does not respond in groups.
    None,
}

/// DM access policy.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DmPolicy {
    /// Anyone can DM the bot.
    Open,
    /// Only senders on the allowlist.
    #[default]
    Allowlist,
    /// DMs disabled.
    Disabled,
}

/// Group/channel access policy.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GroupPolicy {
    /// Bot responds in all groups.
    #[default]
    Open,
    /// Only groups on the allowlist.
    Allowlist,
    /// Groups disabled.
    Disabled,
}

/// Per-account inbound access policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessPolicy {
    #[serde(default)]
    pub dm_policy: DmPolicy,
    #[serde(default)]
    pub group_policy: GroupPolicy,
    #[serde(default)]
    pub mention_mode: MentionMode,
    /// Sender ids/handles allowed to DM. Empty means everyone.
    #[serde(default)]
    pub dm_allowlist: Vec<String>,
    /// Group/channel ids the bot participates in. Empty means everywhere.
    #[serde(default)]
    pub group_allowlist: Vec<String>,
}

/// Outcome of an access check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    Deny { reason: String },
}

impl AccessDecision {
    fn deny(reason: impl Into<String>) -> Self {
        Self::Deny {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

impl AccessPolicy {
    /// Evaluate whether a message from `sender_id` in `peer` may proceed.
    ///
    /// `mentioned` reports whether the bot was addressed in a group
    /// message; it is ignored for direct chats.
    #[must_use]
    pub fn evaluate(&self, peer: &Peer, sender_id: &str, mentioned: bool) -> AccessDecision {
        match peer.kind {
            PeerKind::Direct => match self.dm_policy {
                DmPolicy::Disabled => AccessDecision::deny("dms disabled"),
                DmPolicy::Open => AccessDecision::Allow,
                DmPolicy::Allowlist => {
                    if matches_allowlist(sender_id, &self.dm_allowlist) {
                        AccessDecision::Allow
                    } else {
                        AccessDecision::deny(format!("sender '{sender_id}' not on dm allowlist"))
                    }
                },
            },
            PeerKind::Group | PeerKind::Channel => {
                match self.group_policy {
                    GroupPolicy::Disabled => return AccessDecision::deny("groups disabled"),
                    GroupPolicy::Allowlist => {
                        if !matches_allowlist(&peer.id, &self.group_allowlist) {
                            return AccessDecision::deny(format!(
                                "group '{}' not on allowlist",
                                peer.id
                            ));
                        }
                    },
                    GroupPolicy::Open => {},
                }
                match self.mention_mode {
                    MentionMode::None => AccessDecision::deny("group responses disabled"),
                    MentionMode::Always => AccessDecision::Allow,
                    MentionMode::Mention if mentioned => AccessDecision::Allow,
                    MentionMode::Mention => AccessDecision::deny("not mentioned"),
                }
            },
        }
    }
}

/// Case-insensitive allowlist match with glob-style `*` wildcards.
/// An empty allowlist allows everyone (open policy).
#[must_use]
pub fn matches_allowlist(identifier: &str, allowlist: &[String]) -> bool {
    if allowlist.is_empty() {
        return true;
    }
    let id = identifier.to_lowercase();
    allowlist.iter().any(|pattern| {
        let pat = pattern.to_lowercase();
        if pat.contains('*') {
            glob_match(&pat, &id)
        } else {
            pat == id
        }
    })
}

/// `*` matches any (possibly empty) sequence of characters.
fn glob_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == text;
    }

    let mut pos = 0;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        match text[pos..].find(part) {
            // Leading literal must anchor at the start.
            Some(idx) if i == 0 && idx != 0 => return false,
            Some(idx) => pos += idx + part.len(),
            None => return false,
        }
    }
    // Trailing literal must anchor at the end.
    match parts.last() {
        Some(last) if !last.is_empty() => pos == text.len(),
        _ => true,
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_allowlist_allows_everyone() {
        assert!(matches_allowlist("anyone", &[]));
    }

    #[test]
    fn exact_match_is_case_insensitive() {
        let list = vec!["Alice".into()];
        assert!(matches_allowlist("alice", &list));
        assert!(!matches_allowlist("bob", &list));
    }

    #[test]
    fn glob_prefix_and_suffix() {
        assert!(matches_allowlist("admin_alice", &["admin_*".into()]));
        assert!(matches_allowlist("user@example.com", &["*@example.com".into()]));
        assert!(!matches_allowlist("user@other.com", &["*@example.com".into()]));
    }

    #[test]
    fn glob_middle_segment() {
        let list = vec!["user_*_admin".into()];
        assert!(matches_allowlist("user_123_admin", &list));
        assert!(!matches_allowlist("user_123_mod", &list));
    }

    #[test]
    fn open_dm_policy_allows_unknown_sender() {
        let policy = AccessPolicy {
            dm_policy: DmPolicy::Open,
            ..Default::default()
        };
        assert!(
            policy
                .evaluate(&Peer::direct("u1"), "stranger", false)
                .is_allowed()
        );
    }

    #[test]
    fn dm_allowlist_denies_off_list_sender() {
        let policy = AccessPolicy {
            dm_allowlist: vec!["alice".into()],
            ..Default::default()
        };
        assert!(
            policy
                .evaluate(&Peer::direct("u1"), "alice", false)
                .is_allowed()
        );
        let decision = policy.evaluate(&Peer::direct("u1"), "mallory", false);
        assert!(matches!(decision, AccessDecision::Deny { .. }));
    }

    #[test]
    fn group_requires_mention_by_default() {
        let policy = AccessPolicy::default();
        let peer = Peer::group("g1", None);
        assert!(!policy.evaluate(&peer, "u1", false).is_allowed());
        assert!(policy.evaluate(&peer, "u1", true).is_allowed());
    }

    #[test]
    fn group_allowlist_gates_by_group_id() {
        let policy = AccessPolicy {
            group_policy: GroupPolicy::Allowlist,
            group_allowlist: vec!["g1".into()],
            mention_mode: MentionMode::Always,
            ..Default::default()
        };
        assert!(
            policy
                .evaluate(&Peer::group("g1", None), "u1", false)
                .is_allowed()
        );
        assert!(
            !policy
                .evaluate(&Peer::group("g2", None), "u1", false)
                .is_allowed()
        );
    }

    #[test]
    fn disabled_groups_deny_even_with_mention() {
        let policy = AccessPolicy {
            group_policy: GroupPolicy::Disabled,
            ..Default::default()
        };
        assert!(
            !policy
                .evaluate(&Peer::group("g1", None), "u1", true)
                .is_allowed()
        );
    }
}

//! Who may send and who may apply.
//!
//! | role   | send | apply |
//! |--------|------|-------|
//! | master | yes  | no    |
//! | slave  | no   | yes   |
//! | peer   | yes  | yes   |
//!
//! The per-kind flags in [`SyncConfig`](crate::config::SyncConfig) sit on
//! top of this table: a disabled kind is neither sent nor applied.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-instance synchronization policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Authoritative: broadcasts, never applies.
    Master,
    /// Symmetric participant.
    #[default]
    Peer,
    /// Follower: applies, never broadcasts.
    Slave,
}

impl Role {
    /// Writer roles are also the only ones allowed to persist snapshots.
    pub fn is_writer(self) -> bool {
        RoleResolver::permits(self, Direction::Send)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Master => write!(f, "master"),
            Role::Peer => write!(f, "peer"),
            Role::Slave => write!(f, "slave"),
        }
    }
}

/// Kinds of shared state, each gated independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Camera,
    Selection,
    Layer,
    Ambiance,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 4] = [
        ChannelKind::Camera,
        ChannelKind::Selection,
        ChannelKind::Layer,
        ChannelKind::Ambiance,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Send,
    Apply,
}

/// Stateless role table.
pub struct RoleResolver;

impl RoleResolver {
    /// Role half of the decision. The kind only matters through its flag,
    /// which callers check via [`SyncConfig::may_send`](crate::config::SyncConfig::may_send)
    /// and [`SyncConfig::may_apply`](crate::config::SyncConfig::may_apply).
    pub fn permits(role: Role, direction: Direction) -> bool {
        matches!(
            (role, direction),
            (Role::Master, Direction::Send)
                | (Role::Peer, Direction::Send)
                | (Role::Peer, Direction::Apply)
                | (Role::Slave, Direction::Apply)
        )
    }

    /// Full decision for one kind given whether that kind is enabled.
    pub fn decide(role: Role, enabled: bool, direction: Direction) -> bool {
        enabled && Self::permits(role, direction)
    }
}

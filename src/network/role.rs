//! Local Role State
//!
//! The local node's role as a tagged union carrying what each role needs
//! (the master knows its deputy, everyone else knows the master's address),
//! plus the table of allowed role transitions.

use std::fmt;
use std::net::SocketAddr;

use crate::game::field::PeerId;
use crate::network::protocol::Role;
use crate::network::session::SessionError;

/// Lifecycle of the local node, independent of role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Not part of any session
    Idle,
    /// In a session with a live avatar (or awaiting one)
    InSession,
    /// In a session without a live avatar
    Observing,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Lifecycle::Idle => "IDLE",
            Lifecycle::InSession => "IN_SESSION",
            Lifecycle::Observing => "OBSERVING",
        };
        f.write_str(name)
    }
}

/// Local role with per-role data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalRole {
    /// Simulation authority
    Master {
        /// Currently designated deputy
        deputy: Option<PeerId>,
    },
    /// Standby master
    Deputy {
        /// Current master
        master: SocketAddr,
    },
    /// Player
    Normal {
        /// Current master
        master: SocketAddr,
    },
    /// Spectator
    Viewer {
        /// Current master
        master: SocketAddr,
    },
}

impl LocalRole {
    /// Flat role.
    pub fn role(&self) -> Role {
        match self {
            LocalRole::Master { .. } => Role::Master,
            LocalRole::Deputy { .. } => Role::Deputy,
            LocalRole::Normal { .. } => Role::Normal,
            LocalRole::Viewer { .. } => Role::Viewer,
        }
    }

    /// Address of the master, unless this node is the master.
    pub fn master_address(&self) -> Option<SocketAddr> {
        match self {
            LocalRole::Master { .. } => None,
            LocalRole::Deputy { master } | LocalRole::Normal { master } | LocalRole::Viewer { master } => Some(*master),
        }
    }

    /// Same role, following a different master.
    pub fn with_master(self, master: SocketAddr) -> Self {
        match self {
            LocalRole::Master { deputy } => LocalRole::Master { deputy },
            LocalRole::Deputy { .. } => LocalRole::Deputy { master },
            LocalRole::Normal { .. } => LocalRole::Normal { master },
            LocalRole::Viewer { .. } => LocalRole::Viewer { master },
        }
    }

    /// Designated deputy, if this node is the master.
    pub fn deputy(&self) -> Option<PeerId> {
        match self {
            LocalRole::Master { deputy } => *deputy,
            _ => None,
        }
    }
}

/// Is `from -> to` an allowed role change?
///
/// ```text
/// MASTER -> VIEWER            (handoff or yield)
/// DEPUTY -> MASTER | VIEWER
/// NORMAL -> DEPUTY | MASTER | VIEWER
/// VIEWER -> NORMAL            (rejoin)
/// ```
///
/// Staying in the same role is always allowed. Leaving a session bypasses
/// the table.
pub fn is_allowed(from: Role, to: Role) -> bool {
    use Role::*;

    from == to
        || matches!(
            (from, to),
            (Master, Viewer)
                | (Deputy, Master)
                | (Deputy, Viewer)
                | (Normal, Deputy)
                | (Normal, Master)
                | (Normal, Viewer)
                | (Viewer, Normal)
        )
}

/// Check a role change against the transition table.
pub fn check_transition(from: Role, to: Role) -> Result<(), SessionError> {
    if is_allowed(from, to) {
        Ok(())
    } else {
        Err(SessionError::IllegalTransition { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        use Role::*;

        let allowed = [
            (Master, Viewer),
            (Deputy, Master),
            (Deputy, Viewer),
            (Normal, Deputy),
            (Normal, Master),
            (Normal, Viewer),
            (Viewer, Normal),
        ];
        let all = [Master, Deputy, Normal, Viewer];

        for from in all {
            for to in all {
                let expected = from == to || allowed.contains(&(from, to));
                assert_eq!(is_allowed(from, to), expected, "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_viewer_cannot_jump_to_master() {
        let err = check_transition(Role::Viewer, Role::Master).unwrap_err();
        assert!(matches!(err, SessionError::IllegalTransition { from: Role::Viewer, to: Role::Master }));
        assert!(check_transition(Role::Master, Role::Deputy).is_err());
    }

    #[test]
    fn test_master_address() {
        let addr = SocketAddr::from(([10, 0, 0, 1], 9000));
        let other = SocketAddr::from(([10, 0, 0, 2], 9000));

        assert_eq!(LocalRole::Master { deputy: None }.master_address(), None);
        assert_eq!(LocalRole::Normal { master: addr }.master_address(), Some(addr));

        let moved = LocalRole::Deputy { master: addr }.with_master(other);
        assert_eq!(moved, LocalRole::Deputy { master: other });
        assert_eq!(moved.role(), Role::Deputy);
    }
}

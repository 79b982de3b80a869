//! Session Controller
//!
//! Owns everything one node knows about its current session: lifecycle,
//! local role, roster, the replicated (or authoritative) simulation and the
//! send half of the transport. All mutation goes through `&mut self`, so the
//! node serializes activities simply by holding the controller behind one lock.
//!
//! Operations are split across files:
//! - `session.rs`: lifecycle operations (start, join, leave, rejoin, ...)
//! - `dispatch.rs`: inbound message handling
//! - `failover.rs`: liveness, promotion, deputy selection, master tick

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::core::rng::derive_session_seed;
use crate::game::config::GameConfig;
use crate::game::engine::GameEngine;
use crate::game::field::{Direction, PeerId};
use crate::game::simulation::Simulation;
use crate::network::config::NodeConfig;
use crate::network::directory::{Directory, SessionSummary};
use crate::network::protocol::{GameAnnouncement, Payload, Role};
use crate::network::role::{check_transition, Lifecycle, LocalRole};
use crate::network::roster::{PeerInfo, Roster};
use crate::network::transport::Transport;

/// How many times a leaving node sends its closing RoleChange.
pub const LEAVE_NOTICE_COPIES: usize = 3;

/// Session-level errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Operation not allowed in the current lifecycle state
    #[error("cannot {operation} while {lifecycle}")]
    InvalidState {
        /// Attempted operation
        operation: &'static str,
        /// Current lifecycle state
        lifecycle: Lifecycle,
    },

    /// No announced session with this name
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// A session with this name is already announced
    #[error("session name already in use: {0}")]
    NameTaken(String),

    /// Only NORMAL and VIEWER may be requested when joining
    #[error("cannot join as {0}")]
    InvalidRole(Role),

    /// Role change not in the transition table
    #[error("illegal role transition {from} -> {to}")]
    IllegalTransition {
        /// Current role
        from: Role,
        /// Requested role
        to: Role,
    },

    /// Operation requires the MASTER role
    #[error("not the session master")]
    NotMaster,

    /// No master address is known
    #[error("master address unknown")]
    NoMasterAddress,

    /// The simulation found no room for a new avatar
    #[error("no room to place avatar")]
    PlacementFailed,

    /// Message from a peer the master does not know at that address
    #[error("unknown peer {0:?}")]
    UnknownPeer(Option<PeerId>),

    /// Rejoin requires an observing node or a master without an avatar
    #[error("nothing to rejoin")]
    NotRejoinable,
}

/// Periodic work the node must run while this controller is MASTER.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    /// Start the simulation tick and announcement loops
    StartMaster {
        /// Simulation tick interval
        tick_interval: Duration,
    },
    /// Stop both loops
    StopMaster,
}

/// Join request awaiting the master's acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PendingJoin {
    pub sequence: u64,
    pub requested_role: Role,
}

/// The session state machine of one node.
pub struct SessionController<S: Simulation = GameEngine> {
    pub(crate) config: NodeConfig,
    pub(crate) transport: Transport,
    pub(crate) directory: Directory,
    pub(crate) lifecycle: Lifecycle,
    pub(crate) role: Option<LocalRole>,
    pub(crate) local_id: Option<PeerId>,
    pub(crate) session_name: Option<String>,
    pub(crate) simulation: Option<S>,
    pub(crate) roster: Roster,
    pub(crate) next_peer_id: i32,
    pub(crate) pending_join: Option<PendingJoin>,
    pub(crate) recent_joins: BTreeMap<SocketAddr, (u64, PeerId)>,
    pub(crate) ended: bool,
    pub(crate) last_error: Option<String>,
    pub(crate) activities: Option<mpsc::UnboundedSender<Activity>>,
    master_activities: bool,
}

impl<S: Simulation> SessionController<S> {
    /// Create an idle controller.
    pub fn new(config: NodeConfig, transport: Transport) -> Self {
        let directory = Directory::new(config.directory_staleness);
        Self {
            config,
            transport,
            directory,
            lifecycle: Lifecycle::Idle,
            role: None,
            local_id: None,
            session_name: None,
            simulation: None,
            roster: Roster::new(),
            next_peer_id: 0,
            pending_join: None,
            recent_joins: BTreeMap::new(),
            ended: false,
            last_error: None,
            activities: None,
            master_activities: false,
        }
    }

    /// Route master start/stop requests to `tx`.
    pub fn with_activities(mut self, tx: mpsc::UnboundedSender<Activity>) -> Self {
        self.activities = Some(tx);
        self
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// Current lifecycle state.
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Current role. NORMAL while idle.
    pub fn role(&self) -> Role {
        self.role.as_ref().map_or(Role::Normal, LocalRole::role)
    }

    /// Local id, once assigned.
    pub fn local_id(&self) -> Option<PeerId> {
        self.local_id
    }

    /// Name of the current session.
    pub fn session_name(&self) -> Option<&str> {
        self.session_name.as_deref()
    }

    /// Address of the master, unless this node is the master.
    pub fn master_address(&self) -> Option<SocketAddr> {
        self.role.as_ref().and_then(LocalRole::master_address)
    }

    /// Designated deputy, as known locally.
    pub fn deputy(&self) -> Option<PeerId> {
        match &self.role {
            Some(LocalRole::Master { deputy }) => *deputy,
            Some(_) => self.roster.find_role(Role::Deputy, None).map(|p| p.id),
            None => None,
        }
    }

    /// Roster of the current session.
    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// Local simulation, if in a session.
    pub fn simulation(&self) -> Option<&S> {
        self.simulation.as_ref()
    }

    /// Has the session ended with no survivors?
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Last `Error` payload received.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Is this node the master?
    pub fn is_master(&self) -> bool {
        matches!(self.role, Some(LocalRole::Master { .. }))
    }

    /// Known sessions.
    pub fn sessions(&self) -> Vec<SessionSummary> {
        self.directory.sessions()
    }

    /// Transport, for inspection.
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Is `peer`'s avatar alive? The single source of that judgement.
    pub fn avatar_alive(&self, peer: PeerId) -> bool {
        self.simulation.as_ref().is_some_and(|sim| sim.is_avatar_alive(peer))
    }

    /// Tick interval for the current session.
    pub fn tick_interval(&self) -> Duration {
        let ms = self
            .simulation
            .as_ref()
            .map_or(GameConfig::default().state_delay_ms, Simulation::tick_interval_ms);
        Duration::from_millis(ms)
    }

    pub(crate) fn state_delay_ms(&self) -> u64 {
        self.tick_interval().as_millis() as u64
    }

    /// Could a NORMAL join be accepted right now?
    pub fn can_join(&self) -> bool {
        self.simulation
            .as_ref()
            .is_some_and(|sim| sim.free_cells() > self.config.join_free_cell_floor)
    }

    // =========================================================================
    // LIFECYCLE OPERATIONS
    // =========================================================================

    /// Host a new session as MASTER with id 0.
    pub fn start_session(&mut self, name: &str, game_config: GameConfig) -> Result<(), SessionError> {
        self.require_idle("start a session")?;
        if self.directory.contains(name) {
            return Err(SessionError::NameTaken(name.to_string()));
        }

        let id = PeerId::CREATOR;
        let mut simulation = S::create(game_config, self.seed_for(name));
        if !simulation.try_place_avatar(id) {
            return Err(SessionError::PlacementFailed);
        }

        let local_addr = self.transport.local_addr().ok();
        self.roster.clear();
        self.roster.insert(PeerInfo::new(id, self.config.display_name.clone(), Role::Master, local_addr));

        self.simulation = Some(simulation);
        self.session_name = Some(name.to_string());
        self.local_id = Some(id);
        self.next_peer_id = id.0 + 1;
        self.role = Some(LocalRole::Master { deputy: None });
        self.lifecycle = Lifecycle::InSession;
        self.ended = false;
        self.start_master_activities();

        info!(session = name, peer_id = %id, width = game_config.width, height = game_config.height, "session started");
        Ok(())
    }

    /// Ask the master of an announced session for a place.
    pub fn join_session(&mut self, name: &str, requested_role: Role) -> Result<(), SessionError> {
        self.require_idle("join a session")?;
        if !matches!(requested_role, Role::Normal | Role::Viewer) {
            return Err(SessionError::InvalidRole(requested_role));
        }
        let summary = self
            .directory
            .get(name)
            .cloned()
            .ok_or_else(|| SessionError::SessionNotFound(name.to_string()))?;
        let master = summary.master_address;

        self.simulation = Some(S::create(summary.config, self.seed_for(name)));
        self.roster = Roster::from_records(summary.players, master);
        self.session_name = Some(name.to_string());
        self.local_id = None;
        self.ended = false;
        self.role = Some(match requested_role {
            Role::Viewer => LocalRole::Viewer { master },
            _ => LocalRole::Normal { master },
        });
        self.lifecycle = if requested_role == Role::Viewer {
            Lifecycle::Observing
        } else {
            Lifecycle::InSession
        };

        self.send_join(master, requested_role);
        info!(session = name, %master, role = %requested_role, "joining session");
        Ok(())
    }

    /// Leave the session and return to IDLE.
    ///
    /// Teardown clears the pending table, so the closing notice is never
    /// retransmitted. It goes out `LEAVE_NOTICE_COPIES` times instead; if
    /// every copy is lost the others fall back on their failure detectors.
    pub fn leave_session(&mut self) -> Result<(), SessionError> {
        if self.lifecycle == Lifecycle::Idle {
            return Err(SessionError::InvalidState { operation: "leave", lifecycle: self.lifecycle });
        }

        let notice = match self.role {
            Some(LocalRole::Master { deputy }) => deputy
                .and_then(|d| self.roster.get(d))
                .and_then(|p| p.address)
                .map(|addr| (addr, deputy, Some(Role::Master))),
            Some(role) => role.master_address().map(|master| (master, self.master_id(), None)),
            None => None,
        };
        if let Some((addr, receiver, receiver_role)) = notice {
            for _ in 0..LEAVE_NOTICE_COPIES {
                self.send_to(addr, receiver, Payload::RoleChange {
                    sender_role: Some(Role::Viewer),
                    receiver_role,
                });
            }
        }

        info!(session = self.session_name.as_deref().unwrap_or(""), "left session");
        self.teardown();
        Ok(())
    }

    /// Get back into play after the avatar died.
    ///
    /// A master places a new avatar locally. Everyone else sends a fresh Join.
    pub fn rejoin(&mut self) -> Result<(), SessionError> {
        match self.role {
            Some(LocalRole::Master { .. }) => {
                let id = self.local_id.ok_or(SessionError::NotRejoinable)?;
                if self.avatar_alive(id) {
                    return Err(SessionError::NotRejoinable);
                }
                let simulation = self.simulation.as_mut().ok_or(SessionError::NotRejoinable)?;
                if !simulation.try_place_avatar(id) {
                    return Err(SessionError::PlacementFailed);
                }
                self.roster.set_role(id, Role::Master);
                self.lifecycle = Lifecycle::InSession;
                self.ended = false;
                info!(peer_id = %id, "master rejoined play");
                Ok(())
            }
            Some(role) if self.lifecycle == Lifecycle::Observing => {
                let master = role.master_address().ok_or(SessionError::NoMasterAddress)?;
                self.set_role(LocalRole::Normal { master })?;
                self.local_id = None;
                self.lifecycle = Lifecycle::InSession;
                self.send_join(master, Role::Normal);
                info!(%master, "rejoining session");
                Ok(())
            }
            _ => Err(SessionError::NotRejoinable),
        }
    }

    /// Stop playing but keep watching.
    ///
    /// A master hands authority to its deputy first; without a deputy it
    /// stays master and only gives up its avatar.
    pub fn become_viewer(&mut self) -> Result<(), SessionError> {
        if self.lifecycle == Lifecycle::Idle {
            return Err(SessionError::InvalidState { operation: "become a viewer", lifecycle: self.lifecycle });
        }

        match self.role {
            Some(LocalRole::Master { deputy }) => {
                if let Some(id) = self.local_id {
                    if let Some(sim) = self.simulation.as_mut() {
                        sim.mark_avatar_dead(id);
                    }
                }
                self.lifecycle = Lifecycle::Observing;
                match deputy {
                    Some(deputy) => self.hand_off_to(deputy),
                    None => {
                        info!("master observing without a deputy");
                        Ok(())
                    }
                }
            }
            Some(LocalRole::Viewer { .. }) => Ok(()),
            Some(role) => {
                let master = role.master_address().ok_or(SessionError::NoMasterAddress)?;
                self.set_role(LocalRole::Viewer { master })?;
                self.lifecycle = Lifecycle::Observing;
                let master_id = self.master_id();
                self.send_to(master, master_id, Payload::RoleChange {
                    sender_role: Some(Role::Viewer),
                    receiver_role: None,
                });
                info!("became viewer");
                Ok(())
            }
            None => Err(SessionError::NoMasterAddress),
        }
    }

    /// Change heading. The master applies it directly; everyone else asks the master.
    pub fn send_steer(&mut self, direction: Direction) -> Result<(), SessionError> {
        if self.lifecycle == Lifecycle::Idle {
            return Err(SessionError::InvalidState { operation: "steer", lifecycle: self.lifecycle });
        }
        let Some(id) = self.local_id else {
            debug!("steer before id assignment ignored");
            return Ok(());
        };

        match self.role {
            Some(LocalRole::Master { .. }) => {
                if let Some(sim) = self.simulation.as_mut() {
                    sim.set_intent(id, direction);
                }
            }
            Some(LocalRole::Viewer { .. }) => {}
            Some(role) => {
                let master = role.master_address().ok_or(SessionError::NoMasterAddress)?;
                let master_id = self.master_id();
                self.send_to(master, master_id, Payload::Steer(direction));
            }
            None => {}
        }
        Ok(())
    }

    /// Ask every master on the discovery group to announce itself.
    pub fn discover(&mut self) {
        self.transport.send_multicast(Payload::Discover, self.local_id);
    }

    /// Evict stale directory entries.
    pub fn sweep_directory(&mut self) -> Vec<String> {
        self.directory.sweep(Instant::now())
    }

    /// Multicast this session's announcement. Master only.
    pub fn announce(&mut self) {
        if let Some(announcement) = self.announcement() {
            self.transport.send_multicast(Payload::Announcement(vec![announcement]), self.local_id);
        }
    }

    /// This session as advertised, if this node is its master.
    pub fn announcement(&self) -> Option<GameAnnouncement> {
        if !self.is_master() {
            return None;
        }
        let name = self.session_name.clone()?;
        let config = *self.simulation.as_ref()?.config();
        Some(GameAnnouncement {
            name,
            config,
            players: self.roster.records(),
            can_join: self.can_join(),
        })
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    fn require_idle(&self, operation: &'static str) -> Result<(), SessionError> {
        if self.lifecycle == Lifecycle::Idle {
            Ok(())
        } else {
            Err(SessionError::InvalidState { operation, lifecycle: self.lifecycle })
        }
    }

    fn seed_for(&self, name: &str) -> u64 {
        self.config.seed.unwrap_or_else(|| {
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0);
            derive_session_seed(name, nanos)
        })
    }

    fn send_join(&mut self, master: SocketAddr, requested_role: Role) {
        let Some(session_name) = self.session_name.clone() else { return };
        let payload = Payload::Join {
            display_name: self.config.display_name.clone(),
            session_name,
            requested_role,
        };
        let sequence = self.transport.send(payload, None, None, master);
        self.pending_join = Some(PendingJoin { sequence, requested_role });
        // Give the master a full threshold to answer
        self.transport.touch(master);
    }

    /// Send a tracked message to `addr`.
    pub(crate) fn send_to(&mut self, addr: SocketAddr, receiver: Option<PeerId>, payload: Payload) -> u64 {
        self.transport.send(payload, self.local_id, receiver, addr)
    }

    /// Id of the current master, from the roster.
    pub(crate) fn master_id(&self) -> Option<PeerId> {
        let master = self.master_address()?;
        self.roster
            .iter()
            .find(|p| p.role == Role::Master && p.address == Some(master))
            .map(|p| p.id)
    }

    /// Change role through the transition table.
    pub(crate) fn set_role(&mut self, next: LocalRole) -> Result<(), SessionError> {
        if let Some(current) = self.role {
            check_transition(current.role(), next.role())?;
        }
        if let Some(id) = self.local_id {
            self.roster.set_role(id, next.role());
        }
        self.role = Some(next);
        Ok(())
    }

    pub(crate) fn start_master_activities(&mut self) {
        if self.master_activities {
            return;
        }
        self.master_activities = true;
        let tick_interval = self.tick_interval();
        self.request(Activity::StartMaster { tick_interval });
    }

    pub(crate) fn stop_master_activities(&mut self) {
        if !self.master_activities {
            return;
        }
        self.master_activities = false;
        self.request(Activity::StopMaster);
    }

    fn request(&self, activity: Activity) {
        if let Some(tx) = &self.activities {
            if tx.send(activity).is_err() {
                warn!(?activity, "activity supervisor gone");
            }
        }
    }

    /// Return to IDLE, dropping all session state and pending sends.
    pub(crate) fn teardown(&mut self) {
        self.stop_master_activities();
        self.transport.clear();
        self.lifecycle = Lifecycle::Idle;
        self.role = None;
        self.local_id = None;
        self.session_name = None;
        self.simulation = None;
        self.roster.clear();
        self.next_peer_id = 0;
        self.pending_join = None;
        self.recent_joins.clear();
        self.ended = false;
    }
}

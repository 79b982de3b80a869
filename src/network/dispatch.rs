//! Inbound Message Dispatch
//!
//! Routes each received envelope to its handler, then acknowledges it.
//! Every tracked message gets exactly one Ack even when the handler rejects
//! it, so the sender stops retrying. The Ack for an accepted Join carries the
//! assigned id as its receiver.

use std::net::SocketAddr;

use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::game::field::{Direction, PeerId};
use crate::game::simulation::Simulation;
use crate::network::directory::SessionSummary;
use crate::network::protocol::{Envelope, GameAnnouncement, Payload, Role, StatePayload};
use crate::network::role::{Lifecycle, LocalRole};
use crate::network::roster::{Connection, PeerInfo, Roster};
use crate::network::session::{SessionController, SessionError};
use crate::network::transport::Received;

type Handled = Result<Option<PeerId>, SessionError>;

impl<S: Simulation> SessionController<S> {
    /// Handle one inbound datagram.
    pub fn handle(&mut self, received: Received) {
        let Received { envelope, from, channel } = received;
        self.transport.record_inbound(from);

        let Envelope { sequence, sender_id, receiver_id, payload } = envelope;
        let kind = payload.kind();
        trace!(sequence, ?kind, %from, ?channel, "dispatch");

        let result = match payload {
            Payload::Ack => {
                self.on_ack(sequence, receiver_id);
                Ok(None)
            }
            Payload::Announcement(games) => {
                self.on_announcement(games, from);
                Ok(None)
            }
            Payload::Discover => {
                self.on_discover(from);
                Ok(None)
            }
            Payload::Join { display_name, session_name, requested_role } => {
                self.on_join(from, sequence, display_name, &session_name, requested_role)
            }
            Payload::State(state) => self.on_state(from, state),
            Payload::Steer(direction) => self.on_steer(from, sender_id, direction),
            Payload::Ping => Ok(None),
            Payload::Error(message) => {
                self.on_error(from, message);
                Ok(None)
            }
            Payload::RoleChange { sender_role, receiver_role } => {
                self.on_role_change(from, sender_id, sender_role, receiver_role)
            }
        };

        if kind.requires_ack() {
            let ack_receiver = match &result {
                Ok(Some(assigned)) => Some(*assigned),
                _ => sender_id,
            };
            self.transport.send_ack(sequence, self.local_id, ack_receiver, from);
        }

        if let Err(e) = result {
            debug!(?kind, %from, error = %e, "message rejected");
        }
    }

    fn on_ack(&mut self, sequence: u64, receiver_id: Option<PeerId>) {
        self.transport.ack(sequence);

        let Some(pending) = self.pending_join else { return };
        if pending.sequence != sequence {
            return;
        }
        if let Some(id) = receiver_id {
            self.local_id = Some(id);
            self.pending_join = None;
            info!(peer_id = %id, role = %pending.requested_role, "joined session");
        }
    }

    fn on_announcement(&mut self, games: Vec<GameAnnouncement>, from: SocketAddr) {
        let now = Instant::now();
        for game in games {
            // Our own announcement looped back
            if self.is_master() && self.session_name.as_deref() == Some(game.name.as_str()) {
                continue;
            }
            self.directory.record(SessionSummary::from_announcement(game, from, now));
        }
    }

    fn on_discover(&mut self, from: SocketAddr) {
        if let Some(announcement) = self.announcement() {
            self.transport.send(Payload::Announcement(vec![announcement]), self.local_id, None, from);
        }
    }

    fn reject(&mut self, to: SocketAddr, message: impl Into<String>) {
        let message = message.into();
        debug!(%to, %message, "sending error");
        self.send_to(to, None, Payload::Error(message));
    }

    fn on_join(
        &mut self,
        from: SocketAddr,
        sequence: u64,
        display_name: String,
        session_name: &str,
        requested_role: Role,
    ) -> Handled {
        if !self.is_master() {
            self.reject(from, "not the session master");
            return Err(SessionError::NotMaster);
        }
        // Retransmitted Join whose Ack was lost
        if let Some(&(seen, id)) = self.recent_joins.get(&from) {
            if seen == sequence {
                return Ok(Some(id));
            }
        }
        if self.session_name.as_deref() != Some(session_name) {
            self.reject(from, format!("no session named {session_name}"));
            return Err(SessionError::SessionNotFound(session_name.to_string()));
        }
        if !matches!(requested_role, Role::Normal | Role::Viewer) {
            self.reject(from, format!("cannot join as {requested_role}"));
            return Err(SessionError::InvalidRole(requested_role));
        }

        let id = PeerId(self.next_peer_id);
        if requested_role == Role::Normal {
            if !self.can_join() {
                self.reject(from, "session is full");
                return Err(SessionError::PlacementFailed);
            }
            let placed = self.simulation.as_mut().is_some_and(|sim| sim.try_place_avatar(id));
            if !placed {
                self.reject(from, "no room to place avatar");
                return Err(SessionError::PlacementFailed);
            }
        }

        self.next_peer_id += 1;
        let stale: Vec<PeerId> = self
            .roster
            .iter()
            .filter(|p| p.address == Some(from) && p.connection == Connection::Connected)
            .map(|p| p.id)
            .collect();
        self.roster.insert(PeerInfo::new(id, display_name, requested_role, Some(from)));
        self.roster.disconnect_address(from, id);
        for old in stale {
            self.retire_peer(old);
        }
        self.recent_joins.insert(from, (sequence, id));
        info!(peer_id = %id, %from, role = %requested_role, "player joined");

        if requested_role == Role::Normal && self.role.and_then(|r| r.deputy()).is_none() {
            self.select_deputy();
        }
        Ok(Some(id))
    }

    fn on_state(&mut self, from: SocketAddr, state: StatePayload) -> Handled {
        if self.lifecycle == Lifecycle::Idle {
            return Ok(None);
        }
        if self.is_master() {
            debug!(%from, "state from another master ignored");
            return Ok(None);
        }
        let Some(master) = self.master_address() else { return Ok(None) };
        if from != master {
            debug!(%from, %master, "state from non-master ignored");
            return Ok(None);
        }

        let StatePayload { snapshot, players } = state;
        let order = snapshot.state_order;
        let applied = self.simulation.as_mut().is_some_and(|sim| sim.apply_snapshot(snapshot));
        if !applied {
            trace!(order, "stale state discarded");
            return Ok(None);
        }

        self.roster = Roster::from_records(players, master);
        let Some(id) = self.local_id else { return Ok(None) };
        let role = self.role();
        self.roster.set_role(id, role);

        let playing = matches!(self.role, Some(LocalRole::Normal { .. } | LocalRole::Deputy { .. }));
        if playing && self.pending_join.is_none() && !self.avatar_alive(id) {
            self.set_role(LocalRole::Viewer { master })?;
            self.lifecycle = Lifecycle::Observing;
            info!(peer_id = %id, "avatar died, observing");
        }
        Ok(None)
    }

    fn on_steer(&mut self, from: SocketAddr, sender_id: Option<PeerId>, direction: Direction) -> Handled {
        if !self.is_master() {
            return Ok(None);
        }
        let known = sender_id
            .and_then(|id| self.roster.get(id))
            .is_some_and(|p| p.address == Some(from));
        let Some(id) = sender_id.filter(|_| known) else {
            self.reject(from, "unknown player");
            return Err(SessionError::UnknownPeer(sender_id));
        };

        if let Some(sim) = self.simulation.as_mut() {
            sim.set_intent(id, direction);
        }
        Ok(None)
    }

    fn on_error(&mut self, from: SocketAddr, message: String) {
        warn!(%from, %message, "peer reported error");
        self.last_error = Some(message);

        if self.pending_join.is_some() && self.local_id.is_none() && self.master_address() == Some(from) {
            info!("join refused");
            self.teardown();
        }
    }

    fn on_role_change(
        &mut self,
        from: SocketAddr,
        sender_id: Option<PeerId>,
        sender_role: Option<Role>,
        receiver_role: Option<Role>,
    ) -> Handled {
        if self.lifecycle == Lifecycle::Idle {
            return Ok(None);
        }

        match sender_role {
            Some(Role::Master) => {
                if self.is_master() {
                    self.yield_to(from)?;
                } else {
                    self.switch_master(from);
                }
            }
            Some(Role::Viewer) => {
                if self.is_master() {
                    if let Some(id) = sender_id.filter(|id| self.roster.contains(*id)) {
                        info!(peer_id = %id, "peer stopped playing");
                        self.retire_peer(id);
                    }
                } else if self.master_address() == Some(from) && receiver_role != Some(Role::Master) {
                    info!(%from, "master stepped down");
                    self.handle_master_loss();
                }
            }
            _ => {}
        }

        match receiver_role {
            Some(Role::Master) => self.promote_to_master()?,
            Some(Role::Deputy) => {
                if let Some(master) = self.master_address() {
                    if self.role() != Role::Deputy {
                        self.set_role(LocalRole::Deputy { master })?;
                        info!("became deputy");
                    }
                }
            }
            Some(Role::Viewer) => {
                if let Some(master) = self.master_address() {
                    self.set_role(LocalRole::Viewer { master })?;
                    self.lifecycle = Lifecycle::Observing;
                    info!("demoted to viewer");
                }
            }
            _ => {}
        }
        Ok(None)
    }
}

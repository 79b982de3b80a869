//! Failure Detection and Failover
//!
//! Periodic liveness check, master promotion, deputy selection and the
//! master's simulation tick.
//!
//! ## Failure threshold
//!
//! A peer is dead once nothing has been heard from it for
//! `max(3000 ms, 0.8 x tick interval)`:
//!
//! - MASTER: the silent peer loses its avatar and becomes a VIEWER. A silent
//!   deputy is replaced by the lowest-id live NORMAL peer.
//! - DEPUTY: a silent master means this node promotes itself.
//! - NORMAL / VIEWER: a silent master means following the deputy. With no
//!   deputy known the session is over for this node.

use std::net::SocketAddr;

use tracing::{info, warn};

use crate::game::field::PeerId;
use crate::game::simulation::Simulation;
use crate::network::protocol::{Payload, Role, StatePayload};
use crate::network::role::{Lifecycle, LocalRole};
use crate::network::roster::{deputy_candidate, Connection};
use crate::network::session::{SessionController, SessionError};

impl<S: Simulation> SessionController<S> {
    /// Liveness check, run every check interval.
    ///
    /// Also drives retransmission and keep-alive pings.
    pub fn check_timeouts(&mut self) {
        if self.lifecycle == Lifecycle::Idle {
            return;
        }

        let delay = self.state_delay_ms();
        self.transport.retransmit_due(self.config.retransmit_interval(delay));

        let threshold = self.config.failure_threshold(delay);
        if self.is_master() {
            let local = self.local_id;
            let silent: Vec<PeerId> = self
                .roster
                .contacts(local)
                .into_iter()
                .filter(|(_, addr)| self.transport.time_since_last_seen(*addr) > threshold)
                .map(|(id, _)| id)
                .collect();

            for id in silent {
                warn!(peer_id = %id, ?threshold, "peer timed out");
                if let Some(peer) = self.roster.get_mut(id) {
                    peer.connection = Connection::Disconnected;
                }
                self.retire_peer(id);
            }
        } else if let Some(master) = self.master_address() {
            if self.transport.time_since_last_seen(master) > threshold {
                warn!(%master, ?threshold, "master timed out");
                self.handle_master_loss();
            }
        }

        if self.lifecycle != Lifecycle::Idle {
            self.ping_idle_contacts();
        }
    }

    fn ping_idle_contacts(&mut self) {
        let interval = self.config.ping_interval(self.state_delay_ms());
        let targets: Vec<(Option<PeerId>, SocketAddr)> = if self.is_master() {
            self.roster
                .contacts(self.local_id)
                .into_iter()
                .map(|(id, addr)| (Some(id), addr))
                .collect()
        } else {
            self.master_address()
                .map(|addr| (self.master_id(), addr))
                .into_iter()
                .collect()
        };

        for (id, addr) in targets {
            if self.transport.time_since_last_sent(addr) > interval {
                self.send_to(addr, id, Payload::Ping);
            }
        }
    }

    /// The master went away: promote, follow the deputy, or give up.
    pub(crate) fn handle_master_loss(&mut self) {
        match self.role {
            Some(LocalRole::Deputy { .. }) => {
                if let Err(e) = self.promote_to_master() {
                    warn!(error = %e, "promotion failed");
                }
            }
            Some(LocalRole::Normal { master }) | Some(LocalRole::Viewer { master }) => {
                let local = self.local_id;
                let deputy = self
                    .roster
                    .iter()
                    .find(|p| p.role == Role::Deputy && Some(p.id) != local && p.address != Some(master))
                    .and_then(|p| p.address);

                match deputy {
                    Some(addr) => self.switch_master(addr),
                    None => {
                        info!(session = self.session_name.as_deref().unwrap_or(""), "master lost with no deputy, session over");
                        self.teardown();
                    }
                }
            }
            _ => {}
        }
    }

    /// Follow a new master, redirecting in-flight messages to it.
    pub(crate) fn switch_master(&mut self, new_master: SocketAddr) {
        let Some(role) = self.role else { return };
        let Some(old_master) = role.master_address() else { return };
        if old_master == new_master {
            return;
        }

        self.role = Some(role.with_master(new_master));
        self.transport.rebind_destination(old_master, new_master);
        self.transport.touch(new_master);

        for peer in self.roster.iter_mut() {
            if peer.address == Some(old_master) && peer.role == Role::Master {
                peer.role = Role::Viewer;
            }
        }
        let local = self.local_id;
        if let Some(peer) = self.roster.iter_mut().find(|p| p.address == Some(new_master) && Some(p.id) != local) {
            peer.role = Role::Master;
        }

        info!(old = %old_master, new = %new_master, "switched master");
    }

    /// Take over simulation authority.
    pub(crate) fn promote_to_master(&mut self) -> Result<(), SessionError> {
        if self.lifecycle == Lifecycle::Idle {
            return Err(SessionError::InvalidState { operation: "become master", lifecycle: self.lifecycle });
        }
        if self.is_master() {
            return Ok(());
        }
        let old_master = self.master_address();
        self.set_role(LocalRole::Master { deputy: None })?;
        let local = self.local_id;

        // Whoever held MASTER before is now a viewer without an avatar
        let previous: Vec<PeerId> = self
            .roster
            .iter()
            .filter(|p| p.role == Role::Master && Some(p.id) != local)
            .map(|p| p.id)
            .collect();
        for id in &previous {
            self.roster.set_role(*id, Role::Viewer);
            if let Some(sim) = self.simulation.as_mut() {
                sim.mark_avatar_dead(*id);
            }
        }

        self.lifecycle = match local {
            Some(id) if self.avatar_alive(id) => Lifecycle::InSession,
            _ => Lifecycle::Observing,
        };
        let next = self.roster.max_id().map_or(0, |id| id.0 + 1);
        self.next_peer_id = self.next_peer_id.max(next);

        // Start everyone's clock now; the old master never relayed them
        for (_, addr) in self.roster.contacts(local) {
            self.transport.touch(addr);
        }

        self.start_master_activities();
        info!(peer_id = ?local, session = self.session_name.as_deref().unwrap_or(""), "promoted to master");

        self.select_deputy();

        let mut targets: Vec<(Option<PeerId>, SocketAddr)> = self
            .roster
            .contacts(local)
            .into_iter()
            .map(|(id, addr)| (Some(id), addr))
            .collect();
        if let Some(old) = old_master {
            if !targets.iter().any(|(_, addr)| *addr == old) {
                targets.push((previous.first().copied(), old));
            }
        }
        for (id, addr) in targets {
            self.send_to(addr, id, Payload::RoleChange {
                sender_role: Some(Role::Master),
                receiver_role: None,
            });
        }
        Ok(())
    }

    /// Another node announced itself as master: step down and follow it.
    pub(crate) fn yield_to(&mut self, new_master: SocketAddr) -> Result<(), SessionError> {
        self.set_role(LocalRole::Viewer { master: new_master })?;
        if let Some(id) = self.local_id {
            if let Some(sim) = self.simulation.as_mut() {
                sim.mark_avatar_dead(id);
            }
        }
        self.lifecycle = Lifecycle::Observing;
        self.stop_master_activities();
        self.transport.touch(new_master);

        let local = self.local_id;
        if let Some(peer) = self.roster.iter_mut().find(|p| p.address == Some(new_master) && Some(p.id) != local) {
            peer.role = Role::Master;
        }
        info!(%new_master, "yielded master role");
        Ok(())
    }

    /// Hand authority to `deputy` and become a viewer under it.
    pub(crate) fn hand_off_to(&mut self, deputy: PeerId) -> Result<(), SessionError> {
        let addr = self
            .roster
            .get(deputy)
            .and_then(|p| p.address)
            .ok_or(SessionError::NoMasterAddress)?;

        self.send_to(addr, Some(deputy), Payload::RoleChange {
            sender_role: Some(Role::Viewer),
            receiver_role: Some(Role::Master),
        });
        self.set_role(LocalRole::Viewer { master: addr })?;
        self.roster.set_role(deputy, Role::Master);
        self.lifecycle = Lifecycle::Observing;
        self.stop_master_activities();
        self.transport.touch(addr);

        info!(peer_id = %deputy, %addr, "handed master role to deputy");
        Ok(())
    }

    /// Keep the current deputy if it is still fit, otherwise pick the
    /// lowest-id live NORMAL peer and tell it.
    pub(crate) fn select_deputy(&mut self) -> Option<PeerId> {
        let Some(LocalRole::Master { deputy }) = self.role else { return None };
        let local = self.local_id?;

        if let Some(current) = deputy {
            let fit = self
                .roster
                .get(current)
                .is_some_and(|p| p.role == Role::Deputy && p.is_reachable())
                && self.avatar_alive(current);
            if fit {
                return Some(current);
            }
        }

        let candidate = deputy_candidate(&self.roster, local, |id| self.avatar_alive(id));
        self.role = Some(LocalRole::Master { deputy: candidate });

        if let Some(id) = candidate {
            self.roster.set_role(id, Role::Deputy);
            if let Some(addr) = self.roster.get(id).and_then(|p| p.address) {
                self.send_to(addr, Some(id), Payload::RoleChange {
                    sender_role: None,
                    receiver_role: Some(Role::Deputy),
                });
            }
            info!(peer_id = %id, "deputy selected");
        }
        candidate
    }

    /// Master-side: `id` stops playing (timed out, left, or stepped down).
    pub(crate) fn retire_peer(&mut self, id: PeerId) {
        self.roster.set_role(id, Role::Viewer);
        if let Some(sim) = self.simulation.as_mut() {
            sim.mark_avatar_dead(id);
        }
        if let Some(LocalRole::Master { deputy: Some(deputy) }) = self.role {
            if deputy == id {
                self.role = Some(LocalRole::Master { deputy: None });
                self.select_deputy();
            }
        }
    }

    // =========================================================================
    // MASTER TICK
    // =========================================================================

    /// Advance the simulation one step and distribute the result. Master only.
    ///
    /// 1. Advance the simulation
    /// 2. Demote players whose avatars died, retiring a dead deputy
    /// 3. Fill a deputy vacancy
    /// 4. Send the new state to every connected peer
    /// 5. If the master's own avatar died, hand off or end the session
    pub fn tick(&mut self) {
        if !self.is_master() || self.lifecycle == Lifecycle::Idle {
            return;
        }
        let Some(local) = self.local_id else { return };
        let Some(sim) = self.simulation.as_mut() else { return };

        sim.advance_tick();
        for peer in self.roster.iter_mut() {
            peer.last_score = sim.score(peer.id);
        }

        let fallen: Vec<PeerId> = self
            .roster
            .iter()
            .filter(|p| p.id != local && matches!(p.role, Role::Normal | Role::Deputy))
            .map(|p| p.id)
            .filter(|id| !self.avatar_alive(*id))
            .collect();
        for id in fallen {
            self.roster.set_role(id, Role::Viewer);
            if self.role.and_then(|r| r.deputy()) == Some(id) {
                self.role = Some(LocalRole::Master { deputy: None });
                if let Some(addr) = self.roster.get(id).filter(|p| p.is_reachable()).and_then(|p| p.address) {
                    self.send_to(addr, Some(id), Payload::RoleChange {
                        sender_role: None,
                        receiver_role: Some(Role::Viewer),
                    });
                }
                info!(peer_id = %id, "deputy avatar died");
            }
        }

        let master_alive = self.avatar_alive(local);
        if !master_alive && self.lifecycle == Lifecycle::InSession {
            self.lifecycle = Lifecycle::Observing;
        }

        let deputy = self.select_deputy();
        let others_alive = self.roster.iter().any(|p| p.id != local && self.avatar_alive(p.id));

        self.broadcast_state();

        let ended = !master_alive && deputy.is_none() && !others_alive;
        if ended && !self.ended {
            info!(session = self.session_name.as_deref().unwrap_or(""), "no avatars left, session ended");
        }
        self.ended = ended;

        if !master_alive {
            if let Some(deputy) = deputy {
                if let Err(e) = self.hand_off_to(deputy) {
                    warn!(peer_id = %deputy, error = %e, "handoff failed");
                }
            }
        }
    }

    fn broadcast_state(&mut self) {
        let Some(sim) = self.simulation.as_ref() else { return };
        let state = StatePayload {
            snapshot: sim.serialize_snapshot(),
            players: self.roster.records(),
        };

        for (id, addr) in self.roster.contacts(self.local_id) {
            self.send_to(addr, Some(id), Payload::State(state.clone()));
        }
    }
}

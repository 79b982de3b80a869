//! Test harness: a scripted simulation and an in-memory mesh of controllers.

use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::game::config::GameConfig;
use crate::game::field::{Coord, Direction, PeerId, Snake, SnakeState};
use crate::game::simulation::Simulation;
use crate::game::snapshot::WorldSnapshot;
use crate::network::config::NodeConfig;
use crate::network::protocol::{Envelope, Role};
use crate::network::role::Lifecycle;
use crate::network::session::{Activity, SessionController};
use crate::network::transport::memory::MemorySocket;
use crate::network::transport::{Channel, Received, Transport};

/// Simulation whose avatars only die when told to.
pub struct FakeSimulation {
    config: GameConfig,
    state_order: u64,
    alive: BTreeSet<PeerId>,
    intents: BTreeMap<PeerId, Direction>,
    scores: BTreeMap<PeerId, u32>,
    free_cells: u32,
}

impl FakeSimulation {
    pub fn kill(&mut self, peer: PeerId) {
        self.alive.remove(&peer);
    }

    pub fn intent(&self, peer: PeerId) -> Option<Direction> {
        self.intents.get(&peer).copied()
    }

    pub fn set_free_cells(&mut self, free_cells: u32) {
        self.free_cells = free_cells;
    }
}

impl Simulation for FakeSimulation {
    fn create(config: GameConfig, _seed: u64) -> Self {
        Self {
            config,
            state_order: 0,
            alive: BTreeSet::new(),
            intents: BTreeMap::new(),
            scores: BTreeMap::new(),
            free_cells: config.area(),
        }
    }

    fn config(&self) -> &GameConfig {
        &self.config
    }

    fn advance_tick(&mut self) {
        self.state_order += 1;
        for peer in &self.alive {
            *self.scores.entry(*peer).or_insert(0) += 1;
        }
    }

    fn serialize_snapshot(&self) -> WorldSnapshot {
        WorldSnapshot {
            state_order: self.state_order,
            snakes: self
                .alive
                .iter()
                .map(|&owner| Snake {
                    owner,
                    cells: vec![Coord::new(owner.0, 0)],
                    heading: Direction::Up,
                    state: SnakeState::Alive,
                })
                .collect(),
            foods: Vec::new(),
            scores: self.scores.clone(),
        }
    }

    fn apply_snapshot(&mut self, snapshot: WorldSnapshot) -> bool {
        if snapshot.state_order <= self.state_order {
            return false;
        }
        self.state_order = snapshot.state_order;
        self.alive = snapshot.snakes.iter().filter(|s| s.is_alive()).map(|s| s.owner).collect();
        self.scores = snapshot.scores;
        true
    }

    fn set_intent(&mut self, peer: PeerId, direction: Direction) {
        self.intents.insert(peer, direction);
    }

    fn try_place_avatar(&mut self, peer: PeerId) -> bool {
        if self.free_cells < 2 {
            return false;
        }
        self.alive.insert(peer)
    }

    fn is_avatar_alive(&self, peer: PeerId) -> bool {
        self.alive.contains(&peer)
    }

    fn mark_avatar_dead(&mut self, peer: PeerId) {
        self.alive.remove(&peer);
    }

    fn free_cells(&self) -> u32 {
        self.free_cells
    }

    fn score(&self, peer: PeerId) -> u32 {
        self.scores.get(&peer).copied().unwrap_or(0)
    }

    fn state_order(&self) -> u64 {
        self.state_order
    }
}

/// Unicast address of mesh node `n`.
pub fn addr(n: usize) -> SocketAddr {
    SocketAddr::from(([10, 0, 0, n as u8 + 1], 9000))
}

fn group() -> SocketAddr {
    SocketAddr::from(([239, 192, 0, 4], 9192))
}

/// Controllers wired together through in-memory sockets.
///
/// Time only moves in [`Mesh::run`]; tests must use a paused runtime.
pub struct Mesh {
    nodes: Vec<SessionController<FakeSimulation>>,
    sockets: Vec<Arc<MemorySocket>>,
    down: BTreeSet<usize>,
    blocked: BTreeSet<(usize, usize)>,
    elapsed: Duration,
}

impl Mesh {
    pub fn new(n: usize) -> Self {
        let mut nodes = Vec::with_capacity(n);
        let mut sockets = Vec::with_capacity(n);
        for i in 0..n {
            let socket = MemorySocket::new(addr(i));
            let config = NodeConfig { seed: Some(1), ..NodeConfig::named(format!("node{i}")) };
            nodes.push(SessionController::new(config, Transport::new(socket.clone(), group())));
            sockets.push(socket);
        }
        Self {
            nodes,
            sockets,
            down: BTreeSet::new(),
            blocked: BTreeSet::new(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn node(&self, i: usize) -> &SessionController<FakeSimulation> {
        &self.nodes[i]
    }

    pub fn node_mut(&mut self, i: usize) -> &mut SessionController<FakeSimulation> {
        &mut self.nodes[i]
    }

    pub fn replace_activities(&mut self, i: usize, tx: mpsc::UnboundedSender<Activity>) {
        self.nodes[i].activities = Some(tx);
    }

    /// Take what node `i` sent without delivering it.
    pub fn drain(&self, i: usize) -> Vec<(SocketAddr, Envelope)> {
        self.sockets[i].drain()
    }

    /// A down node neither sends, receives, nor runs its timers.
    pub fn set_down(&mut self, i: usize, down: bool) {
        if down {
            self.down.insert(i);
        } else {
            self.down.remove(&i);
        }
    }

    /// Drop all traffic between `a` and `b`.
    pub fn isolate(&mut self, a: usize, b: usize) {
        self.blocked.insert((a, b));
        self.blocked.insert((b, a));
    }

    pub fn kill(&mut self, i: usize, peer: PeerId) {
        if let Some(sim) = self.nodes[i].simulation.as_mut() {
            sim.kill(peer);
        }
    }

    /// Indices of nodes that currently consider themselves master.
    pub fn masters(&self) -> Vec<usize> {
        (0..self.nodes.len())
            .filter(|&i| self.nodes[i].role() == Role::Master && self.nodes[i].lifecycle() != Lifecycle::Idle)
            .collect()
    }

    fn index_of(&self, to: SocketAddr) -> Option<usize> {
        (0..self.nodes.len()).find(|&i| addr(i) == to)
    }

    fn reachable(&self, from: usize, to: usize) -> bool {
        !self.down.contains(&from) && !self.down.contains(&to) && !self.blocked.contains(&(from, to))
    }

    /// Route datagrams until the mesh is quiet.
    pub fn deliver(&mut self) {
        self.deliver_dropping(|_, _| false);
    }

    /// Like `deliver`, but the first datagram matching `lost` goes missing.
    pub fn deliver_dropping(&mut self, mut lost: impl FnMut(SocketAddr, &Envelope) -> bool) {
        let mut dropped = false;
        for _ in 0..64 {
            let mut outbound = Vec::new();
            for (i, socket) in self.sockets.iter().enumerate() {
                outbound.extend(socket.drain().into_iter().map(|(to, env)| (i, to, env)));
            }
            if outbound.is_empty() {
                return;
            }

            for (from, to, envelope) in outbound {
                if !dropped && lost(to, &envelope) {
                    dropped = true;
                    continue;
                }
                if to == group() {
                    for j in 0..self.nodes.len() {
                        if j != from && self.reachable(from, j) {
                            self.nodes[j].handle(Received {
                                envelope: envelope.clone(),
                                from: addr(from),
                                channel: Channel::Multicast,
                            });
                        }
                    }
                } else if let Some(j) = self.index_of(to).filter(|&j| self.reachable(from, j)) {
                    self.nodes[j].handle(Received { envelope, from: addr(from), channel: Channel::Unicast });
                }
            }
        }
    }

    pub fn announce_all(&mut self) {
        for i in 0..self.nodes.len() {
            if !self.down.contains(&i) {
                self.nodes[i].announce();
            }
        }
        self.deliver();
    }

    /// Node 0 hosts `name`, nodes `1..=players` join as NORMAL, then one
    /// tick so everyone holds the first state.
    pub fn start_with_players(&mut self, name: &str, players: usize) {
        self.nodes[0].start_session(name, GameConfig::default()).expect("start");
        self.announce_all();
        for i in 1..=players {
            self.nodes[i].join_session(name, Role::Normal).expect("join");
            self.deliver();
        }
        self.nodes[0].tick();
        self.deliver();
    }

    /// Step time in 100 ms increments, running liveness checks on every
    /// live node and master ticks once per second.
    pub async fn run(&mut self, duration: Duration) {
        let step = Duration::from_millis(100);
        let mut remaining = duration;
        while remaining >= step {
            tokio::time::advance(step).await;
            self.elapsed += step;
            remaining -= step;

            for i in 0..self.nodes.len() {
                if !self.down.contains(&i) {
                    self.nodes[i].check_timeouts();
                }
            }
            self.deliver();

            if self.elapsed.as_millis() % 1000 == 0 {
                for i in 0..self.nodes.len() {
                    if !self.down.contains(&i) {
                        self.nodes[i].tick();
                    }
                }
                self.deliver();
            }
        }
    }
}

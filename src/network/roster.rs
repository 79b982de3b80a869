//! Session Roster
//!
//! Known participants of the current session, keyed by id.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use crate::game::field::PeerId;
use crate::network::protocol::{PlayerRecord, Role};

/// Whether the master still hears from a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connection {
    /// Heard from within the failure threshold
    Connected,
    /// Timed out or replaced
    Disconnected,
}

/// One participant.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerInfo {
    /// Session id, immutable once assigned
    pub id: PeerId,
    /// Name shown to other players
    pub display_name: String,
    /// Current role
    pub role: Role,
    /// Unicast address, if known
    pub address: Option<SocketAddr>,
    /// Score as of the last tick
    pub last_score: u32,
    /// Liveness as judged by the master
    pub connection: Connection,
}

impl PeerInfo {
    /// A connected peer with no score.
    pub fn new(id: PeerId, display_name: impl Into<String>, role: Role, address: Option<SocketAddr>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            role,
            address,
            last_score: 0,
            connection: Connection::Connected,
        }
    }

    /// Connected with an address to send to?
    pub fn is_reachable(&self) -> bool {
        self.connection == Connection::Connected && self.address.is_some()
    }

    /// Wire form.
    pub fn to_record(&self) -> PlayerRecord {
        PlayerRecord {
            id: self.id,
            name: self.display_name.clone(),
            role: self.role,
            score: self.last_score,
            address: self.address,
        }
    }

    fn from_record(record: PlayerRecord) -> Self {
        Self {
            id: record.id,
            display_name: record.name,
            role: record.role,
            address: record.address,
            last_score: record.score,
            connection: Connection::Connected,
        }
    }
}

/// Participants keyed by id.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    peers: BTreeMap<PeerId, PeerInfo>,
}

impl Roster {
    /// Empty roster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from wire records. The master's entry gets `master_address`,
    /// since the master cannot reliably know its own public address.
    pub fn from_records(records: Vec<PlayerRecord>, master_address: SocketAddr) -> Self {
        let peers = records
            .into_iter()
            .map(|record| {
                let mut info = PeerInfo::from_record(record);
                if info.role == Role::Master {
                    info.address = Some(master_address);
                }
                (info.id, info)
            })
            .collect();
        Self { peers }
    }

    /// Insert or replace.
    pub fn insert(&mut self, info: PeerInfo) {
        self.peers.insert(info.id, info);
    }

    /// Look up by id.
    pub fn get(&self, id: PeerId) -> Option<&PeerInfo> {
        self.peers.get(&id)
    }

    /// Mutable lookup by id.
    pub fn get_mut(&mut self, id: PeerId) -> Option<&mut PeerInfo> {
        self.peers.get_mut(&id)
    }

    /// Is `id` known?
    pub fn contains(&self, id: PeerId) -> bool {
        self.peers.contains_key(&id)
    }

    /// All peers in id order.
    pub fn iter(&self) -> impl Iterator<Item = &PeerInfo> {
        self.peers.values()
    }

    /// All peers in id order, mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PeerInfo> {
        self.peers.values_mut()
    }

    /// Number of peers.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// No peers?
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Drop everyone.
    pub fn clear(&mut self) {
        self.peers.clear();
    }

    /// Highest assigned id.
    pub fn max_id(&self) -> Option<PeerId> {
        self.peers.keys().next_back().copied()
    }

    /// Connected peer at `addr`.
    pub fn find_by_address(&self, addr: SocketAddr) -> Option<&PeerInfo> {
        self.peers
            .values()
            .find(|p| p.address == Some(addr) && p.connection == Connection::Connected)
    }

    /// First peer holding `role`, other than `exclude`.
    pub fn find_role(&self, role: Role, exclude: Option<PeerId>) -> Option<&PeerInfo> {
        self.peers
            .values()
            .find(|p| p.role == role && Some(p.id) != exclude)
    }

    /// Set the role of `id`, if known.
    pub fn set_role(&mut self, id: PeerId, role: Role) {
        if let Some(peer) = self.peers.get_mut(&id) {
            peer.role = role;
        }
    }

    /// Mark every other record at `addr` as disconnected.
    pub fn disconnect_address(&mut self, addr: SocketAddr, except: PeerId) {
        for peer in self.peers.values_mut() {
            if peer.address == Some(addr) && peer.id != except {
                peer.connection = Connection::Disconnected;
                peer.role = Role::Viewer;
            }
        }
    }

    /// Reachable peers other than `exclude`, as `(id, address)`.
    pub fn contacts(&self, exclude: Option<PeerId>) -> Vec<(PeerId, SocketAddr)> {
        self.peers
            .values()
            .filter(|p| Some(p.id) != exclude && p.connection == Connection::Connected)
            .filter_map(|p| p.address.map(|addr| (p.id, addr)))
            .collect()
    }

    /// Wire form of the whole roster.
    pub fn records(&self) -> Vec<PlayerRecord> {
        self.peers.values().map(PeerInfo::to_record).collect()
    }
}

/// Lowest-id reachable NORMAL peer whose avatar is alive.
pub fn deputy_candidate(roster: &Roster, exclude: PeerId, avatar_alive: impl Fn(PeerId) -> bool) -> Option<PeerId> {
    roster
        .iter()
        .filter(|p| p.id != exclude && p.role == Role::Normal && p.is_reachable())
        .map(|p| p.id)
        .find(|id| avatar_alive(*id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, n], 9000))
    }

    fn roster(peers: &[(i32, Role)]) -> Roster {
        let mut roster = Roster::new();
        for &(id, role) in peers {
            roster.insert(PeerInfo::new(PeerId(id), format!("p{id}"), role, Some(addr(id as u8))));
        }
        roster
    }

    #[test]
    fn test_deputy_lowest_id() {
        let roster = roster(&[(0, Role::Master), (7, Role::Normal), (3, Role::Normal), (5, Role::Normal)]);
        assert_eq!(deputy_candidate(&roster, PeerId(0), |_| true), Some(PeerId(3)));
    }

    #[test]
    fn test_deputy_skips_dead_and_viewers() {
        let mut roster = roster(&[(0, Role::Master), (3, Role::Viewer), (5, Role::Normal), (7, Role::Normal)]);
        assert_eq!(deputy_candidate(&roster, PeerId(0), |id| id != PeerId(5)), Some(PeerId(7)));

        roster.get_mut(PeerId(7)).unwrap().connection = Connection::Disconnected;
        assert_eq!(deputy_candidate(&roster, PeerId(0), |id| id != PeerId(5)), None);
    }

    #[test]
    fn test_from_records_uses_source_for_master() {
        let records = vec![
            PlayerRecord { id: PeerId(0), name: "m".into(), role: Role::Master, score: 4, address: None },
            PlayerRecord { id: PeerId(1), name: "d".into(), role: Role::Deputy, score: 0, address: Some(addr(1)) },
        ];
        let roster = Roster::from_records(records, addr(9));

        assert_eq!(roster.get(PeerId(0)).unwrap().address, Some(addr(9)));
        assert_eq!(roster.get(PeerId(0)).unwrap().last_score, 4);
        assert_eq!(roster.find_role(Role::Deputy, None).unwrap().id, PeerId(1));
        assert_eq!(roster.max_id(), Some(PeerId(1)));
    }

    #[test]
    fn test_disconnect_address() {
        let mut roster = roster(&[(1, Role::Normal)]);
        roster.insert(PeerInfo::new(PeerId(4), "again", Role::Normal, Some(addr(1))));
        roster.disconnect_address(addr(1), PeerId(4));

        assert_eq!(roster.get(PeerId(1)).unwrap().connection, Connection::Disconnected);
        assert_eq!(roster.find_by_address(addr(1)).unwrap().id, PeerId(4));
        assert_eq!(roster.contacts(None), vec![(PeerId(4), addr(1))]);
    }
}

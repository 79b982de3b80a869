//! Protocol Messages
//!
//! Wire format for peer-to-peer session traffic over UDP.
//! Every datagram carries exactly one bincode-encoded [`Envelope`];
//! JSON helpers exist for logging and debugging.

use std::fmt;
use std::net::SocketAddr;
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::game::config::GameConfig;
use crate::game::field::{Direction, PeerId};
use crate::game::snapshot::WorldSnapshot;

/// Largest payload a single IPv4 UDP datagram can carry.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Codec failures.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// bincode could not encode or decode the envelope
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    /// Encoded envelope does not fit one datagram
    #[error("envelope of {0} bytes exceeds datagram limit of {MAX_DATAGRAM_SIZE}")]
    Oversized(usize),
}

// =============================================================================
// ROLES
// =============================================================================

/// Role of a participant within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Owns simulation authority
    Master,
    /// Standby master
    Deputy,
    /// Plays, follows the master
    Normal,
    /// Watches without an avatar
    Viewer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Master => "MASTER",
            Role::Deputy => "DEPUTY",
            Role::Normal => "NORMAL",
            Role::Viewer => "VIEWER",
        };
        f.write_str(name)
    }
}

// =============================================================================
// PAYLOAD DATA
// =============================================================================

/// One participant as advertised in announcements and state messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRecord {
    /// Session id
    pub id: PeerId,
    /// Human readable name
    pub name: String,
    /// Current role
    pub role: Role,
    /// Points earned
    pub score: u32,
    /// Unicast address; `None` when the receiver should use the datagram source
    pub address: Option<SocketAddr>,
}

/// A session advertised on the discovery channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameAnnouncement {
    /// Session name, unique per discovery group
    pub name: String,
    /// Rules of the session
    pub config: GameConfig,
    /// Current roster
    pub players: Vec<PlayerRecord>,
    /// Whether a NORMAL join would currently be accepted
    pub can_join: bool,
}

/// Authoritative state sent by the master after every tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatePayload {
    /// Simulation state
    pub snapshot: WorldSnapshot,
    /// Roster with roles and addresses
    pub players: Vec<PlayerRecord>,
}

// =============================================================================
// ENVELOPE
// =============================================================================

/// Message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    /// Sessions hosted by the sender.
    Announcement(Vec<GameAnnouncement>),

    /// Ask the master for a place in a session.
    Join {
        /// Name shown to other players
        display_name: String,
        /// Target session
        session_name: String,
        /// NORMAL or VIEWER
        requested_role: Role,
    },

    /// Authoritative state.
    State(StatePayload),

    /// Heading change for the sender's avatar.
    Steer(Direction),

    /// Delivery acknowledgement for `sequence`.
    Ack,

    /// Keep-alive.
    Ping,

    /// Application-level rejection.
    Error(String),

    /// Role handover.
    RoleChange {
        /// New role of the sender, if it changed
        sender_role: Option<Role>,
        /// Role the receiver must take, if any
        receiver_role: Option<Role>,
    },

    /// Ask masters to announce their sessions.
    Discover,
}

/// Payload discriminant, for logging and ack bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// Announcement
    Announcement,
    /// Join
    Join,
    /// State
    State,
    /// Steer
    Steer,
    /// Ack
    Ack,
    /// Ping
    Ping,
    /// Error
    Error,
    /// RoleChange
    RoleChange,
    /// Discover
    Discover,
}

impl PayloadKind {
    /// Does a sent message of this kind wait for an Ack?
    pub fn requires_ack(self) -> bool {
        !matches!(self, PayloadKind::Ack | PayloadKind::Announcement | PayloadKind::Discover)
    }
}

impl Payload {
    /// Discriminant of this payload.
    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::Announcement(_) => PayloadKind::Announcement,
            Payload::Join { .. } => PayloadKind::Join,
            Payload::State(_) => PayloadKind::State,
            Payload::Steer(_) => PayloadKind::Steer,
            Payload::Ack => PayloadKind::Ack,
            Payload::Ping => PayloadKind::Ping,
            Payload::Error(_) => PayloadKind::Error,
            Payload::RoleChange { .. } => PayloadKind::RoleChange,
            Payload::Discover => PayloadKind::Discover,
        }
    }
}

/// Addressed, sequenced wrapper around every payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Per-sender monotonic counter; an Ack echoes the acked sequence
    pub sequence: u64,
    /// Sender's session id, if assigned
    pub sender_id: Option<PeerId>,
    /// Receiver's session id, if known
    pub receiver_id: Option<PeerId>,
    /// Body
    pub payload: Payload,
}

impl Envelope {
    /// Create an envelope with no ids.
    pub fn new(sequence: u64, payload: Payload) -> Self {
        Self {
            sequence,
            sender_id: None,
            receiver_id: None,
            payload,
        }
    }

    /// Set the sender id.
    pub fn with_sender(mut self, sender: Option<PeerId>) -> Self {
        self.sender_id = sender;
        self
    }

    /// Set the receiver id.
    pub fn with_receiver(mut self, receiver: Option<PeerId>) -> Self {
        self.receiver_id = receiver;
        self
    }

    /// Payload discriminant.
    pub fn kind(&self) -> PayloadKind {
        self.payload.kind()
    }

    /// Encode for the wire.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        let bytes = bincode::serialize(self)?;
        if bytes.len() > MAX_DATAGRAM_SIZE {
            return Err(ProtocolError::Oversized(bytes.len()));
        }
        Ok(bytes)
    }

    /// Decode a datagram.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        Ok(bincode::deserialize(data)?)
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use proptest::prelude::*;
    use crate::game::field::{Coord, Snake, SnakeState};

    fn record(id: i32, role: Role) -> PlayerRecord {
        PlayerRecord {
            id: PeerId(id),
            name: format!("player-{id}"),
            role,
            score: id as u32,
            address: Some(SocketAddr::from(([10, 0, 0, id as u8], 4000 + id as u16))),
        }
    }

    #[test]
    fn test_requires_ack() {
        assert!(!PayloadKind::Ack.requires_ack());
        assert!(!PayloadKind::Announcement.requires_ack());
        assert!(!PayloadKind::Discover.requires_ack());
        assert!(PayloadKind::Join.requires_ack());
        assert!(PayloadKind::State.requires_ack());
        assert!(PayloadKind::Steer.requires_ack());
        assert!(PayloadKind::Ping.requires_ack());
        assert!(PayloadKind::Error.requires_ack());
        assert!(PayloadKind::RoleChange.requires_ack());
    }

    #[test]
    fn test_empty_roster_and_name_roundtrip() {
        let envelope = Envelope::new(0, Payload::Announcement(vec![GameAnnouncement {
            name: String::new(),
            config: GameConfig::default(),
            players: vec![],
            can_join: false,
        }]));

        let bytes = envelope.to_bytes().unwrap();
        assert_eq!(Envelope::from_bytes(&bytes).unwrap(), envelope);

        let empty = Envelope::new(u64::MAX, Payload::Announcement(vec![]));
        assert_eq!(Envelope::from_bytes(&empty.to_bytes().unwrap()).unwrap(), empty);
    }

    #[test]
    fn test_state_roundtrip() {
        let mut scores = BTreeMap::new();
        scores.insert(PeerId(0), 3);
        let snapshot = WorldSnapshot {
            state_order: 17,
            snakes: vec![Snake {
                owner: PeerId(0),
                cells: vec![Coord::new(1, 1), Coord::new(0, 1)],
                heading: Direction::Right,
                state: SnakeState::Alive,
            }],
            foods: vec![Coord::new(5, 5)],
            scores,
        };
        let envelope = Envelope::new(9, Payload::State(StatePayload {
            snapshot,
            players: vec![record(0, Role::Master), record(1, Role::Deputy)],
        }))
        .with_sender(Some(PeerId(0)))
        .with_receiver(Some(PeerId(1)));

        let bytes = envelope.to_bytes().unwrap();
        assert_eq!(Envelope::from_bytes(&bytes).unwrap(), envelope);
    }

    #[test]
    fn test_json_roundtrip() {
        let envelope = Envelope::new(3, Payload::RoleChange {
            sender_role: None,
            receiver_role: Some(Role::Deputy),
        });
        let json = envelope.to_json().unwrap();
        assert!(json.contains("RoleChange"));
        assert_eq!(Envelope::from_json(&json).unwrap(), envelope);
    }

    #[test]
    fn test_oversized_rejected() {
        let envelope = Envelope::new(1, Payload::Error("x".repeat(MAX_DATAGRAM_SIZE)));
        assert!(matches!(envelope.to_bytes(), Err(ProtocolError::Oversized(_))));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(Envelope::from_bytes(&[0xff; 3]).is_err());
        assert!(Envelope::from_bytes(&[]).is_err());
    }

    fn arb_role() -> impl Strategy<Value = Role> {
        prop_oneof![
            Just(Role::Master),
            Just(Role::Deputy),
            Just(Role::Normal),
            Just(Role::Viewer),
        ]
    }

    fn arb_direction() -> impl Strategy<Value = Direction> {
        prop_oneof![
            Just(Direction::Up),
            Just(Direction::Down),
            Just(Direction::Left),
            Just(Direction::Right),
        ]
    }

    fn arb_record() -> impl Strategy<Value = PlayerRecord> {
        (any::<i32>(), ".{0,12}", arb_role(), any::<u32>(), proptest::option::of(any::<([u8; 4], u16)>()))
            .prop_map(|(id, name, role, score, addr)| PlayerRecord {
                id: PeerId(id),
                name,
                role,
                score,
                address: addr.map(SocketAddr::from),
            })
    }

    fn arb_snapshot() -> impl Strategy<Value = WorldSnapshot> {
        (
            any::<u64>(),
            proptest::collection::vec((any::<i32>(), proptest::collection::vec((0..100i32, 0..100i32), 1..6), arb_direction(), any::<bool>()), 0..4),
            proptest::collection::vec((0..100i32, 0..100i32), 0..6),
        )
            .prop_map(|(state_order, snakes, foods)| WorldSnapshot {
                state_order,
                scores: snakes.iter().map(|(owner, ..)| (PeerId(*owner), 1)).collect(),
                snakes: snakes
                    .into_iter()
                    .map(|(owner, cells, heading, alive)| Snake {
                        owner: PeerId(owner),
                        cells: cells.into_iter().map(|(x, y)| Coord::new(x, y)).collect(),
                        heading,
                        state: if alive { SnakeState::Alive } else { SnakeState::Zombie },
                    })
                    .collect(),
                foods: foods.into_iter().map(|(x, y)| Coord::new(x, y)).collect(),
            })
    }

    fn arb_payload() -> impl Strategy<Value = Payload> {
        prop_oneof![
            proptest::collection::vec(
                (".{0,12}", proptest::collection::vec(arb_record(), 0..4), any::<bool>()),
                0..3
            )
            .prop_map(|games| Payload::Announcement(
                games
                    .into_iter()
                    .map(|(name, players, can_join)| GameAnnouncement {
                        name,
                        config: GameConfig::default(),
                        players,
                        can_join,
                    })
                    .collect()
            )),
            (".{0,12}", ".{0,12}", arb_role()).prop_map(|(display_name, session_name, requested_role)| {
                Payload::Join { display_name, session_name, requested_role }
            }),
            (arb_snapshot(), proptest::collection::vec(arb_record(), 0..4))
                .prop_map(|(snapshot, players)| Payload::State(StatePayload { snapshot, players })),
            arb_direction().prop_map(Payload::Steer),
            Just(Payload::Ack),
            Just(Payload::Ping),
            ".{0,24}".prop_map(Payload::Error),
            (proptest::option::of(arb_role()), proptest::option::of(arb_role()))
                .prop_map(|(sender_role, receiver_role)| Payload::RoleChange { sender_role, receiver_role }),
            Just(Payload::Discover),
        ]
    }

    proptest! {
        #[test]
        fn prop_envelope_roundtrip(
            sequence in any::<u64>(),
            sender in proptest::option::of(any::<i32>()),
            receiver in proptest::option::of(any::<i32>()),
            payload in arb_payload(),
        ) {
            let envelope = Envelope::new(sequence, payload)
                .with_sender(sender.map(PeerId))
                .with_receiver(receiver.map(PeerId));
            let bytes = envelope.to_bytes().unwrap();
            prop_assert_eq!(Envelope::from_bytes(&bytes).unwrap(), envelope);
        }
    }
}

//! Network Layer
//!
//! Session protocol over UDP: discovery by multicast announcement, joins and
//! simulation state over acknowledged unicast, and master failover through a
//! standby deputy. All session logic lives in [`SessionController`]; [`Node`]
//! only binds sockets and runs its timers.

pub mod config;
pub mod protocol;
pub mod transport;
pub mod directory;
pub mod role;
pub mod roster;
pub mod session;
pub mod dispatch;
pub mod failover;
pub mod node;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{NodeConfig, MULTICAST_GROUP};
pub use protocol::{Envelope, GameAnnouncement, Payload, PayloadKind, PlayerRecord, ProtocolError, Role, StatePayload};
pub use transport::{DatagramSocket, Received, Transport, TransportError, TransportReceiver};
pub use directory::{Directory, SessionSummary};
pub use role::{Lifecycle, LocalRole};
pub use roster::{PeerInfo, Roster};
pub use session::{Activity, SessionController, SessionError};
pub use node::{Node, NodeError, NodeStatus};

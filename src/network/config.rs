//! Node Configuration
//!
//! Sockets, timer periods and failure-detector tuning for one node.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use serde::{Serialize, Deserialize};

/// Default discovery group.
pub const MULTICAST_GROUP: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(239, 192, 0, 4), 9192);

/// Node configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Local unicast bind address
    pub bind_addr: SocketAddr,
    /// Discovery multicast group and port
    pub multicast_group: SocketAddrV4,
    /// Name shown to other players
    pub display_name: String,
    /// Longest a single inbound poll may block
    #[serde(with = "millis")]
    pub poll_timeout: Duration,
    /// Liveness check and retransmission period
    #[serde(with = "millis")]
    pub check_interval: Duration,
    /// Directory sweep period
    #[serde(with = "millis")]
    pub sweep_interval: Duration,
    /// Announcement period while MASTER
    #[serde(with = "millis")]
    pub announce_interval: Duration,
    /// Directory entries older than this are evicted
    #[serde(with = "millis")]
    pub directory_staleness: Duration,
    /// Floor of the failure threshold
    #[serde(with = "millis")]
    pub min_failure_threshold: Duration,
    /// Failure threshold as a fraction of the tick interval
    pub failure_threshold_factor: f64,
    /// A session is joinable only with more free cells than this
    pub join_free_cell_floor: u32,
    /// Simulation seed; `None` derives one from the session name and clock
    pub seed: Option<u64>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            multicast_group: MULTICAST_GROUP,
            display_name: "player".to_string(),
            poll_timeout: Duration::from_millis(10),
            check_interval: Duration::from_millis(100),
            sweep_interval: Duration::from_secs(2),
            announce_interval: Duration::from_secs(1),
            directory_staleness: Duration::from_secs(5),
            min_failure_threshold: Duration::from_millis(3000),
            failure_threshold_factor: 0.8,
            join_free_cell_floor: 25,
            seed: None,
        }
    }
}

impl NodeConfig {
    /// Config with a display name, everything else default.
    pub fn named(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            ..Self::default()
        }
    }

    /// Silence after which a peer is declared dead.
    pub fn failure_threshold(&self, state_delay_ms: u64) -> Duration {
        let scaled_ms = (state_delay_ms as f64 * self.failure_threshold_factor).round() as u64;
        Duration::from_millis(scaled_ms).max(self.min_failure_threshold)
    }

    /// Age after which an unacknowledged message is resent.
    pub fn retransmit_interval(&self, state_delay_ms: u64) -> Duration {
        Duration::from_millis((state_delay_ms / 10).max(1))
    }

    /// Idle time after which the master pings a peer.
    pub fn ping_interval(&self, state_delay_ms: u64) -> Duration {
        Duration::from_millis((state_delay_ms / 10).max(1))
    }

    /// Load from a JSON file body.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

mod millis {
    use std::time::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

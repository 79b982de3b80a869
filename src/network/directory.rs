//! Session Directory
//!
//! Cache of sessions heard on the discovery channel. Entries are refreshed by
//! each announcement and evicted once they go quiet.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::game::config::GameConfig;
use crate::network::protocol::{GameAnnouncement, PlayerRecord};

/// A discovered session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    /// Session name
    pub name: String,
    /// Rules
    pub config: GameConfig,
    /// Roster as last announced
    pub players: Vec<PlayerRecord>,
    /// Whether a NORMAL join would be accepted
    pub can_join: bool,
    /// Where to send a Join
    pub master_address: SocketAddr,
    /// When the last announcement arrived
    pub last_seen_at: Instant,
}

impl SessionSummary {
    /// Summary for an announcement that arrived from `master_address`.
    /// The advertised config is clamped.
    pub fn from_announcement(announcement: GameAnnouncement, master_address: SocketAddr, now: Instant) -> Self {
        Self {
            name: announcement.name,
            config: announcement.config.clamped(),
            players: announcement.players,
            can_join: announcement.can_join,
            master_address,
            last_seen_at: now,
        }
    }
}

/// Announced sessions keyed by name.
#[derive(Debug)]
pub struct Directory {
    entries: BTreeMap<String, SessionSummary>,
    staleness: Duration,
}

impl Directory {
    /// Empty directory evicting after `staleness`.
    pub fn new(staleness: Duration) -> Self {
        Self {
            entries: BTreeMap::new(),
            staleness,
        }
    }

    /// Insert or refresh a session.
    pub fn record(&mut self, summary: SessionSummary) {
        if !self.entries.contains_key(&summary.name) {
            debug!(session = %summary.name, master = %summary.master_address, "discovered session");
        }
        self.entries.insert(summary.name.clone(), summary);
    }

    /// Evict entries not refreshed within the staleness window. Returns evicted names.
    pub fn sweep(&mut self, now: Instant) -> Vec<String> {
        let staleness = self.staleness;
        let evicted: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, s)| now.saturating_duration_since(s.last_seen_at) > staleness)
            .map(|(name, _)| name.clone())
            .collect();

        for name in &evicted {
            self.entries.remove(name);
            debug!(session = %name, "evicted stale session");
        }
        evicted
    }

    /// Look up a session by name.
    pub fn get(&self, name: &str) -> Option<&SessionSummary> {
        self.entries.get(name)
    }

    /// Is `name` currently announced?
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Copy of every known session, in name order.
    pub fn sessions(&self) -> Vec<SessionSummary> {
        self.entries.values().cloned().collect()
    }

    /// Number of known sessions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// No sessions known?
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

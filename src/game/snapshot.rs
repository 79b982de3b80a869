//! World Snapshot
//!
//! Versioned full copy of the simulation, produced by the master every tick
//! and applied by everyone else.

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};

use crate::game::field::{Coord, PeerId, Snake};

/// Full simulation state at one tick.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WorldSnapshot {
    /// Strictly increasing version, bumped once per tick
    pub state_order: u64,
    /// Snakes in owner order
    pub snakes: Vec<Snake>,
    /// Food cells
    pub foods: Vec<Coord>,
    /// Points per participant
    pub scores: BTreeMap<PeerId, u32>,
}

impl WorldSnapshot {
    /// Is `peer`'s snake present and alive in this snapshot?
    pub fn is_alive(&self, peer: PeerId) -> bool {
        self.snakes.iter().any(|s| s.owner == peer && s.is_alive())
    }
}

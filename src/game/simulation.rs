//! Simulation Collaborator
//!
//! Everything the session layer needs from the game. Only the master calls
//! the mutating methods other than `apply_snapshot` and `set_intent`.

use crate::game::config::GameConfig;
use crate::game::field::{Direction, PeerId};
use crate::game::snapshot::WorldSnapshot;

/// The simulation as seen by the session controller.
pub trait Simulation: Send + 'static {
    /// Build a fresh simulation for `config`, seeded for placement and food.
    fn create(config: GameConfig, seed: u64) -> Self
    where
        Self: Sized;

    /// Rules this simulation runs under.
    fn config(&self) -> &GameConfig;

    /// Advance one step.
    fn advance_tick(&mut self);

    /// Copy out the current state.
    fn serialize_snapshot(&self) -> WorldSnapshot;

    /// Replace local state with `snapshot` if it is strictly newer.
    ///
    /// Returns `false` (and changes nothing) for a stale or duplicate version.
    fn apply_snapshot(&mut self, snapshot: WorldSnapshot) -> bool;

    /// Record the heading `peer` wants for the next tick.
    fn set_intent(&mut self, peer: PeerId, direction: Direction);

    /// Place a new avatar for `peer`. `false` if no room or already alive.
    fn try_place_avatar(&mut self, peer: PeerId) -> bool;

    /// Is `peer`'s avatar currently alive?
    fn is_avatar_alive(&self, peer: PeerId) -> bool;

    /// Detach `peer` from its avatar; the body stays on the field.
    fn mark_avatar_dead(&mut self, peer: PeerId);

    /// Tick interval in milliseconds.
    fn tick_interval_ms(&self) -> u64 {
        self.config().state_delay_ms
    }

    /// Cells not covered by any avatar.
    fn free_cells(&self) -> u32;

    /// Points earned by `peer`.
    fn score(&self, peer: PeerId) -> u32;

    /// Version of the current state.
    fn state_order(&self) -> u64;
}

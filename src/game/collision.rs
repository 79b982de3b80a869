//! Collision Detection
//!
//! Runs after every snake has moved. A head sharing a cell with another
//! head kills both. A head entering any body (its own included, minus the
//! head itself) kills that snake and credits the body's owner.

use std::collections::{BTreeMap, BTreeSet};

use crate::game::field::{Coord, Field, PeerId};

/// Outcome of collision resolution for one tick.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CollisionOutcome {
    /// Snakes that die this tick
    pub dead: BTreeSet<PeerId>,
    /// One entry per point earned by a body owner
    pub credits: Vec<PeerId>,
}

/// Snakes whose heads share a cell with another head.
pub fn check_head_on(field: &Field) -> BTreeSet<PeerId> {
    let mut heads: BTreeMap<Coord, Vec<PeerId>> = BTreeMap::new();
    for (owner, snake) in &field.snakes {
        if let Some(head) = snake.head() {
            heads.entry(head).or_default().push(*owner);
        }
    }

    heads
        .into_values()
        .filter(|owners| owners.len() > 1)
        .flatten()
        .collect()
}

/// Check all collisions in deterministic (owner id) order.
pub fn check_all_collisions(field: &Field) -> CollisionOutcome {
    let mut outcome = CollisionOutcome {
        dead: check_head_on(field),
        credits: Vec::new(),
    };

    for (owner, snake) in &field.snakes {
        if outcome.dead.contains(owner) {
            continue;
        }
        let Some(head) = snake.head() else { continue };

        for (other_owner, other) in &field.snakes {
            // Own head is skipped
            let start = if other_owner == owner { 1 } else { 0 };
            if other.cells.iter().skip(start).any(|c| *c == head) {
                outcome.dead.insert(*owner);
                if other_owner != owner && other.is_alive() {
                    outcome.credits.push(*other_owner);
                }
                break;
            }
        }
    }

    outcome
}

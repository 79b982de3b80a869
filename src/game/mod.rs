//! Game Logic Module
//!
//! Reference toroidal snake simulation driven by the session master.
//!
//! ## Module Structure
//!
//! - `config`: Session rules (field size, food, tick interval)
//! - `field`: Coordinates, headings, snakes and the field
//! - `collision`: Head-on and body collisions
//! - `engine`: Authoritative tick
//! - `snapshot`: Versioned state copies
//! - `simulation`: Collaborator trait consumed by the session layer

pub mod config;
pub mod field;
pub mod collision;
pub mod engine;
pub mod snapshot;
pub mod simulation;

// Re-export key types
pub use config::GameConfig;
pub use field::{Coord, Direction, Field, PeerId, Snake, SnakeState};
pub use engine::GameEngine;
pub use snapshot::WorldSnapshot;
pub use simulation::Simulation;

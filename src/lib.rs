//! # Snake Mesh
//!
//! Serverless multiplayer snake on a toroidal grid. One peer (the master)
//! owns the simulation and unicasts its state every tick; a deputy stands by
//! to take over when the master disappears.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        SNAKE MESH                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/            - Shared primitives                        │
//! │  └── rng.rs       - Seeded random source                     │
//! │                                                              │
//! │  game/            - Reference simulation (deterministic)     │
//! │  ├── config.rs    - Field size, food, tick interval          │
//! │  ├── field.rs     - Cells, snakes, wrapping grid             │
//! │  ├── collision.rs - Head-on and body collisions              │
//! │  ├── engine.rs    - Authoritative tick                       │
//! │  └── simulation.rs- Trait the session layer drives           │
//! │                                                              │
//! │  network/         - Session protocol (non-deterministic)     │
//! │  ├── protocol.rs  - Envelope and payloads                    │
//! │  ├── transport.rs - UDP sockets, acks, retransmission        │
//! │  ├── directory.rs - Announced sessions                       │
//! │  ├── session.rs   - Lifecycle state machine                  │
//! │  ├── dispatch.rs  - Inbound message handling                 │
//! │  ├── failover.rs  - Liveness, promotion, master tick         │
//! │  └── node.rs      - Background tasks                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism
//!
//! Given the same seed and the same intents, `game/` produces identical
//! states within one build: ordered maps only, no clock reads, all
//! randomness from one seeded generator. Only the master advances it, so replicas never need
//! to agree on anything but the snapshot they were sent.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use core::rng::SessionRng;
pub use game::{GameConfig, GameEngine, PeerId, Simulation, WorldSnapshot};
pub use network::{Node, NodeConfig, NodeError, Role, SessionController, SessionError};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

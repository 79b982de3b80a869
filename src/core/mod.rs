//! Core primitives.

pub mod rng;

pub use rng::{SessionRng, derive_session_seed};

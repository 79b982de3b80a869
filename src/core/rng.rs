//! Seeded Randomness
//!
//! Only the master runs the simulation, so its randomness needs to be
//! reproducible for tests, not portable across builds. A seeded `StdRng`
//! with the handful of draws the engine makes.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Random source of one simulation.
#[derive(Clone, Debug)]
pub struct SessionRng {
    inner: StdRng,
}

impl SessionRng {
    /// Same seed, same sequence (within one build).
    pub fn new(seed: u64) -> Self {
        Self { inner: StdRng::seed_from_u64(seed) }
    }

    /// Cell on a `width` x `height` grid. Both must be non-zero.
    pub fn cell(&mut self, width: u32, height: u32) -> (i32, i32) {
        let x = self.inner.gen_range(0..width.max(1));
        let y = self.inner.gen_range(0..height.max(1));
        (x as i32, y as i32)
    }

    /// Fair coin.
    pub fn coin(&mut self) -> bool {
        self.inner.gen_bool(0.5)
    }

    /// Uniform pick; `None` for an empty slice.
    pub fn pick<T: Copy>(&mut self, items: &[T]) -> Option<T> {
        if items.is_empty() {
            return None;
        }
        Some(items[self.inner.gen_range(0..items.len())])
    }
}

/// Seed for a new session from its name and some entropy (usually the clock).
pub fn derive_session_seed(session_name: &str, entropy: u64) -> u64 {
    let mut hasher = DefaultHasher::new();
    session_name.hash(&mut hasher);
    entropy.hash(&mut hasher);
    hasher.finish()
}

//! Game Configuration
//!
//! Field dimensions, static food and the simulation tick interval.
//! The configuration travels inside every announcement so joiners know
//! the rules before they ask to join.

use serde::{Serialize, Deserialize};

/// Width/height bounds accepted by [`GameConfig::custom`].
pub const FIELD_BOUNDS: (u32, u32) = (10, 100);

/// Static food bounds accepted by [`GameConfig::custom`].
pub const FOOD_BOUNDS: (u32, u32) = (0, 100);

/// Tick interval bounds (ms) accepted by [`GameConfig::custom`].
pub const STATE_DELAY_BOUNDS: (u64, u64) = (100, 3000);

/// Rules of one session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameConfig {
    /// Field width in cells
    pub width: u32,
    /// Field height in cells
    pub height: u32,
    /// Food kept on the field regardless of player count
    pub food_static: u32,
    /// Simulation tick interval in milliseconds
    pub state_delay_ms: u64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            width: 40,
            height: 30,
            food_static: 1,
            state_delay_ms: 1000,
        }
    }
}

impl GameConfig {
    /// Small field with a fast tick.
    pub fn small() -> Self {
        Self {
            width: 20,
            height: 15,
            food_static: 1,
            state_delay_ms: 500,
        }
    }

    /// Large field for many players.
    pub fn large() -> Self {
        Self {
            width: 60,
            height: 40,
            food_static: 2,
            state_delay_ms: 1000,
        }
    }

    /// Build a configuration, clamping every value into its allowed range.
    pub fn custom(width: u32, height: u32, food_static: u32, state_delay_ms: u64) -> Self {
        Self {
            width: width.clamp(FIELD_BOUNDS.0, FIELD_BOUNDS.1),
            height: height.clamp(FIELD_BOUNDS.0, FIELD_BOUNDS.1),
            food_static: food_static.clamp(FOOD_BOUNDS.0, FOOD_BOUNDS.1),
            state_delay_ms: state_delay_ms.clamp(STATE_DELAY_BOUNDS.0, STATE_DELAY_BOUNDS.1),
        }
    }

    /// Same settings pulled into bounds. Use on anything read off the wire.
    pub fn clamped(&self) -> Self {
        Self::custom(self.width, self.height, self.food_static, self.state_delay_ms)
    }

    /// Parse from JSON, then clamp.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let raw: Self = serde_json::from_str(json)?;
        Ok(raw.clamped())
    }

    /// Total number of cells on the field.
    pub fn area(&self) -> u32 {
        self.width * self.height
    }
}

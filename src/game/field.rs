//! Field Definitions
//!
//! Toroidal grid, coordinates, headings and snake bodies.
//! Uses BTreeMap/BTreeSet so iteration order never depends on hashing.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use serde::{Serialize, Deserialize};

// =============================================================================
// PEER ID
// =============================================================================

/// Session-unique participant identifier, assigned by the master at join time.
///
/// Implements Ord for deterministic BTreeMap ordering and lowest-id selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub i32);

impl PeerId {
    /// Id the session creator assigns to itself.
    pub const CREATOR: PeerId = PeerId(0);
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// DIRECTION
// =============================================================================

/// Heading of a snake.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Towards y - 1
    Up,
    /// Towards y + 1
    Down,
    /// Towards x - 1
    Left,
    /// Towards x + 1
    Right,
}

impl Direction {
    /// All headings, in a fixed order for random selection.
    pub const ALL: [Direction; 4] = [Direction::Up, Direction::Down, Direction::Left, Direction::Right];

    /// The reverse heading.
    pub fn opposite(self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
        }
    }

    /// Unit offset for this heading.
    pub fn delta(self) -> (i32, i32) {
        match self {
            Direction::Up => (0, -1),
            Direction::Down => (0, 1),
            Direction::Left => (-1, 0),
            Direction::Right => (1, 0),
        }
    }
}

// =============================================================================
// COORD
// =============================================================================

/// Cell position on the field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Coord {
    /// Column
    pub x: i32,
    /// Row
    pub y: i32,
}

impl Coord {
    /// Create a coordinate.
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Wrap onto a `width` x `height` torus.
    pub fn wrap(self, width: u32, height: u32) -> Self {
        Self {
            x: self.x.rem_euclid(width as i32),
            y: self.y.rem_euclid(height as i32),
        }
    }

    /// Offset by `(dx, dy)` and wrap.
    pub fn offset(self, dx: i32, dy: i32, width: u32, height: u32) -> Self {
        Coord::new(self.x + dx, self.y + dy).wrap(width, height)
    }

    /// Neighbouring cell in `direction`, wrapped.
    pub fn step(self, direction: Direction, width: u32, height: u32) -> Self {
        let (dx, dy) = direction.delta();
        self.offset(dx, dy, width, height)
    }
}

// =============================================================================
// SNAKE
// =============================================================================

/// Whether a snake still has a playing owner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnakeState {
    /// Steered by its owner
    Alive,
    /// Owner left or was declared dead; keeps moving, never steers
    Zombie,
}

/// One snake body. `cells[0]` is the head.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snake {
    /// Owning participant
    pub owner: PeerId,
    /// Body cells, head first
    pub cells: Vec<Coord>,
    /// Current heading
    pub heading: Direction,
    /// Alive or zombie
    pub state: SnakeState,
}

impl Snake {
    /// Head cell, if the body is non-empty.
    pub fn head(&self) -> Option<Coord> {
        self.cells.first().copied()
    }

    /// Is this snake steered by a playing owner?
    pub fn is_alive(&self) -> bool {
        self.state == SnakeState::Alive
    }
}

// =============================================================================
// FIELD
// =============================================================================

/// The toroidal playing field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Field {
    /// Width in cells
    pub width: u32,
    /// Height in cells
    pub height: u32,
    /// Snakes keyed by owner
    pub snakes: BTreeMap<PeerId, Snake>,
    /// Food cells
    pub foods: BTreeSet<Coord>,
}

impl Field {
    /// Create an empty field.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            snakes: BTreeMap::new(),
            foods: BTreeSet::new(),
        }
    }

    /// Is any snake body on this cell?
    pub fn has_snake_at(&self, cell: Coord) -> bool {
        self.snakes.values().any(|s| s.cells.contains(&cell))
    }

    /// Every cell covered by a snake.
    pub fn snake_cells(&self) -> BTreeSet<Coord> {
        self.snakes.values().flat_map(|s| s.cells.iter().copied()).collect()
    }

    /// Is the 5x5 square around `center` free of snakes?
    pub fn area_is_free(&self, center: Coord) -> bool {
        let occupied = self.snake_cells();
        for dx in -2..=2 {
            for dy in -2..=2 {
                if occupied.contains(&center.offset(dx, dy, self.width, self.height)) {
                    return false;
                }
            }
        }
        true
    }

    /// Cells not covered by any snake.
    pub fn free_cells(&self) -> u32 {
        let total = self.width * self.height;
        total.saturating_sub(self.snake_cells().len() as u32)
    }

    /// Number of snakes with a playing owner.
    pub fn alive_count(&self) -> usize {
        self.snakes.values().filter(|s| s.is_alive()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_negative() {
        assert_eq!(Coord::new(-1, -1).wrap(10, 8), Coord::new(9, 7));
        assert_eq!(Coord::new(10, 8).wrap(10, 8), Coord::new(0, 0));
    }

    #[test]
    fn test_step_wraps_edges() {
        let corner = Coord::new(0, 0);
        assert_eq!(corner.step(Direction::Up, 10, 10), Coord::new(0, 9));
        assert_eq!(corner.step(Direction::Left, 10, 10), Coord::new(9, 0));
        assert_eq!(Coord::new(9, 9).step(Direction::Right, 10, 10), Coord::new(0, 9));
    }

    #[test]
    fn test_opposite() {
        for dir in Direction::ALL {
            assert_eq!(dir.opposite().opposite(), dir);
            assert_ne!(dir.opposite(), dir);
        }
    }

    #[test]
    fn test_area_is_free_wraps() {
        let mut field = Field::new(10, 10);
        field.snakes.insert(PeerId(1), Snake {
            owner: PeerId(1),
            cells: vec![Coord::new(9, 9)],
            heading: Direction::Up,
            state: SnakeState::Alive,
        });

        // (0, 0) sees (9, 9) through both seams
        assert!(!field.area_is_free(Coord::new(0, 0)));
        assert!(field.area_is_free(Coord::new(4, 4)));
        assert_eq!(field.free_cells(), 99);
    }
}

//! Reference Snake Engine
//!
//! Authoritative toroidal snake rules. One call to `advance_tick` is one
//! step of the world:
//!
//! 1. Apply queued headings (no reversing)
//! 2. Move every snake one cell, eating food on the way
//! 3. Resolve collisions
//! 4. Turn dead snakes into food
//! 5. Top food up to `food_static + alive snakes`
//! 6. Bump `state_order`

use std::collections::BTreeMap;

use crate::core::rng::SessionRng;
use crate::game::collision::check_all_collisions;
use crate::game::config::GameConfig;
use crate::game::field::{Coord, Direction, Field, PeerId, Snake, SnakeState};
use crate::game::simulation::Simulation;
use crate::game::snapshot::WorldSnapshot;

/// Attempts made to find a free 5x5 area for a new snake.
pub const PLACEMENT_ATTEMPTS: u32 = 100;

/// The reference [`Simulation`].
#[derive(Clone, Debug)]
pub struct GameEngine {
    config: GameConfig,
    field: Field,
    state_order: u64,
    scores: BTreeMap<PeerId, u32>,
    intents: BTreeMap<PeerId, Direction>,
    rng: SessionRng,
}

impl GameEngine {
    /// Create an engine and spawn the static food.
    pub fn new(config: GameConfig, seed: u64) -> Self {
        let mut engine = Self {
            config,
            field: Field::new(config.width, config.height),
            state_order: 0,
            scores: BTreeMap::new(),
            intents: BTreeMap::new(),
            rng: SessionRng::new(seed),
        };
        engine.spawn_food();
        engine
    }

    /// Current field.
    pub fn field(&self) -> &Field {
        &self.field
    }

    fn apply_intents(&mut self) {
        for (peer, direction) in std::mem::take(&mut self.intents) {
            if let Some(snake) = self.field.snakes.get_mut(&peer) {
                if snake.is_alive() && direction != snake.heading.opposite() {
                    snake.heading = direction;
                }
            }
        }
    }

    fn move_snakes(&mut self) {
        let (width, height) = (self.field.width, self.field.height);

        for snake in self.field.snakes.values_mut() {
            let Some(head) = snake.head() else { continue };
            let new_head = head.step(snake.heading, width, height);

            let ate = self.field.foods.remove(&new_head);
            snake.cells.insert(0, new_head);
            if ate {
                if snake.is_alive() {
                    *self.scores.entry(snake.owner).or_insert(0) += 1;
                }
            } else {
                snake.cells.pop();
            }
        }
    }

    fn resolve_collisions(&mut self) {
        let outcome = check_all_collisions(&self.field);

        for owner in outcome.credits {
            *self.scores.entry(owner).or_insert(0) += 1;
        }

        for owner in outcome.dead {
            if let Some(snake) = self.field.snakes.remove(&owner) {
                for cell in snake.cells {
                    if self.rng.coin() {
                        self.field.foods.insert(cell);
                    }
                }
            }
            self.intents.remove(&owner);
        }
    }

    fn spawn_food(&mut self) {
        let required = self.config.food_static as usize + self.field.alive_count();
        let mut to_spawn = required.saturating_sub(self.field.foods.len());

        let mut occupied = self.field.snake_cells();
        occupied.extend(self.field.foods.iter().copied());

        let max_attempts = self.config.area();
        let mut attempts = 0;
        while to_spawn > 0 && attempts < max_attempts {
            let (x, y) = self.rng.cell(self.field.width, self.field.height);
            let cell = Coord::new(x, y);
            if occupied.insert(cell) {
                self.field.foods.insert(cell);
                to_spawn -= 1;
            }
            attempts += 1;
        }
    }
}

impl Simulation for GameEngine {
    fn create(config: GameConfig, seed: u64) -> Self {
        Self::new(config, seed)
    }

    fn config(&self) -> &GameConfig {
        &self.config
    }

    fn advance_tick(&mut self) {
        self.apply_intents();
        self.move_snakes();
        self.resolve_collisions();
        self.spawn_food();
        self.state_order += 1;
    }

    fn serialize_snapshot(&self) -> WorldSnapshot {
        WorldSnapshot {
            state_order: self.state_order,
            snakes: self.field.snakes.values().cloned().collect(),
            foods: self.field.foods.iter().copied().collect(),
            scores: self.scores.clone(),
        }
    }

    fn apply_snapshot(&mut self, snapshot: WorldSnapshot) -> bool {
        if snapshot.state_order <= self.state_order {
            return false;
        }

        self.field.snakes = snapshot.snakes.into_iter().map(|s| (s.owner, s)).collect();
        self.field.foods = snapshot.foods.into_iter().collect();
        self.scores = snapshot.scores;
        self.state_order = snapshot.state_order;
        true
    }

    fn set_intent(&mut self, peer: PeerId, direction: Direction) {
        self.intents.insert(peer, direction);
    }

    fn try_place_avatar(&mut self, peer: PeerId) -> bool {
        if self.is_avatar_alive(peer) {
            return false;
        }

        let (width, height) = (self.field.width, self.field.height);
        for _ in 0..PLACEMENT_ATTEMPTS {
            let (x, y) = self.rng.cell(width, height);
            let head = Coord::new(x, y);
            if !self.field.area_is_free(head) {
                continue;
            }

            let Some(heading) = self.rng.pick(&Direction::ALL) else { continue };
            let tail = head.step(heading.opposite(), width, height);
            if self.field.foods.contains(&head) || self.field.foods.contains(&tail) {
                continue;
            }

            self.field.snakes.insert(peer, Snake {
                owner: peer,
                cells: vec![head, tail],
                heading,
                state: SnakeState::Alive,
            });
            self.scores.entry(peer).or_insert(0);
            return true;
        }

        false
    }

    fn is_avatar_alive(&self, peer: PeerId) -> bool {
        self.field.snakes.get(&peer).is_some_and(Snake::is_alive)
    }

    fn mark_avatar_dead(&mut self, peer: PeerId) {
        if let Some(snake) = self.field.snakes.get_mut(&peer) {
            snake.state = SnakeState::Zombie;
        }
        self.intents.remove(&peer);
    }

    fn free_cells(&self) -> u32 {
        self.field.free_cells()
    }

    fn score(&self, peer: PeerId) -> u32 {
        self.scores.get(&peer).copied().unwrap_or(0)
    }

    fn state_order(&self) -> u64 {
        self.state_order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> GameEngine {
        GameEngine::new(GameConfig::default(), 42)
    }

    fn put_snake(engine: &mut GameEngine, owner: i32, cells: &[(i32, i32)], heading: Direction) {
        engine.field.snakes.insert(PeerId(owner), Snake {
            owner: PeerId(owner),
            cells: cells.iter().map(|&(x, y)| Coord::new(x, y)).collect(),
            heading,
            state: SnakeState::Alive,
        });
    }

    #[test]
    fn test_new_spawns_static_food() {
        let engine = GameEngine::new(GameConfig::large(), 7);
        assert_eq!(engine.field().foods.len(), 2);
        assert_eq!(engine.state_order(), 0);
    }

    #[test]
    fn test_place_avatar() {
        let mut engine = engine();
        assert!(engine.try_place_avatar(PeerId(0)));
        assert!(engine.is_avatar_alive(PeerId(0)));
        assert_eq!(engine.field().snakes[&PeerId(0)].cells.len(), 2);

        // Already alive
        assert!(!engine.try_place_avatar(PeerId(0)));
    }

    #[test]
    fn test_place_avatar_no_room() {
        let mut engine = GameEngine::new(GameConfig::custom(10, 10, 0, 1000), 1);
        let every_cell: Vec<(i32, i32)> = (0..10).flat_map(|x| (0..10).map(move |y| (x, y))).collect();
        put_snake(&mut engine, 9, &every_cell, Direction::Up);

        assert!(!engine.try_place_avatar(PeerId(1)));
        assert_eq!(engine.free_cells(), 0);
    }

    #[test]
    fn test_tick_moves_and_bumps_order() {
        let mut engine = GameEngine::new(GameConfig::custom(20, 20, 0, 1000), 3);
        put_snake(&mut engine, 1, &[(5, 5), (4, 5)], Direction::Right);

        engine.advance_tick();

        let snake = &engine.field().snakes[&PeerId(1)];
        assert_eq!(snake.cells, vec![Coord::new(6, 5), Coord::new(5, 5)]);
        assert_eq!(engine.state_order(), 1);
    }

    #[test]
    fn test_reverse_intent_ignored() {
        let mut engine = GameEngine::new(GameConfig::custom(20, 20, 0, 1000), 3);
        put_snake(&mut engine, 1, &[(5, 5), (4, 5)], Direction::Right);

        engine.set_intent(PeerId(1), Direction::Left);
        engine.advance_tick();
        assert_eq!(engine.field().snakes[&PeerId(1)].heading, Direction::Right);

        engine.set_intent(PeerId(1), Direction::Down);
        engine.advance_tick();
        assert_eq!(engine.field().snakes[&PeerId(1)].head(), Some(Coord::new(6, 6)));
    }

    #[test]
    fn test_eating_grows_and_scores() {
        let mut engine = GameEngine::new(GameConfig::custom(20, 20, 0, 1000), 3);
        engine.field.foods.clear();
        put_snake(&mut engine, 1, &[(5, 5), (4, 5)], Direction::Right);
        engine.field.foods.insert(Coord::new(6, 5));

        engine.advance_tick();

        assert_eq!(engine.field().snakes[&PeerId(1)].cells.len(), 3);
        assert_eq!(engine.score(PeerId(1)), 1);
        // One alive snake, no static food: one replacement spawned
        assert_eq!(engine.field().foods.len(), 1);
    }

    #[test]
    fn test_food_tracks_alive_snakes() {
        let mut engine = engine();
        assert!(engine.try_place_avatar(PeerId(0)));
        assert!(engine.try_place_avatar(PeerId(1)));
        engine.advance_tick();
        assert_eq!(engine.field().foods.len() as u32, engine.config().food_static + 2);
    }

    #[test]
    fn test_dead_snake_removed() {
        let mut engine = GameEngine::new(GameConfig::custom(20, 20, 0, 1000), 5);
        put_snake(&mut engine, 1, &[(5, 5), (4, 5), (3, 5)], Direction::Right);
        put_snake(&mut engine, 2, &[(6, 4), (6, 3)], Direction::Down);

        // 2 moves into (6, 5), where 1's head arrives: head-on
        engine.advance_tick();

        assert!(!engine.is_avatar_alive(PeerId(1)));
        assert!(!engine.is_avatar_alive(PeerId(2)));
        assert!(engine.field().snakes.is_empty());
    }

    #[test]
    fn test_zombie_keeps_moving() {
        let mut engine = GameEngine::new(GameConfig::custom(20, 20, 0, 1000), 3);
        put_snake(&mut engine, 1, &[(5, 5), (4, 5)], Direction::Right);
        engine.mark_avatar_dead(PeerId(1));
        engine.set_intent(PeerId(1), Direction::Down);

        engine.advance_tick();

        assert!(!engine.is_avatar_alive(PeerId(1)));
        let zombie = &engine.field().snakes[&PeerId(1)];
        assert_eq!(zombie.head(), Some(Coord::new(6, 5)));
    }

    #[test]
    fn test_snapshot_application_idempotent() {
        let mut master = engine();
        assert!(master.try_place_avatar(PeerId(0)));
        master.advance_tick();
        master.advance_tick();
        let snapshot = master.serialize_snapshot();

        let mut replica = GameEngine::new(GameConfig::default(), 99);
        assert!(replica.apply_snapshot(snapshot.clone()));
        let after_first = replica.serialize_snapshot();

        assert!(!replica.apply_snapshot(snapshot));
        assert_eq!(replica.serialize_snapshot(), after_first);
        assert_eq!(after_first, master.serialize_snapshot());
    }

    #[test]
    fn test_stale_snapshot_discarded() {
        let mut master = engine();
        master.advance_tick();
        let old = master.serialize_snapshot();
        master.advance_tick();
        let new = master.serialize_snapshot();

        let mut replica = engine();
        assert!(replica.apply_snapshot(new.clone()));
        assert!(!replica.apply_snapshot(old));
        assert_eq!(replica.state_order(), new.state_order);
    }

    #[test]
    fn test_same_seed_same_world() {
        let mut a = engine();
        let mut b = engine();
        for peer in 0..3 {
            assert_eq!(a.try_place_avatar(PeerId(peer)), b.try_place_avatar(PeerId(peer)));
        }
        for _ in 0..10 {
            a.advance_tick();
            b.advance_tick();
        }
        assert_eq!(a.serialize_snapshot(), b.serialize_snapshot());
    }
}

//! Collaborator surface of a controllable unit
//!
//! The combat core only ever sees units through `Avatar`. How a unit moves,
//! takes damage or renders is somebody else's business.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::game::commands::UnitCommand;
use crate::game::constants::behavior::{WANDER_STOP_CHANCE, WANDER_TURN_CHANCE};
use crate::game::tracker::EntityTracker;
use crate::game::walk_map::WalkMap;
use crate::game::zone::{Direction, Zone};
use crate::util::ids::EntityId;
use crate::util::vec2::Vec2;

/// Weapon currently equipped by a unit
#[derive(Debug, Clone, PartialEq)]
pub struct WeaponSpec {
    /// Projectile blueprint name, looked up in the projectile registry
    pub blueprint: Arc<str>,
    /// Launch speed in world units per second
    pub launch_speed: f32,
}

impl WeaponSpec {
    pub fn new(blueprint: &str, launch_speed: f32) -> Self {
        Self {
            blueprint: Arc::from(blueprint),
            launch_speed,
        }
    }
}

/// Read-only view of a unit or target
pub trait Avatar: Send + Sync {
    fn id(&self) -> EntityId;

    /// Zone tracker owned by this unit
    fn tracker(&self) -> &Arc<EntityTracker>;

    /// Top-left corner of the bounding box
    fn position(&self) -> Vec2 {
        self.tracker().position()
    }

    /// Bounding box size
    fn size(&self) -> Vec2 {
        self.tracker().size()
    }

    fn zone(&self) -> Zone {
        self.tracker().zone()
    }

    /// Current velocity
    fn speed(&self) -> Vec2;

    /// Per-axis speed limit
    fn max_speed(&self) -> Vec2;

    fn facing(&self) -> Direction;

    fn weapon(&self) -> Option<WeaponSpec>;

    fn is_alive(&self) -> bool;
}

/// Ambient control used while a unit has nothing to fight
pub trait IdleSource: Send {
    fn next_command(&mut self, unit: &dyn Avatar) -> Option<UnitCommand>;
}

/// Stands still
#[derive(Debug, Default, Clone, Copy)]
pub struct StandStill;

impl IdleSource for StandStill {
    fn next_command(&mut self, _unit: &dyn Avatar) -> Option<UnitCommand> {
        None
    }
}

/// Random walk that only heads into walkable cells
pub struct RandomWander {
    rng: StdRng,
    map: Arc<WalkMap>,
    heading: Option<Direction>,
}

impl RandomWander {
    pub fn new(seed: u64, map: Arc<WalkMap>) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            map,
            heading: None,
        }
    }

    pub fn heading(&self) -> Option<Direction> {
        self.heading
    }

    fn pick_heading(&mut self, zone: Zone) -> Option<Direction> {
        let open: Vec<Direction> = Direction::ALL
            .into_iter()
            .filter(|d| self.map.is_walkable(zone + d.step()))
            .collect();
        if open.is_empty() {
            return None;
        }
        Some(open[self.rng.gen_range(0..open.len())])
    }
}

impl IdleSource for RandomWander {
    fn next_command(&mut self, unit: &dyn Avatar) -> Option<UnitCommand> {
        let zone = unit.zone();

        if let Some(heading) = self.heading {
            if !self.map.is_walkable(zone + heading.step()) {
                self.heading = None;
                return Some(UnitCommand::Stop);
            }
            if !self.rng.gen_bool(WANDER_TURN_CHANCE) {
                return None;
            }
            if self.rng.gen_bool(WANDER_STOP_CHANCE) {
                self.heading = None;
                return Some(UnitCommand::Stop);
            }
        }

        self.heading = self.pick_heading(zone);
        self.heading.map(UnitCommand::Move)
    }
}

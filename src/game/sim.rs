//! In-memory reference unit
//!
//! `SimUnit` is the simplest thing that can stand behind an `Avatar`: it owns
//! a tracker, queues the commands its controller emits, and applies them at the
//! start of its next step with plain kinematics (no acceleration, axis-aligned
//! movement, walls stop it dead).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::game::commands::{CommandQueue, CommandSink, UnitCommand};
use crate::game::tracker::EntityTracker;
use crate::game::unit::{Avatar, WeaponSpec};
use crate::game::walk_map::WalkMap;
use crate::game::zone::Direction;
use crate::util::ids::EntityId;
use crate::util::vec2::Vec2;

#[derive(Debug)]
struct UnitState {
    facing: Direction,
    heading: Option<Direction>,
    speed_factor: f32,
    velocity: Vec2,
    alive: bool,
    weapon: Option<WeaponSpec>,
}

/// Command-driven unit living in a `World`
pub struct SimUnit {
    tracker: Arc<EntityTracker>,
    max_speed: Vec2,
    commands: CommandQueue,
    state: Mutex<UnitState>,
    shots: AtomicU64,
}

impl SimUnit {
    pub fn new(tracker: Arc<EntityTracker>, max_speed: Vec2, weapon: Option<WeaponSpec>) -> Self {
        Self {
            tracker,
            max_speed,
            commands: CommandQueue::default(),
            state: Mutex::new(UnitState {
                facing: Direction::Right,
                heading: None,
                speed_factor: 1.0,
                velocity: Vec2::ZERO,
                alive: true,
                weapon,
            }),
            shots: AtomicU64::new(0),
        }
    }

    /// Apply queued commands and advance one step of `dt` seconds. Returns
    /// true when the unit changed zone.
    pub fn step(&self, dt: f32, map: &WalkMap) -> bool {
        let commands = self.commands.drain();
        let velocity = {
            let mut state = self.state.lock();
            if !state.alive {
                state.velocity = Vec2::ZERO;
                return false;
            }
            for command in commands {
                self.apply(&mut state, command);
            }
            state.velocity = match state.heading {
                Some(heading) => heading.vector().mul_elem(self.max_speed) * state.speed_factor,
                None => Vec2::ZERO,
            };
            state.velocity
        };

        if velocity.is_zero(f32::EPSILON) {
            return false;
        }

        let geometry = self.tracker.geometry();
        let size = self.tracker.size();
        let max = (geometry.world_size() - size).max_elem(Vec2::ZERO);
        let next = (self.tracker.position() + velocity * dt).clamp_elem(Vec2::ZERO, max);

        if !map.is_walkable(geometry.nearest_zone(next)) {
            let mut state = self.state.lock();
            state.heading = None;
            state.velocity = Vec2::ZERO;
            return false;
        }
        self.tracker.update(next, size)
    }

    fn apply(&self, state: &mut UnitState, command: UnitCommand) {
        match command {
            UnitCommand::Move(direction) => {
                state.heading = Some(direction);
                state.facing = direction;
            }
            UnitCommand::Face(direction) => state.facing = direction,
            UnitCommand::SpeedFactor(factor) => state.speed_factor = factor.clamp(0.0, 1.0),
            UnitCommand::Fire => {
                if state.weapon.is_some() {
                    self.shots.fetch_add(1, Ordering::Relaxed);
                    trace!(unit = self.tracker.id(), facing = ?state.facing, "Shot fired");
                }
            }
            UnitCommand::Stop => {
                state.heading = None;
                state.speed_factor = 1.0;
            }
        }
    }

    pub fn kill(&self) {
        let mut state = self.state.lock();
        state.alive = false;
        state.heading = None;
        state.velocity = Vec2::ZERO;
    }

    pub fn set_weapon(&self, weapon: Option<WeaponSpec>) {
        self.state.lock().weapon = weapon;
    }

    /// Shots actually fired (commands received while armed)
    pub fn shots_fired(&self) -> u64 {
        self.shots.load(Ordering::Relaxed)
    }

    pub fn heading(&self) -> Option<Direction> {
        self.state.lock().heading
    }

    pub fn pending_commands(&self) -> usize {
        self.commands.pending_count()
    }
}

impl Avatar for SimUnit {
    fn id(&self) -> EntityId {
        self.tracker.id()
    }

    fn tracker(&self) -> &Arc<EntityTracker> {
        &self.tracker
    }

    fn speed(&self) -> Vec2 {
        self.state.lock().velocity
    }

    fn max_speed(&self) -> Vec2 {
        self.max_speed
    }

    fn facing(&self) -> Direction {
        self.state.lock().facing
    }

    fn weapon(&self) -> Option<WeaponSpec> {
        self.state.lock().weapon.clone()
    }

    fn is_alive(&self) -> bool {
        self.state.lock().alive
    }
}

impl CommandSink for SimUnit {
    fn send(&self, command: UnitCommand) {
        self.commands.send(command);
    }
}

impl std::fmt::Debug for SimUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimUnit")
            .field("id", &self.tracker.id())
            .field("zone", &self.tracker.zone())
            .field("state", &*self.state.lock())
            .finish()
    }
}

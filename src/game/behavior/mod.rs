//! Per-unit combat behavior
//!
//! A `BehaviorController` runs one finite-state machine per controlled unit.
//! States never switch inline: `next` only stages a transition, and the
//! staged state is entered at the very start of the following `update`. A
//! state whose `check` fails, or whose `update` reports done without staging
//! anything, falls back to `ChoosePattern` while the target lives and to
//! `Idle` otherwise.

mod combat;
mod motion;
mod navigate;

use std::collections::VecDeque;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

use crate::game::commands::{CommandSink, UnitCommand};
use crate::game::systems::fire_solution::{FireSolutionCell, FireSolutionEngine};
use crate::game::systems::path_planner::{PathPlanner, PathSlot};
use crate::game::unit::{Avatar, IdleSource};
use crate::game::workers::WorkerPool;
use crate::game::zone::Zone;
use crate::game::zone_grid::ZoneGrid;
use crate::metrics::Metrics;
use crate::util::ids::{EntityId, JobId};

pub use navigate::PathBridge;

/// Behavior states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BehaviorKind {
    /// No target; relays the idle source
    Idle,
    /// Pick a lead offset, then hunt
    ChoosePattern,
    /// Line up with the aim zone and fire
    Hunt,
    /// Walk the planned route toward the target
    Pursuit,
    /// Hold position until a usable route arrives
    Path,
    /// Snap shot at a target about to cross the firing line
    OpportunityFire,
}

/// Shared services every controller in an arena uses
pub struct BehaviorContext {
    pub grid: Arc<ZoneGrid>,
    pub planner: Arc<PathPlanner>,
    pub fire: Arc<FireSolutionEngine>,
    pub workers: Arc<WorkerPool>,
    pub metrics: Arc<Metrics>,
    /// Simulation step, seconds
    pub dt: f32,
    /// Ticks between replans in `Path`
    pub replan_ticks: u32,
}

/// Route being walked, as adopted from the path slot
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// Requested, nothing accepted yet
    Pending,
    Walking(VecDeque<Zone>),
    /// The planner found no route
    Unreachable,
}

/// Finite-state machine driving one unit
pub struct BehaviorController {
    ctx: Arc<BehaviorContext>,
    avatar: Arc<dyn Avatar>,
    sink: Arc<dyn CommandSink>,
    idle: Box<dyn IdleSource>,
    rng: StdRng,

    current: BehaviorKind,
    pending: Option<BehaviorKind>,
    ticks_in_state: u64,

    target: Option<Arc<dyn Avatar>>,
    /// Pattern offset added to the target zone when aiming
    target_offset: Zone,
    solution: Arc<FireSolutionCell>,

    path_slot: Arc<PathSlot>,
    bridge: Option<Arc<PathBridge>>,
    route: Route,
    /// Job id of the path `route` was adopted from
    route_job: JobId,
    replan_in: u32,
}

impl BehaviorController {
    pub fn new(
        ctx: Arc<BehaviorContext>,
        avatar: Arc<dyn Avatar>,
        sink: Arc<dyn CommandSink>,
        idle: Box<dyn IdleSource>,
        seed: u64,
    ) -> Self {
        Self {
            ctx,
            avatar,
            sink,
            idle,
            rng: StdRng::seed_from_u64(seed),
            current: BehaviorKind::Idle,
            pending: None,
            ticks_in_state: 0,
            target: None,
            target_offset: Zone::ZERO,
            solution: Arc::new(FireSolutionCell::new()),
            path_slot: Arc::new(PathSlot::new()),
            bridge: None,
            route: Route::Pending,
            route_job: 0,
            replan_in: 0,
        }
    }

    #[inline]
    pub fn id(&self) -> EntityId {
        self.avatar.id()
    }

    #[inline]
    pub fn current(&self) -> BehaviorKind {
        self.current
    }

    #[inline]
    pub fn pending(&self) -> Option<BehaviorKind> {
        self.pending
    }

    pub fn ticks_in_state(&self) -> u64 {
        self.ticks_in_state
    }

    pub fn target(&self) -> Option<&Arc<dyn Avatar>> {
        self.target.as_ref()
    }

    pub fn target_offset(&self) -> Zone {
        self.target_offset
    }

    pub fn fire_solution(&self) -> &Arc<FireSolutionCell> {
        &self.solution
    }

    pub fn path_slot(&self) -> &Arc<PathSlot> {
        &self.path_slot
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn is_tracking_target(&self) -> bool {
        self.bridge.is_some()
    }

    /// Switch target. Takes effect through a staged transition.
    pub fn set_target(&mut self, target: Option<Arc<dyn Avatar>>) {
        self.detach_bridge();
        self.target = target;
        self.target_offset = Zone::ZERO;
        let next = self.fallback();
        self.next(next);
    }

    /// Stage a transition for the start of the next update
    pub fn next(&mut self, kind: BehaviorKind) {
        self.pending = Some(kind);
    }

    /// Run one tick
    pub fn update(&mut self, tick: u64) {
        if !self.avatar.is_alive() {
            return;
        }

        self.apply_pending(tick);

        if !self.check(self.current) {
            let fallback = self.fallback();
            if fallback != self.current {
                self.next(fallback);
            }
            return;
        }

        let done = match self.current {
            BehaviorKind::Idle => self.update_idle(),
            BehaviorKind::ChoosePattern => {
                self.next(BehaviorKind::Hunt);
                false
            }
            BehaviorKind::Hunt => self.update_hunt(),
            BehaviorKind::Pursuit => self.update_pursuit(),
            BehaviorKind::Path => self.update_path(),
            BehaviorKind::OpportunityFire => self.update_opportunity_fire(),
        };
        self.ticks_in_state += 1;

        if done && self.pending.is_none() {
            let fallback = self.fallback();
            self.next(fallback);
        }
    }

    fn apply_pending(&mut self, tick: u64) {
        let Some(next) = self.pending.take() else {
            return;
        };
        if next == self.current {
            return;
        }

        let prev = self.current;
        debug!(unit = self.avatar.id(), tick, from = ?prev, to = ?next, "Behavior transition");
        self.leave(prev, next);
        self.current = next;
        self.ticks_in_state = 0;
        self.enter(next, prev);
    }

    fn target_alive(&self) -> bool {
        self.target.as_ref().map_or(false, |t| t.is_alive())
    }

    fn fallback(&self) -> BehaviorKind {
        if self.target_alive() {
            BehaviorKind::ChoosePattern
        } else {
            BehaviorKind::Idle
        }
    }

    fn check(&self, kind: BehaviorKind) -> bool {
        match kind {
            BehaviorKind::Idle => true,
            BehaviorKind::ChoosePattern
            | BehaviorKind::Hunt
            | BehaviorKind::Pursuit
            | BehaviorKind::Path => self.target_alive(),
            BehaviorKind::OpportunityFire => self.target_alive() && self.check_opportunity(),
        }
    }

    fn enter(&mut self, kind: BehaviorKind, prev: BehaviorKind) {
        match kind {
            BehaviorKind::Idle => {
                self.detach_bridge();
                if !self.target_alive() {
                    self.target = None;
                }
                self.target_offset = Zone::ZERO;
                self.route = Route::Pending;
                self.sink.send(UnitCommand::Stop);
            }
            BehaviorKind::ChoosePattern => self.choose_pattern(),
            BehaviorKind::Hunt | BehaviorKind::OpportunityFire => {}
            BehaviorKind::Pursuit => self.enter_pursuit(prev),
            BehaviorKind::Path => self.enter_path(),
        }
    }

    fn leave(&mut self, kind: BehaviorKind, next: BehaviorKind) {
        match kind {
            BehaviorKind::Idle => self.sink.send(UnitCommand::Stop),
            BehaviorKind::Pursuit | BehaviorKind::Path => {
                if !matches!(next, BehaviorKind::Pursuit | BehaviorKind::Path) {
                    self.detach_bridge();
                    self.sink.send(UnitCommand::Stop);
                }
            }
            _ => {}
        }
    }

    fn update_idle(&mut self) -> bool {
        if let Some(command) = self.idle.next_command(self.avatar.as_ref()) {
            self.sink.send(command);
        }
        false
    }
}

impl std::fmt::Debug for BehaviorController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BehaviorController")
            .field("unit", &self.avatar.id())
            .field("current", &self.current)
            .field("pending", &self.pending)
            .field("target", &self.target.as_ref().map(|t| t.id()))
            .field("target_offset", &self.target_offset)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Scripted avatars and a recording sink for behavior tests

    use super::*;
    use crate::game::systems::fire_solution::{BallisticProjectile, ProjectileRegistry};
    use crate::game::tracker::EntityTracker;
    use crate::game::unit::WeaponSpec;
    use crate::game::walk_map::WalkMap;
    use crate::game::zone::{Direction, GridGeometry};
    use crate::util::ids::IdGenerator;
    use crate::util::vec2::Vec2;
    use parking_lot::Mutex;

    pub struct Puppet {
        pub id: EntityId,
        pub tracker: Arc<EntityTracker>,
        pub speed: Mutex<Vec2>,
        pub max_speed: Vec2,
        pub facing: Mutex<Direction>,
        pub weapon: Option<WeaponSpec>,
        pub alive: Mutex<bool>,
    }

    impl Puppet {
        pub fn teleport(&self, zone: Zone) {
            let anchor = self.tracker.geometry().anchor(zone);
            self.tracker.update(anchor, self.tracker.size());
        }
    }

    impl Avatar for Puppet {
        fn id(&self) -> EntityId {
            self.id
        }
        fn tracker(&self) -> &Arc<EntityTracker> {
            &self.tracker
        }
        fn speed(&self) -> Vec2 {
            *self.speed.lock()
        }
        fn max_speed(&self) -> Vec2 {
            self.max_speed
        }
        fn facing(&self) -> Direction {
            *self.facing.lock()
        }
        fn weapon(&self) -> Option<WeaponSpec> {
            self.weapon.clone()
        }
        fn is_alive(&self) -> bool {
            *self.alive.lock()
        }
    }

    #[derive(Default)]
    pub struct Recorder {
        pub commands: Mutex<Vec<UnitCommand>>,
    }

    impl Recorder {
        pub fn take(&self) -> Vec<UnitCommand> {
            std::mem::take(&mut *self.commands.lock())
        }
    }

    impl CommandSink for Recorder {
        fn send(&self, command: UnitCommand) {
            self.commands.lock().push(command);
        }
    }

    pub struct Arena {
        pub ctx: Arc<BehaviorContext>,
        pub geometry: GridGeometry,
        pub workers: Arc<WorkerPool>,
    }

    impl Arena {
        /// 10x10 open arena, unit-size cells, inline workers
        pub fn new() -> Self {
            let geometry = GridGeometry::new(10, 10, Vec2::ONE);
            let workers = Arc::new(WorkerPool::inline());
            let grid = Arc::new(ZoneGrid::new(geometry));
            let planner = Arc::new(PathPlanner::new(
                Arc::new(WalkMap::open(10, 10)),
                grid.clone(),
                workers.clone(),
                Arc::new(IdGenerator::new()),
            ));
            let registry = Arc::new(ProjectileRegistry::new());
            // 10 zones per second for 1 second
            registry.register("bolt", BallisticProjectile::constant(10.0, 1.0));
            let fire = Arc::new(FireSolutionEngine::new(registry, Vec2::ONE, 1.0 / 120.0, 5.0));
            let ctx = Arc::new(BehaviorContext {
                grid,
                planner,
                fire,
                workers: workers.clone(),
                metrics: Arc::new(Metrics::new()),
                dt: 1.0 / 30.0,
                replan_ticks: 3,
            });
            Self {
                ctx,
                geometry,
                workers,
            }
        }

        pub fn puppet(&self, id: EntityId, zone: Zone, weapon: Option<WeaponSpec>) -> Arc<Puppet> {
            let tracker = Arc::new(EntityTracker::new(
                id,
                self.geometry,
                self.workers.clone(),
                self.geometry.anchor(zone),
                Vec2::ONE,
            ));
            self.ctx.grid.track(&tracker);
            Arc::new(Puppet {
                id,
                tracker,
                speed: Mutex::new(Vec2::ZERO),
                max_speed: Vec2::splat(4.0),
                facing: Mutex::new(Direction::Right),
                weapon,
                alive: Mutex::new(true),
            })
        }

        pub fn controller(&self, unit: &Arc<Puppet>, sink: &Arc<Recorder>) -> BehaviorController {
            let avatar: Arc<dyn Avatar> = unit.clone();
            let sink: Arc<dyn CommandSink> = sink.clone();
            BehaviorController::new(
                self.ctx.clone(),
                avatar,
                sink,
                Box::new(crate::game::unit::StandStill),
                42,
            )
        }
    }
}

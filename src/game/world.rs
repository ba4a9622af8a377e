//! Arena world: owns the shared combat services and runs the tick
//!
//! One tick moves every unit by the commands queued last tick, lets the grid
//! catch up with zone changes, advances the path planner and finally runs each
//! unit's behavior controller.

use std::sync::Arc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::config::ArenaConfig;
use crate::game::behavior::{BehaviorContext, BehaviorController, BehaviorKind};
use crate::game::sim::SimUnit;
use crate::game::systems::fire_solution::{FireSolutionEngine, ProjectileRegistry};
use crate::game::systems::path_planner::PathPlanner;
use crate::game::tracker::EntityTracker;
use crate::game::unit::{Avatar, RandomWander, WeaponSpec};
use crate::game::walk_map::WalkMap;
use crate::game::workers::WorkerPool;
use crate::game::zone::{GridGeometry, Zone};
use crate::game::zone_grid::{ZoneError, ZoneGrid};
use crate::metrics::Metrics;
use crate::util::ids::{EntityId, IdGenerator};
use crate::util::vec2::Vec2;

/// Blueprint for spawning a unit
#[derive(Debug, Clone)]
pub struct UnitSpec {
    /// Bounding box size in world units
    pub size: Vec2,
    /// Per-axis speed limit in world units per second
    pub max_speed: Vec2,
    pub weapon: Option<WeaponSpec>,
}

struct Slot {
    unit: Arc<SimUnit>,
    controller: BehaviorController,
}

/// A running arena
pub struct World {
    geometry: GridGeometry,
    dt: f32,
    map: Arc<WalkMap>,
    workers: Arc<WorkerPool>,
    metrics: Arc<Metrics>,
    grid: Arc<ZoneGrid>,
    planner: Arc<PathPlanner>,
    fire: Arc<FireSolutionEngine>,
    ctx: Arc<BehaviorContext>,
    entity_ids: IdGenerator,
    rng: StdRng,
    slots: Vec<Slot>,
    tick: u64,
}

impl World {
    /// Build a world over `map`. The grid takes the map's dimensions; every
    /// unwalkable cell is blocked in the grid so no unit can ever occupy it.
    pub fn new(config: &ArenaConfig, map: WalkMap, registry: Arc<ProjectileRegistry>) -> Self {
        Self::with_workers(config, map, registry, Arc::new(WorkerPool::new(config.workers)))
    }

    pub fn with_workers(
        config: &ArenaConfig,
        map: WalkMap,
        registry: Arc<ProjectileRegistry>,
        workers: Arc<WorkerPool>,
    ) -> Self {
        let geometry = GridGeometry::new(map.cols(), map.rows(), Vec2::splat(config.cell_size));
        let metrics = Arc::new(Metrics::new());

        let grid = Arc::new(
            ZoneGrid::new(geometry)
                .with_reserve_probes(config.reserve_probes)
                .with_metrics(metrics.clone()),
        );
        let mut blocked = 0;
        for index in 0..geometry.cell_count() {
            let zone = geometry.zone_at(index);
            if !map.is_walkable(zone) && grid.block(zone).is_ok() {
                blocked += 1;
            }
        }

        let map = Arc::new(map);
        let planner = Arc::new(
            PathPlanner::new(
                map.clone(),
                grid.clone(),
                workers.clone(),
                Arc::new(IdGenerator::new()),
            )
            .with_metrics(metrics.clone()),
        );
        let fire = Arc::new(
            FireSolutionEngine::new(
                registry,
                geometry.cell_size(),
                config.sub_tick_dt(),
                config.fire_time_cap,
            )
            .with_metrics(metrics.clone()),
        );

        let ctx = Arc::new(BehaviorContext {
            grid: grid.clone(),
            planner: planner.clone(),
            fire: fire.clone(),
            workers: workers.clone(),
            metrics: metrics.clone(),
            dt: config.dt(),
            replan_ticks: config.replan_ticks,
        });

        info!(
            cols = geometry.cols(),
            rows = geometry.rows(),
            blocked,
            workers = config.workers,
            "World created"
        );

        Self {
            geometry,
            dt: config.dt(),
            map,
            workers,
            metrics,
            grid,
            planner,
            fire,
            ctx,
            entity_ids: IdGenerator::new(),
            rng: StdRng::seed_from_u64(config.seed),
            slots: Vec::new(),
            tick: 0,
        }
    }

    /// Spawn a unit in a random free cell
    pub fn spawn(&mut self, spec: UnitSpec) -> Result<Arc<SimUnit>, ZoneError> {
        let anchor = self.grid.reserve_random_free_cell(&mut self.rng)?;
        let zone = self.geometry.nearest_zone(anchor);
        self.spawn_reserved(zone, spec)
    }

    /// Spawn a unit in a specific cell
    pub fn spawn_at(&mut self, zone: Zone, spec: UnitSpec) -> Result<Arc<SimUnit>, ZoneError> {
        self.grid.reserve(zone)?;
        self.spawn_reserved(zone, spec)
    }

    fn spawn_reserved(&mut self, zone: Zone, spec: UnitSpec) -> Result<Arc<SimUnit>, ZoneError> {
        let id = self.entity_ids.next_id();
        let tracker = Arc::new(EntityTracker::new(
            id,
            self.geometry,
            self.workers.clone(),
            self.geometry.anchor(zone),
            spec.size,
        ));
        if let Err(e) = self.grid.place(&tracker) {
            self.grid.release(zone);
            return Err(e);
        }
        self.grid.track(&tracker);

        let unit = Arc::new(SimUnit::new(tracker, spec.max_speed, spec.weapon));
        let seed: u64 = self.rng.gen();
        let controller = BehaviorController::new(
            self.ctx.clone(),
            unit.clone(),
            unit.clone(),
            Box::new(RandomWander::new(seed, self.map.clone())),
            seed,
        );
        self.slots.push(Slot {
            unit: unit.clone(),
            controller,
        });

        debug!(unit = id, zone = %zone, "Unit spawned");
        Ok(unit)
    }

    /// Point `unit`'s controller at `target` (`None` clears it). False when
    /// either id is unknown.
    pub fn assign_target(&mut self, unit: EntityId, target: Option<EntityId>) -> bool {
        let target = match target {
            Some(id) => match self.unit(id) {
                Some(found) => Some(found as Arc<dyn Avatar>),
                None => return false,
            },
            None => None,
        };
        match self.slots.iter_mut().find(|s| s.unit.id() == unit) {
            Some(slot) => {
                slot.controller.set_target(target);
                true
            }
            None => false,
        }
    }

    /// Kill a unit and take it off the grid. Controllers targeting it fall
    /// back to Idle on their next update.
    pub fn despawn(&mut self, id: EntityId) -> bool {
        let Some(index) = self.slots.iter().position(|s| s.unit.id() == id) else {
            return false;
        };
        let slot = self.slots.remove(index);
        slot.unit.kill();
        self.grid.remove(slot.unit.tracker());
        debug!(unit = id, "Unit despawned");
        true
    }

    /// Run one tick and return its number
    pub fn tick(&mut self) -> u64 {
        let started = Instant::now();
        let tick = self.tick;

        for slot in &self.slots {
            slot.unit.step(self.dt, &self.map);
        }
        self.grid.execute();
        self.planner.execute(tick);
        for slot in &mut self.slots {
            slot.controller.update(tick);
        }

        self.metrics.set_units_alive(self.slots.iter().filter(|s| s.unit.is_alive()).count());
        self.metrics.record_tick_time(started.elapsed());
        self.tick += 1;
        tick
    }

    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    pub fn unit(&self, id: EntityId) -> Option<Arc<SimUnit>> {
        self.slots.iter().find(|s| s.unit.id() == id).map(|s| s.unit.clone())
    }

    pub fn units(&self) -> impl Iterator<Item = &Arc<SimUnit>> {
        self.slots.iter().map(|s| &s.unit)
    }

    /// Current behavior of a unit's controller
    pub fn behavior(&self, id: EntityId) -> Option<BehaviorKind> {
        self.controller(id).map(BehaviorController::current)
    }

    pub fn controller(&self, id: EntityId) -> Option<&BehaviorController> {
        self.slots.iter().find(|s| s.unit.id() == id).map(|s| &s.controller)
    }

    pub fn unit_count(&self) -> usize {
        self.slots.len()
    }

    pub fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    pub fn grid(&self) -> &Arc<ZoneGrid> {
        &self.grid
    }

    pub fn planner(&self) -> &Arc<PathPlanner> {
        &self.planner
    }

    pub fn fire(&self) -> &Arc<FireSolutionEngine> {
        &self.fire
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn workers(&self) -> &Arc<WorkerPool> {
        &self.workers
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("tick", &self.tick)
            .field("units", &self.slots.len())
            .field("grid", &self.grid)
            .field("planner", &self.planner)
            .finish()
    }
}

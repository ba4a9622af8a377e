//! Ballistic fire solutions
//!
//! A fire solution answers "if I shoot now along this axis, how far will the
//! target have moved sideways by the time the shot gets there?". It is built
//! by flying a throwaway copy of the projectile prototype along +X and +Y at a
//! quarter-tick granularity, recording when the shot enters and leaves each
//! zone of distance, then folding in the target's cross-axis speed.
//!
//! Distances and lead offsets are measured in zones. A sample taken along X
//! predicts a lead on Y and vice versa: targets are led perpendicular to the
//! shot.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::game::constants::fire::SPEED_TOLERANCE;
use crate::game::unit::{Avatar, WeaponSpec};
use crate::game::workers::WorkerPool;
use crate::game::zone::{Direction, Zone};
use crate::metrics::Metrics;
use crate::util::vec2::{Axis, Vec2};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FireSolutionError {
    #[error("No projectile prototype registered for blueprint '{0}'")]
    UndefinedProjectile(String),
    #[error("Unit has no weapon equipped")]
    NoWeapon,
}

/// Simulatable projectile
pub trait Projectile: Send + Sync {
    fn clone_box(&self) -> Box<dyn Projectile>;

    /// Back to the unfired state
    fn reset(&mut self);

    /// Fire from `origin` along unit vector `direction`
    fn launch(&mut self, origin: Vec2, direction: Vec2, launch_speed: f32);

    /// Advance by `dt` seconds
    fn update(&mut self, dt: f32);

    fn position(&self) -> Vec2;

    /// Remaining lifetime in seconds
    fn time_to_live(&self) -> f32;

    fn set_time_to_live(&mut self, ttl: f32);
}

impl Clone for Box<dyn Projectile> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Straight-line projectile with constant acceleration up to a speed cap
#[derive(Debug, Clone)]
pub struct BallisticProjectile {
    /// Speed change per second (negative for drag)
    pub acceleration: f32,
    /// Speed cap in world units per second
    pub max_speed: f32,
    /// Natural lifetime in seconds
    pub lifetime: f32,
    position: Vec2,
    direction: Vec2,
    speed: f32,
    ttl: f32,
}

impl BallisticProjectile {
    pub fn new(acceleration: f32, max_speed: f32, lifetime: f32) -> Self {
        Self {
            acceleration,
            max_speed,
            lifetime,
            position: Vec2::ZERO,
            direction: Vec2::ZERO,
            speed: 0.0,
            ttl: lifetime,
        }
    }

    /// Constant-speed projectile
    pub fn constant(max_speed: f32, lifetime: f32) -> Self {
        Self::new(0.0, max_speed, lifetime)
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }
}

impl Projectile for BallisticProjectile {
    fn clone_box(&self) -> Box<dyn Projectile> {
        Box::new(self.clone())
    }

    fn reset(&mut self) {
        self.position = Vec2::ZERO;
        self.direction = Vec2::ZERO;
        self.speed = 0.0;
        self.ttl = self.lifetime;
    }

    fn launch(&mut self, origin: Vec2, direction: Vec2, launch_speed: f32) {
        self.position = origin;
        self.direction = direction.normalize();
        self.speed = launch_speed.min(self.max_speed).max(0.0);
    }

    fn update(&mut self, dt: f32) {
        if self.ttl <= 0.0 {
            return;
        }
        self.speed = (self.speed + self.acceleration * dt).clamp(0.0, self.max_speed);
        self.position += self.direction * (self.speed * dt);
        self.ttl -= dt;
    }

    fn position(&self) -> Vec2 {
        self.position
    }

    fn time_to_live(&self) -> f32 {
        self.ttl
    }

    fn set_time_to_live(&mut self, ttl: f32) {
        self.ttl = ttl;
    }
}

/// Projectile prototypes by blueprint name
#[derive(Default)]
pub struct ProjectileRegistry {
    prototypes: RwLock<HashMap<String, Box<dyn Projectile>>>,
}

impl ProjectileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: Projectile + 'static>(&self, blueprint: &str, prototype: P) {
        self.prototypes
            .write()
            .insert(blueprint.to_string(), Box::new(prototype));
    }

    pub fn contains(&self, blueprint: &str) -> bool {
        self.prototypes.read().contains_key(blueprint)
    }

    /// Fresh copy of a prototype
    pub fn instantiate(&self, blueprint: &str) -> Option<Box<dyn Projectile>> {
        self.prototypes.read().get(blueprint).map(|p| p.clone_box())
    }

    pub fn len(&self) -> usize {
        self.prototypes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.prototypes.read().is_empty()
    }
}

/// One distance bucket of a lead table
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FireSolutionSample {
    /// Seconds after launch the shot reached this distance
    pub enter: f32,
    /// Seconds after launch the shot moved past it
    pub leave: f32,
    /// Expected target drift in zones, on the axis perpendicular to the shot
    pub lead: Zone,
}

impl FireSolutionSample {
    pub fn new(enter: f32, leave: f32) -> Self {
        Self {
            enter,
            leave,
            lead: Zone::ZERO,
        }
    }

    #[inline]
    pub fn midpoint(&self) -> f32 {
        (self.enter + self.leave) * 0.5
    }
}

/// Lead table for one shot axis, indexed by distance in zones
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleTable {
    samples: Vec<Option<FireSolutionSample>>,
}

impl SampleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a bucket. The first bucket recorded for a distance wins.
    pub fn insert(&mut self, distance: usize, sample: FireSolutionSample) -> bool {
        if self.samples.len() <= distance {
            self.samples.resize(distance + 1, None);
        }
        if self.samples[distance].is_some() {
            return false;
        }
        self.samples[distance] = Some(sample);
        true
    }

    fn close(&mut self, distance: usize, leave: f32) {
        if let Some(Some(sample)) = self.samples.get_mut(distance) {
            sample.leave = leave;
        }
    }

    /// Fold in the target's speed, in zones per second, on the axis
    /// perpendicular to the shot
    pub fn apply_target_solution(&mut self, shot_axis: Axis, perpendicular_speed: f32) {
        let lead_axis = shot_axis.perpendicular();
        for sample in self.samples.iter_mut().flatten() {
            let drift = (perpendicular_speed * sample.midpoint()).round() as i32;
            sample.lead = Zone::ZERO.with_axis(lead_axis, drift);
        }
    }

    /// Fill every gap with the nearest lower recorded sample. Leading gaps,
    /// which only appear for hand-built tables, get an all-zero sample.
    pub fn normalize(&mut self) {
        let mut last = FireSolutionSample::new(0.0, 0.0);
        for slot in self.samples.iter_mut() {
            match slot {
                Some(sample) => last = *sample,
                None => *slot = Some(last),
            }
        }
    }

    pub fn is_dense(&self) -> bool {
        self.samples.iter().all(Option::is_some)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Farthest distance with a sample, `None` for an empty table
    pub fn max_distance(&self) -> Option<usize> {
        self.samples.len().checked_sub(1)
    }

    pub fn get(&self, distance: usize) -> Option<&FireSolutionSample> {
        self.samples.get(distance).and_then(Option::as_ref)
    }

    /// Largest lead magnitude in zones
    pub fn max_lead(&self) -> i32 {
        self.samples
            .iter()
            .flatten()
            .map(|s| s.lead.x.abs().max(s.lead.y.abs()))
            .max()
            .unwrap_or(0)
    }
}

/// Precomputed lead tables for one weapon against one target speed
#[derive(Debug, Clone)]
pub struct FireSolution {
    pub blueprint: Arc<str>,
    /// Weapon launch speed the tables were built with
    pub weapon_speed: f32,
    /// Target max speed the leads were folded with
    pub target_max_speed: Vec2,
    pub sample_x: SampleTable,
    pub sample_y: SampleTable,
}

impl FireSolution {
    /// Still describes `weapon` firing at a target with `target_max_speed`
    pub fn is_valid_for(&self, weapon: &WeaponSpec, target_max_speed: Vec2) -> bool {
        self.blueprint == weapon.blueprint
            && (self.weapon_speed - weapon.launch_speed).abs() <= SPEED_TOLERANCE
            && (self.target_max_speed - target_max_speed).abs().x <= SPEED_TOLERANCE
            && (self.target_max_speed - target_max_speed).abs().y <= SPEED_TOLERANCE
    }

    pub fn table(&self, shot_axis: Axis) -> &SampleTable {
        match shot_axis {
            Axis::X => &self.sample_x,
            Axis::Y => &self.sample_y,
        }
    }

    /// Range in zones along a shot axis
    pub fn range(&self, shot_axis: Axis) -> i32 {
        self.table(shot_axis).max_distance().map_or(0, |d| d as i32)
    }

    /// Predicted target drift for a shot of `distance` zones along
    /// `shot_axis`; `None` beyond range
    pub fn lead(&self, shot_axis: Axis, distance: i32) -> Option<Zone> {
        if distance < 0 {
            return None;
        }
        self.table(shot_axis).get(distance as usize).map(|s| s.lead)
    }

    /// Largest lead over both axes
    pub fn max_lead(&self) -> i32 {
        self.sample_x.max_lead().max(self.sample_y.max_lead())
    }
}

/// Builds fire solutions from registered projectile prototypes
pub struct FireSolutionEngine {
    registry: Arc<ProjectileRegistry>,
    cell_size: Vec2,
    /// Sampling step in seconds
    sub_tick: f32,
    /// Longest flight ever simulated, seconds
    time_cap: f32,
    metrics: Arc<Metrics>,
}

impl FireSolutionEngine {
    pub fn new(registry: Arc<ProjectileRegistry>, cell_size: Vec2, sub_tick: f32, time_cap: f32) -> Self {
        Self {
            registry,
            cell_size,
            sub_tick,
            time_cap,
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn registry(&self) -> &Arc<ProjectileRegistry> {
        &self.registry
    }

    /// Fire solution for `unit`'s weapon against `target`
    pub fn recalculate(&self, unit: &dyn Avatar, target: &dyn Avatar) -> Result<FireSolution, FireSolutionError> {
        let weapon = unit.weapon().ok_or(FireSolutionError::NoWeapon)?;
        self.compute(&weapon, target.max_speed())
    }

    /// Fire solution for `weapon` against a target moving at up to
    /// `target_max_speed`
    pub fn compute(&self, weapon: &WeaponSpec, target_max_speed: Vec2) -> Result<FireSolution, FireSolutionError> {
        let result = self.build(weapon, target_max_speed);
        match &result {
            Ok(solution) => debug!(
                blueprint = %weapon.blueprint,
                range_x = solution.range(Axis::X),
                range_y = solution.range(Axis::Y),
                "Fire solution computed"
            ),
            Err(e) => warn!("Fire solution failed: {}", e),
        }
        self.metrics.record_fire_solution(result.is_ok());
        result
    }

    fn build(&self, weapon: &WeaponSpec, target_max_speed: Vec2) -> Result<FireSolution, FireSolutionError> {
        let mut projectile = self
            .registry
            .instantiate(&weapon.blueprint)
            .ok_or_else(|| FireSolutionError::UndefinedProjectile(weapon.blueprint.to_string()))?;

        let flight_time = projectile.time_to_live().min(self.time_cap).max(0.0);
        let mut sample_x = self.sample_axis(projectile.as_mut(), Direction::Right, weapon.launch_speed, flight_time);
        let mut sample_y = self.sample_axis(projectile.as_mut(), Direction::Down, weapon.launch_speed, flight_time);

        // Zones per second on the perpendicular axis
        let target_zone_speed = target_max_speed.abs().div_elem(self.cell_size);
        sample_x.apply_target_solution(Axis::X, target_zone_speed.y);
        sample_y.apply_target_solution(Axis::Y, target_zone_speed.x);
        sample_x.normalize();
        sample_y.normalize();

        Ok(FireSolution {
            blueprint: weapon.blueprint.clone(),
            weapon_speed: weapon.launch_speed,
            target_max_speed,
            sample_x,
            sample_y,
        })
    }

    /// Fly the projectile along one axis and bucket its progress by zone
    fn sample_axis(
        &self,
        projectile: &mut dyn Projectile,
        direction: Direction,
        launch_speed: f32,
        flight_time: f32,
    ) -> SampleTable {
        let axis = direction.axis();
        let cell = self.cell_size.axis(axis);

        projectile.reset();
        projectile.set_time_to_live(f32::INFINITY);
        projectile.launch(Vec2::ZERO, direction.vector(), launch_speed);

        let mut table = SampleTable::new();
        table.insert(0, FireSolutionSample::new(0.0, 0.0));
        // Bucket opened by this run and still waiting for its leave time
        let mut open: Option<usize> = Some(0);
        let mut current = 0i32;

        let steps = (flight_time / self.sub_tick).ceil() as usize;
        let mut t = 0.0;
        for _ in 0..steps {
            projectile.update(self.sub_tick);
            t += self.sub_tick;

            let distance = (projectile.position().axis(axis) / cell).round() as i32;
            if distance == current {
                continue;
            }
            if let Some(d) = open.take() {
                table.close(d, t);
            }
            current = distance;
            if distance >= 0 && table.insert(distance as usize, FireSolutionSample::new(t, t)) {
                open = Some(distance as usize);
            }
        }
        if let Some(d) = open {
            table.close(d, t);
        }
        table
    }
}

/// Latest fire solution for one controller, recomputed in the background
#[derive(Default)]
pub struct FireSolutionCell {
    outcome: Mutex<Outcome>,
    /// False after a failed recalculation until the next success
    valid: AtomicBool,
    in_flight: AtomicBool,
    generation: AtomicU64,
}

/// Newest settled recalculation. A failure keeps the last good solution
/// around for inspection.
#[derive(Default)]
struct Outcome {
    generation: u64,
    solution: Option<Arc<FireSolution>>,
}

/// Clears the in-flight flag when a background recalculation ends, and marks
/// the cell invalid if it ended by panicking
struct InFlight {
    cell: Arc<FireSolutionCell>,
    generation: u64,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.cell.settle_failure(self.generation);
        }
        self.cell.in_flight.store(false, Ordering::Release);
    }
}

impl FireSolutionCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Arc<FireSolution>> {
        self.outcome.lock().solution.clone()
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Current solution if it is valid and matches `weapon` and the target
    pub fn fresh_for(&self, weapon: &WeaponSpec, target_max_speed: Vec2) -> Option<Arc<FireSolution>> {
        if !self.is_valid() {
            return None;
        }
        self.current()
            .filter(|s| s.is_valid_for(weapon, target_max_speed))
    }

    pub fn is_recalculating(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Recompute synchronously and store the outcome
    pub fn recalculate(
        &self,
        engine: &FireSolutionEngine,
        weapon: &WeaponSpec,
        target_max_speed: Vec2,
    ) -> Result<Arc<FireSolution>, FireSolutionError> {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.store(generation, engine.compute(weapon, target_max_speed))
    }

    /// Recompute on the worker pool unless a recalculation is already running
    pub fn request(
        self: &Arc<Self>,
        engine: &Arc<FireSolutionEngine>,
        workers: &WorkerPool,
        weapon: WeaponSpec,
        target_max_speed: Vec2,
    ) -> bool {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            return false;
        }
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let guard = InFlight {
            cell: self.clone(),
            generation,
        };
        let engine = engine.clone();
        workers.spawn("fire-solution", move || {
            let guard = guard;
            let result = engine.compute(&weapon, target_max_speed);
            let _ = guard.cell.store(guard.generation, result);
        });
        true
    }

    /// Record a result unless a newer recalculation already settled. The
    /// result is handed back either way.
    fn store(
        &self,
        generation: u64,
        result: Result<FireSolution, FireSolutionError>,
    ) -> Result<Arc<FireSolution>, FireSolutionError> {
        let mut outcome = self.outcome.lock();
        let newest = generation > outcome.generation;
        if newest {
            outcome.generation = generation;
        }
        match result {
            Ok(solution) => {
                let solution = Arc::new(solution);
                if newest {
                    outcome.solution = Some(solution.clone());
                    self.valid.store(true, Ordering::Release);
                }
                Ok(solution)
            }
            Err(e) => {
                if newest {
                    self.valid.store(false, Ordering::Release);
                }
                Err(e)
            }
        }
    }

    fn settle_failure(&self, generation: u64) {
        let mut outcome = self.outcome.lock();
        if generation > outcome.generation {
            outcome.generation = generation;
            self.valid.store(false, Ordering::Release);
        }
    }
}

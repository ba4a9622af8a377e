//! Zone occupancy index
//!
//! Fixed-size grid holding at most one live occupant per cell. Trackers flag
//! themselves dirty when their entity changes zone; `execute` re-places every
//! dirty tracker once per tick. Placement into a cell held by an occupant that
//! is itself waiting to move relocates that occupant first (cascading), so a
//! column of units advancing in lockstep does not collide with itself.
//!
//! Every read and write goes through a single `parking_lot::Mutex`, held only
//! for the duration of one call.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rand::Rng;
use smallvec::SmallVec;
use tracing::debug;

use crate::game::constants::grid::{MAX_RELOCATION_DEPTH, RESERVE_PROBES};
use crate::game::tracker::EntityTracker;
use crate::game::zone::{GridGeometry, Zone};
use crate::metrics::Metrics;
use crate::util::ids::EntityId;
use crate::util::vec2::Vec2;

/// Errors from grid placement and reservation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ZoneError {
    #[error("Zone {0} is outside the grid")]
    ZoneOutOfRange(Zone),
    #[error("Zone {zone} is occupied by entity {occupant}")]
    ZoneCollision { zone: Zone, occupant: EntityId },
    #[error("No free zone available")]
    ZoneEmpty,
    #[error("Zone {0} is blocked")]
    ZoneBlocked(Zone),
}

/// Source of the set of currently occupied cells
pub trait OccupancyProvider: Send + Sync {
    fn occupied_zones(&self) -> Vec<Zone>;
}

#[derive(Debug, Clone)]
enum Cell {
    Empty,
    /// Held for a pending spawn
    Reserved,
    /// Permanently unavailable, such as a wall
    Blocked,
    Occupied {
        id: EntityId,
        tracker: Weak<EntityTracker>,
    },
}

impl Cell {
    #[inline]
    fn holds(&self, entity: EntityId) -> bool {
        matches!(self, Cell::Occupied { id, .. } if *id == entity)
    }

    /// Empty, or occupied by an entity that no longer exists
    #[inline]
    fn is_claimable(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Reserved | Cell::Blocked => false,
            Cell::Occupied { tracker, .. } => tracker.strong_count() == 0,
        }
    }
}

type RelocationChain = SmallVec<[EntityId; MAX_RELOCATION_DEPTH]>;

#[derive(Debug)]
struct GridCells {
    cells: Vec<Cell>,
    occupied: usize,
    reserved: usize,
    blocked: usize,
    /// Always `cells.len() - occupied - reserved - blocked`
    free: usize,
    /// Trackers re-placed by `execute`
    tracked: Vec<Weak<EntityTracker>>,
}

impl GridCells {
    fn new(count: usize) -> Self {
        Self {
            cells: vec![Cell::Empty; count],
            occupied: 0,
            reserved: 0,
            blocked: 0,
            free: count,
            tracked: Vec::new(),
        }
    }

    /// Replace a cell, keeping the counters in step
    fn set(&mut self, index: usize, cell: Cell) {
        match self.cells[index] {
            Cell::Empty => self.free -= 1,
            Cell::Reserved => self.reserved -= 1,
            Cell::Blocked => self.blocked -= 1,
            Cell::Occupied { .. } => self.occupied -= 1,
        }
        match cell {
            Cell::Empty => self.free += 1,
            Cell::Reserved => self.reserved += 1,
            Cell::Blocked => self.blocked += 1,
            Cell::Occupied { .. } => self.occupied += 1,
        }
        self.cells[index] = cell;
        debug_assert_eq!(
            self.free,
            self.cells.len() - self.occupied - self.reserved - self.blocked
        );
    }

    fn place(
        &mut self,
        geometry: &GridGeometry,
        tracker: &Arc<EntityTracker>,
        chain: &mut RelocationChain,
    ) -> Result<Zone, ZoneError> {
        let id = tracker.id();
        let (target, placed) = tracker.placement();
        let index = geometry
            .index(target)
            .ok_or(ZoneError::ZoneOutOfRange(target))?;

        if self.cells[index].holds(id) {
            tracker.mark_placed(target);
            return Ok(target);
        }
        if matches!(self.cells[index], Cell::Blocked) {
            return Err(ZoneError::ZoneBlocked(target));
        }

        chain.push(id);

        if let Cell::Occupied {
            id: occupant_id,
            tracker: occupant,
        } = self.cells[index].clone()
        {
            match occupant.upgrade() {
                Some(occupant) => {
                    let collision = ZoneError::ZoneCollision {
                        zone: target,
                        occupant: occupant_id,
                    };
                    let (wanted, _) = occupant.placement();
                    if !occupant.is_dirty()
                        || wanted == target
                        || chain.contains(&occupant_id)
                        || chain.len() >= MAX_RELOCATION_DEPTH
                    {
                        return Err(collision);
                    }
                    self.place(geometry, &occupant, chain).map_err(|_| collision)?;
                }
                None => self.set(index, Cell::Empty),
            }
        }

        if let Some(old_index) = placed.and_then(|z| geometry.index(z)) {
            if self.cells[old_index].holds(id) {
                self.set(old_index, Cell::Empty);
            }
        }

        self.set(
            index,
            Cell::Occupied {
                id,
                tracker: Arc::downgrade(tracker),
            },
        );
        tracker.mark_placed(target);
        Ok(target)
    }

    /// Drop dead trackers from the registry and free the cells they held
    fn prune_dead(&mut self) -> usize {
        let before = self.tracked.len();
        self.tracked.retain(|t| t.strong_count() > 0);
        let pruned = before - self.tracked.len();

        if pruned > 0 {
            for index in 0..self.cells.len() {
                if let Cell::Occupied { tracker, .. } = &self.cells[index] {
                    if tracker.strong_count() == 0 {
                        self.set(index, Cell::Empty);
                    }
                }
            }
        }
        pruned
    }
}

/// Shared zone occupancy grid
pub struct ZoneGrid {
    geometry: GridGeometry,
    reserve_probes: u32,
    inner: Mutex<GridCells>,
    metrics: Arc<Metrics>,
}

impl ZoneGrid {
    pub fn new(geometry: GridGeometry) -> Self {
        Self {
            geometry,
            reserve_probes: RESERVE_PROBES,
            inner: Mutex::new(GridCells::new(geometry.cell_count())),
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn with_reserve_probes(mut self, probes: u32) -> Self {
        self.reserve_probes = probes.max(1);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    #[inline]
    pub fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    /// Zone containing `point`, clamped into the grid
    #[inline]
    pub fn to_zone(&self, point: Vec2) -> Zone {
        self.geometry.to_zone(point)
    }

    /// Zone whose anchor is nearest to `point`, clamped into the grid
    #[inline]
    pub fn nearest_zone(&self, point: Vec2) -> Zone {
        self.geometry.nearest_zone(point)
    }

    /// Register a tracker for tick-time re-placement
    pub fn track(&self, tracker: &Arc<EntityTracker>) {
        let mut inner = self.inner.lock();
        let ptr = Arc::as_ptr(tracker);
        if !inner.tracked.iter().any(|t| t.as_ptr() == ptr) {
            inner.tracked.push(Arc::downgrade(tracker));
        }
    }

    /// Put an entity into the zone its tracker reports
    pub fn place(&self, tracker: &Arc<EntityTracker>) -> Result<Zone, ZoneError> {
        let mut inner = self.inner.lock();
        let mut chain = RelocationChain::new();
        inner.place(&self.geometry, tracker, &mut chain)
    }

    /// Clear an entity from the grid and stop tracking it. Falls back to a
    /// full scan when the tracker's idea of its cell is out of date.
    pub fn remove(&self, tracker: &EntityTracker) {
        let mut inner = self.inner.lock();
        let id = tracker.id();
        let (_, placed) = tracker.placement();

        let cleared = match placed.and_then(|z| self.geometry.index(z)) {
            Some(index) if inner.cells[index].holds(id) => {
                inner.set(index, Cell::Empty);
                true
            }
            _ => false,
        };

        if !cleared {
            for index in 0..inner.cells.len() {
                if inner.cells[index].holds(id) {
                    inner.set(index, Cell::Empty);
                }
            }
        }

        let ptr = tracker as *const EntityTracker;
        inner.tracked.retain(|t| t.as_ptr() != ptr);
        tracker.mark_removed();
    }

    /// Reserve a random free cell for a spawn and return its anchor
    pub fn reserve_random_free_cell<R: Rng>(&self, rng: &mut R) -> Result<Vec2, ZoneError> {
        let mut inner = self.inner.lock();
        if inner.free == 0 && !inner.cells.iter().any(Cell::is_claimable) {
            return Err(ZoneError::ZoneEmpty);
        }

        let count = inner.cells.len();
        for _ in 0..self.reserve_probes {
            let index = rng.gen_range(0..count);
            if inner.cells[index].is_claimable() {
                inner.set(index, Cell::Reserved);
                return Ok(self.geometry.anchor(self.geometry.zone_at(index)));
            }
        }

        Err(ZoneError::ZoneEmpty)
    }

    /// Reserve a specific cell
    pub fn reserve(&self, zone: Zone) -> Result<(), ZoneError> {
        let mut inner = self.inner.lock();
        let index = self
            .geometry
            .index(zone)
            .ok_or(ZoneError::ZoneOutOfRange(zone))?;
        match &inner.cells[index] {
            Cell::Reserved => Ok(()),
            Cell::Blocked => Err(ZoneError::ZoneBlocked(zone)),
            Cell::Occupied { id, tracker } if tracker.strong_count() > 0 => {
                Err(ZoneError::ZoneCollision { zone, occupant: *id })
            }
            _ => {
                inner.set(index, Cell::Reserved);
                Ok(())
            }
        }
    }

    /// Take a cell out of play for good. A live occupant keeps the cell.
    pub fn block(&self, zone: Zone) -> Result<(), ZoneError> {
        let mut inner = self.inner.lock();
        let index = self
            .geometry
            .index(zone)
            .ok_or(ZoneError::ZoneOutOfRange(zone))?;
        match &inner.cells[index] {
            Cell::Blocked => Ok(()),
            Cell::Occupied { id, tracker } if tracker.strong_count() > 0 => {
                Err(ZoneError::ZoneCollision { zone, occupant: *id })
            }
            _ => {
                inner.set(index, Cell::Blocked);
                Ok(())
            }
        }
    }

    /// Return a reserved cell to empty. No-op for any other cell state.
    pub fn release(&self, zone: Zone) {
        let mut inner = self.inner.lock();
        if let Some(index) = self.geometry.index(zone) {
            if matches!(inner.cells[index], Cell::Reserved) {
                inner.set(index, Cell::Empty);
            }
        }
    }

    /// Re-place every tracked entity whose tracker is dirty. Failures leave
    /// the tracker dirty for the next tick. Returns how many were placed.
    pub fn execute(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.prune_dead();

        let trackers: Vec<Arc<EntityTracker>> =
            inner.tracked.iter().filter_map(Weak::upgrade).collect();

        let mut placed = 0;
        for tracker in trackers {
            if !tracker.is_dirty() {
                continue;
            }
            let mut chain = RelocationChain::new();
            match inner.place(&self.geometry, &tracker, &mut chain) {
                Ok(_) => placed += 1,
                Err(e) => {
                    debug!(entity = tracker.id(), "Deferred placement: {}", e);
                    self.metrics.record_zone_collision();
                }
            }
        }
        placed
    }

    /// Live occupant of a zone
    pub fn occupant(&self, zone: Zone) -> Option<EntityId> {
        let inner = self.inner.lock();
        let index = self.geometry.index(zone)?;
        match &inner.cells[index] {
            Cell::Occupied { id, tracker } if tracker.strong_count() > 0 => Some(*id),
            _ => None,
        }
    }

    pub fn is_reserved(&self, zone: Zone) -> bool {
        let inner = self.inner.lock();
        self.geometry
            .index(zone)
            .map_or(false, |i| matches!(inner.cells[i], Cell::Reserved))
    }

    pub fn is_blocked(&self, zone: Zone) -> bool {
        let inner = self.inner.lock();
        self.geometry
            .index(zone)
            .map_or(false, |i| matches!(inner.cells[i], Cell::Blocked))
    }

    pub fn free_cells(&self) -> usize {
        self.inner.lock().free
    }

    pub fn occupied_cells(&self) -> usize {
        self.inner.lock().occupied
    }

    pub fn reserved_cells(&self) -> usize {
        self.inner.lock().reserved
    }

    pub fn blocked_cells(&self) -> usize {
        self.inner.lock().blocked
    }

    pub fn tracked_count(&self) -> usize {
        self.inner.lock().tracked.len()
    }
}

impl OccupancyProvider for ZoneGrid {
    fn occupied_zones(&self) -> Vec<Zone> {
        let inner = self.inner.lock();
        inner
            .cells
            .iter()
            .enumerate()
            .filter_map(|(index, cell)| match cell {
                Cell::Occupied { tracker, .. } if tracker.strong_count() > 0 => {
                    Some(self.geometry.zone_at(index))
                }
                _ => None,
            })
            .collect()
    }
}

impl std::fmt::Debug for ZoneGrid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ZoneGrid")
            .field("geometry", &self.geometry)
            .field("occupied", &inner.occupied)
            .field("reserved", &inner.reserved)
            .field("free", &inner.free)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::workers::WorkerPool;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const CELL: f32 = 16.0;

    fn geometry() -> GridGeometry {
        GridGeometry::new(4, 3, Vec2::splat(CELL))
    }

    fn tracker(id: EntityId, zone: Zone) -> Arc<EntityTracker> {
        tracker_on(geometry(), id, zone)
    }

    fn tracker_on(geometry: GridGeometry, id: EntityId, zone: Zone) -> Arc<EntityTracker> {
        Arc::new(EntityTracker::new(
            id,
            geometry,
            Arc::new(WorkerPool::inline()),
            geometry.anchor(zone),
            Vec2::splat(CELL),
        ))
    }

    fn move_to(tracker: &EntityTracker, zone: Zone) {
        let g = *tracker.geometry();
        assert!(tracker.update(g.anchor(zone), Vec2::splat(CELL)));
    }

    #[test]
    fn test_place_and_remove_restores_free_count() {
        let grid = ZoneGrid::new(geometry());
        let before = grid.free_cells();
        let t = tracker(1, Zone::new(2, 1));

        assert_eq!(grid.place(&t), Ok(Zone::new(2, 1)));
        assert_eq!(grid.free_cells(), before - 1);
        assert_eq!(grid.occupant(Zone::new(2, 1)), Some(1));
        assert!(!t.is_dirty());

        grid.remove(&t);
        assert_eq!(grid.free_cells(), before);
        assert_eq!(grid.occupant(Zone::new(2, 1)), None);
    }

    #[test]
    fn test_place_out_of_range() {
        let grid = ZoneGrid::new(geometry());
        let wide = GridGeometry::new(10, 10, Vec2::splat(CELL));
        let t = tracker_on(wide, 1, Zone::new(8, 8));
        assert_eq!(grid.place(&t), Err(ZoneError::ZoneOutOfRange(Zone::new(8, 8))));
    }

    #[test]
    fn test_place_collision_with_settled_occupant() {
        let grid = ZoneGrid::new(geometry());
        let a = tracker(1, Zone::new(1, 1));
        let b = tracker(2, Zone::new(1, 1));
        grid.place(&a).unwrap();

        let err = grid.place(&b).unwrap_err();
        assert_eq!(
            err,
            ZoneError::ZoneCollision {
                zone: Zone::new(1, 1),
                occupant: 1
            }
        );
        assert_eq!(grid.occupied_cells(), 1);
    }

    #[test]
    fn test_place_relocates_dirty_occupant() {
        let grid = ZoneGrid::new(geometry());
        let leader = tracker(1, Zone::new(1, 0));
        let follower = tracker(2, Zone::new(0, 0));
        grid.place(&leader).unwrap();
        grid.place(&follower).unwrap();

        // Leader moved on but the grid has not caught up yet
        move_to(&leader, Zone::new(2, 0));
        move_to(&follower, Zone::new(1, 0));

        assert_eq!(grid.place(&follower), Ok(Zone::new(1, 0)));
        assert_eq!(grid.occupant(Zone::new(2, 0)), Some(1));
        assert_eq!(grid.occupant(Zone::new(1, 0)), Some(2));
        assert_eq!(grid.occupant(Zone::new(0, 0)), None);
        assert!(!leader.is_dirty());
        assert_eq!(grid.occupied_cells(), 2);
    }

    #[test]
    fn test_swap_cycle_is_a_collision() {
        let grid = ZoneGrid::new(geometry());
        let a = tracker(1, Zone::new(0, 0));
        let b = tracker(2, Zone::new(1, 0));
        grid.place(&a).unwrap();
        grid.place(&b).unwrap();

        move_to(&a, Zone::new(1, 0));
        move_to(&b, Zone::new(0, 0));

        assert!(matches!(grid.place(&a), Err(ZoneError::ZoneCollision { .. })));
        assert_eq!(grid.occupant(Zone::new(0, 0)), Some(1));
        assert_eq!(grid.occupant(Zone::new(1, 0)), Some(2));
    }

    #[test]
    fn test_dead_occupant_is_reclaimed() {
        let grid = ZoneGrid::new(geometry());
        {
            let ghost = tracker(1, Zone::new(3, 2));
            grid.place(&ghost).unwrap();
        }
        let t = tracker(2, Zone::new(3, 2));
        assert_eq!(grid.place(&t), Ok(Zone::new(3, 2)));
        assert_eq!(grid.occupied_cells(), 1);
    }

    #[test]
    fn test_remove_scans_when_tracker_is_desynced() {
        let grid = ZoneGrid::new(geometry());
        let t = tracker(5, Zone::new(2, 2));
        grid.place(&t).unwrap();
        t.mark_removed();

        grid.remove(&t);
        assert_eq!(grid.occupant(Zone::new(2, 2)), None);
        assert_eq!(grid.free_cells(), 12);
    }

    #[test]
    fn test_reserve_until_empty() {
        let grid = ZoneGrid::new(geometry()).with_reserve_probes(10_000);
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..12 {
            let p = grid.reserve_random_free_cell(&mut rng).unwrap();
            assert!(grid.is_reserved(grid.to_zone(p)));
        }
        assert_eq!(grid.free_cells(), 0);
        assert_eq!(grid.reserved_cells(), 12);
        assert_eq!(grid.reserve_random_free_cell(&mut rng), Err(ZoneError::ZoneEmpty));
    }

    #[test]
    fn test_placing_into_reservation_consumes_it() {
        let grid = ZoneGrid::new(geometry());
        grid.reserve(Zone::new(1, 2)).unwrap();
        let free = grid.free_cells();

        let t = tracker(1, Zone::new(1, 2));
        grid.place(&t).unwrap();
        assert_eq!(grid.reserved_cells(), 0);
        assert_eq!(grid.free_cells(), free);

        grid.reserve(Zone::new(0, 0)).unwrap();
        grid.release(Zone::new(0, 0));
        assert_eq!(grid.free_cells(), free);
    }

    #[test]
    fn test_blocked_cell_rejects_placement_and_reservation() {
        let grid = ZoneGrid::new(geometry()).with_reserve_probes(10_000);
        let wall = Zone::new(1, 1);
        grid.block(wall).unwrap();
        assert_eq!(grid.blocked_cells(), 1);
        assert_eq!(grid.free_cells(), 11);

        assert_eq!(grid.place(&tracker(1, wall)), Err(ZoneError::ZoneBlocked(wall)));
        assert_eq!(grid.reserve(wall), Err(ZoneError::ZoneBlocked(wall)));
        grid.release(wall);
        assert!(grid.is_blocked(wall));
        assert_eq!(grid.occupant(wall), None);

        // A walker stepping into the wall stays dirty in its old cell
        let walker = tracker(2, Zone::new(0, 1));
        grid.track(&walker);
        grid.execute();
        move_to(&walker, wall);
        assert_eq!(grid.execute(), 0);
        assert!(walker.is_dirty());
        assert_eq!(grid.occupant(Zone::new(0, 1)), Some(2));

        let mut rng = StdRng::seed_from_u64(5);
        while grid.reserve_random_free_cell(&mut rng).is_ok() {}
        assert!(grid.is_blocked(wall));
        assert_eq!(grid.reserved_cells(), 10);
    }

    #[test]
    fn test_execute_replaces_dirty_trackers() {
        let grid = ZoneGrid::new(geometry());
        let a = tracker(1, Zone::new(0, 0));
        let b = tracker(2, Zone::new(3, 2));
        grid.track(&a);
        grid.track(&b);

        assert_eq!(grid.execute(), 2);
        assert_eq!(grid.execute(), 0);

        move_to(&a, Zone::new(1, 0));
        assert_eq!(grid.execute(), 1);
        assert_eq!(grid.occupant(Zone::new(1, 0)), Some(1));
        assert_eq!(grid.occupant(Zone::new(0, 0)), None);
    }

    #[test]
    fn test_execute_prunes_dropped_trackers() {
        let grid = ZoneGrid::new(geometry());
        let keep = tracker(1, Zone::new(0, 0));
        grid.track(&keep);
        {
            let gone = tracker(2, Zone::new(1, 1));
            grid.track(&gone);
            grid.execute();
            assert_eq!(grid.occupied_cells(), 2);
        }
        grid.execute();
        assert_eq!(grid.tracked_count(), 1);
        assert_eq!(grid.occupied_cells(), 1);
        assert_eq!(grid.occupied_zones(), vec![Zone::new(0, 0)]);
    }

    #[test]
    fn test_execute_failure_keeps_tracker_dirty() {
        let metrics = Arc::new(Metrics::new());
        let grid = ZoneGrid::new(geometry()).with_metrics(metrics.clone());
        let a = tracker(1, Zone::new(0, 0));
        let b = tracker(2, Zone::new(0, 0));
        grid.track(&a);
        grid.track(&b);

        assert_eq!(grid.execute(), 1);
        assert!(b.is_dirty());
        assert_eq!(metrics.snapshot().zone_collisions, 1);
    }
}

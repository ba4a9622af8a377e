use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use arena_tactics::game::tracker::{EntityTracker, ZoneSubscriber};
use arena_tactics::game::workers::WorkerPool;
use arena_tactics::game::zone::{GridGeometry, Zone};
use arena_tactics::game::zone_grid::{OccupancyProvider, ZoneError, ZoneGrid};
use arena_tactics::util::ids::EntityId;
use arena_tactics::util::vec2::Vec2;

const CELL: f32 = 16.0;

fn geometry() -> GridGeometry {
    GridGeometry::new(10, 10, Vec2::splat(CELL))
}

fn tracker(id: EntityId, zone: Zone, workers: &Arc<WorkerPool>) -> Arc<EntityTracker> {
    let g = geometry();
    Arc::new(EntityTracker::new(id, g, workers.clone(), g.anchor(zone), Vec2::splat(CELL)))
}

#[derive(Default)]
struct Seen(Mutex<Vec<(EntityId, Zone)>>);

impl ZoneSubscriber for Seen {
    fn zone_changed(&self, entity: EntityId, zone: Zone) {
        self.0.lock().push((entity, zone));
    }
}

#[test]
fn test_to_zone_clamps_far_points() {
    let grid = ZoneGrid::new(geometry());
    assert_eq!(grid.to_zone(Vec2::new(-1000.0, 5.0)), Zone::new(0, 0));
    assert_eq!(grid.to_zone(Vec2::new(10_000.0, 10_000.0)), Zone::new(9, 9));
    assert_eq!(grid.to_zone(Vec2::new(17.0, 159.9)), Zone::new(1, 9));
}

#[test]
fn test_place_then_remove_restores_free_count() {
    let workers = Arc::new(WorkerPool::inline());
    let grid = ZoneGrid::new(geometry());
    let before = grid.free_cells();

    let a = tracker(1, Zone::new(4, 4), &workers);
    assert_eq!(grid.place(&a), Ok(Zone::new(4, 4)));
    assert_eq!(grid.free_cells(), before - 1);
    assert_eq!(grid.occupant(Zone::new(4, 4)), Some(1));

    grid.remove(&a);
    assert_eq!(grid.free_cells(), before);
    assert_eq!(grid.occupant(Zone::new(4, 4)), None);
    assert!(grid.occupied_zones().is_empty());
}

#[test]
fn test_second_entity_collides() {
    let workers = Arc::new(WorkerPool::inline());
    let grid = ZoneGrid::new(geometry());
    let a = tracker(1, Zone::new(2, 3), &workers);
    let b = tracker(2, Zone::new(2, 3), &workers);

    grid.place(&a).unwrap();
    assert_eq!(
        grid.place(&b),
        Err(ZoneError::ZoneCollision {
            zone: Zone::new(2, 3),
            occupant: 1
        })
    );
    assert_eq!(grid.occupant(Zone::new(2, 3)), Some(1));
}

#[test]
fn test_dropped_occupant_cell_is_reclaimed() {
    let workers = Arc::new(WorkerPool::inline());
    let grid = ZoneGrid::new(geometry());
    let a = tracker(1, Zone::new(5, 5), &workers);
    grid.place(&a).unwrap();
    drop(a);

    let b = tracker(2, Zone::new(5, 5), &workers);
    assert_eq!(grid.place(&b), Ok(Zone::new(5, 5)));
    assert_eq!(grid.occupant(Zone::new(5, 5)), Some(2));
}

#[test]
fn test_execute_follows_moving_tracker() {
    let workers = Arc::new(WorkerPool::inline());
    let grid = ZoneGrid::new(geometry());
    let a = tracker(1, Zone::new(1, 1), &workers);
    grid.track(&a);
    assert_eq!(grid.execute(), 1);

    // Sub-threshold jitter: no churn, nothing to re-place
    assert!(!a.update(Vec2::new(CELL + 3.0, CELL - 2.0), Vec2::splat(CELL)));
    assert!(!a.is_dirty());
    assert_eq!(grid.execute(), 0);

    assert!(a.update(Vec2::new(CELL * 2.0, CELL), Vec2::splat(CELL)));
    assert!(a.is_dirty());
    assert_eq!(grid.execute(), 1);
    assert_eq!(grid.occupant(Zone::new(2, 1)), Some(1));
    assert_eq!(grid.occupant(Zone::new(1, 1)), None);
}

#[test]
fn test_column_advancing_in_lockstep_does_not_collide() {
    let workers = Arc::new(WorkerPool::inline());
    let grid = ZoneGrid::new(geometry());
    let lead = tracker(1, Zone::new(3, 2), &workers);
    let follower = tracker(2, Zone::new(3, 3), &workers);
    // Follower registered first so it is re-placed before the leader
    grid.track(&follower);
    grid.track(&lead);
    grid.execute();

    lead.update(grid.geometry().anchor(Zone::new(3, 1)), Vec2::splat(CELL));
    follower.update(grid.geometry().anchor(Zone::new(3, 2)), Vec2::splat(CELL));
    grid.execute();
    assert_eq!(grid.occupant(Zone::new(3, 1)), Some(1));
    assert_eq!(grid.occupant(Zone::new(3, 2)), Some(2));
    assert_eq!(grid.occupant(Zone::new(3, 3)), None);
    assert!(!lead.is_dirty() && !follower.is_dirty());
}

#[test]
fn test_reservation_blocks_random_spawns() {
    let workers = Arc::new(WorkerPool::inline());
    let grid = ZoneGrid::new(GridGeometry::new(2, 1, Vec2::splat(CELL)));
    grid.reserve(Zone::new(0, 0)).unwrap();

    let mut rng = <rand::rngs::StdRng as rand::SeedableRng>::seed_from_u64(3);
    let anchor = grid.reserve_random_free_cell(&mut rng).unwrap();
    assert_eq!(anchor, Vec2::new(CELL, 0.0));
    assert_eq!(grid.reserve_random_free_cell(&mut rng), Err(ZoneError::ZoneEmpty));

    // Spawn hand-off consumes the reservation
    let unit = Arc::new(EntityTracker::new(
        9,
        *grid.geometry(),
        workers,
        anchor,
        Vec2::splat(CELL),
    ));
    assert_eq!(grid.place(&unit), Ok(Zone::new(1, 0)));
    assert_eq!(grid.reserved_cells(), 1);
}

#[test]
fn test_notifications_arrive_from_threaded_pool() {
    let workers = Arc::new(WorkerPool::new(2));
    let a = tracker(4, Zone::new(0, 0), &workers);
    let seen = Arc::new(Seen::default());
    a.subscribe(&seen);

    assert!(a.update(Vec2::new(CELL, 0.0), Vec2::splat(CELL)));
    assert!(workers.wait_idle(Duration::from_secs(2)));
    assert_eq!(seen.0.lock().as_slice(), &[(4, Zone::new(1, 0))]);

    a.unsubscribe(&seen);
    assert!(a.update(Vec2::new(CELL * 2.0, 0.0), Vec2::splat(CELL)));
    assert!(workers.wait_idle(Duration::from_secs(2)));
    assert_eq!(seen.0.lock().len(), 1);
}

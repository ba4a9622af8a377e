use std::sync::Arc;
use std::time::Duration;

use arena_tactics::config::ArenaConfig;
use arena_tactics::game::behavior::BehaviorKind;
use arena_tactics::game::systems::fire_solution::{BallisticProjectile, ProjectileRegistry};
use arena_tactics::game::unit::{Avatar, WeaponSpec};
use arena_tactics::game::walk_map::WalkMap;
use arena_tactics::game::workers::WorkerPool;
use arena_tactics::game::world::{UnitSpec, World};
use arena_tactics::game::zone::Zone;
use arena_tactics::util::vec2::Vec2;

fn config(workers: usize) -> ArenaConfig {
    ArenaConfig {
        cell_size: 1.0,
        workers,
        seed: 11,
        ..ArenaConfig::default()
    }
}

fn registry() -> Arc<ProjectileRegistry> {
    let registry = Arc::new(ProjectileRegistry::new());
    registry.register("bolt", BallisticProjectile::constant(12.0, 1.0));
    registry
}

fn hunter() -> UnitSpec {
    UnitSpec {
        size: Vec2::ONE,
        max_speed: Vec2::splat(3.0),
        weapon: Some(WeaponSpec::new("bolt", 12.0)),
    }
}

fn dummy() -> UnitSpec {
    UnitSpec {
        size: Vec2::ONE,
        max_speed: Vec2::ZERO,
        weapon: None,
    }
}

#[test]
fn test_aligned_hunter_fires_on_second_tick() {
    let mut world = World::new(&config(0), WalkMap::open(12, 12), registry());
    let shooter = world.spawn_at(Zone::new(1, 1), hunter()).unwrap();
    let target = world.spawn_at(Zone::new(1, 8), dummy()).unwrap();
    assert!(world.assign_target(shooter.id(), Some(target.id())));

    world.tick(); // ChoosePattern
    world.tick(); // Hunt: Stop, Face(Down), Fire queued
    assert_eq!(world.behavior(shooter.id()), Some(BehaviorKind::Hunt));
    assert_eq!(shooter.shots_fired(), 0);

    world.tick(); // commands applied
    assert_eq!(shooter.shots_fired(), 1);
    assert_eq!(shooter.facing(), arena_tactics::game::zone::Direction::Down);
    assert!(world.metrics().snapshot().shots_fired >= 1);
    assert_eq!(shooter.zone(), Zone::new(1, 1));
}

#[test]
fn test_hunter_walks_into_line_and_fires() {
    let mut world = World::new(&config(0), WalkMap::walled(12, 12), registry());
    let shooter = world.spawn_at(Zone::new(1, 1), hunter()).unwrap();
    let target = world.spawn_at(Zone::new(8, 8), dummy()).unwrap();
    world.assign_target(shooter.id(), Some(target.id()));

    for _ in 0..300 {
        world.tick();
        if shooter.shots_fired() > 0 {
            break;
        }
    }

    assert!(shooter.shots_fired() > 0);
    let here = shooter.zone();
    assert_ne!(here, Zone::new(1, 1));
    assert!(here.is_aligned_with(Zone::new(8, 8)));
    let snapshot = world.metrics().snapshot();
    assert!(snapshot.paths_delivered >= 1);
    assert_eq!(snapshot.paths_unreachable, 0);
}

#[test]
fn test_walled_in_target_parks_hunter_in_path() {
    let map = WalkMap::parse(&[
        "..........",
        "..........",
        "......###.",
        "......#.#.",
        "......###.",
        "..........",
    ])
    .unwrap();
    let mut world = World::new(&config(0), map, registry());
    let shooter = world.spawn_at(Zone::new(0, 0), hunter()).unwrap();
    let target = world.spawn_at(Zone::new(7, 3), dummy()).unwrap();
    world.assign_target(shooter.id(), Some(target.id()));

    let mut saw_path = false;
    for _ in 0..60 {
        world.tick();
        saw_path |= world.behavior(shooter.id()) == Some(BehaviorKind::Path);
    }
    assert!(saw_path);
    assert!(world.metrics().snapshot().paths_unreachable >= 1);
    assert_eq!(shooter.shots_fired(), 0);
}

#[test]
fn test_threaded_world_keeps_ticking() {
    let workers = Arc::new(WorkerPool::new(2));
    let mut world = World::with_workers(&config(2), WalkMap::walled(16, 12), registry(), workers.clone());
    let mut ids = Vec::new();
    for _ in 0..6 {
        ids.push(world.spawn(hunter()).unwrap().id());
    }
    for (i, &id) in ids.iter().enumerate() {
        assert!(world.assign_target(id, Some(ids[(i + 1) % ids.len()])));
    }

    for _ in 0..120 {
        world.tick();
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(workers.wait_idle(Duration::from_secs(2)));

    let snapshot = world.metrics().snapshot();
    assert_eq!(snapshot.tick_count, 120);
    assert_eq!(snapshot.units_alive, 6);
    assert!(snapshot.fire_solutions_computed >= 1);
    assert_eq!(snapshot.fire_solutions_failed, 0);

    // No two units ever share a cell in the grid
    let mut zones: Vec<Zone> = world
        .units()
        .filter(|u| world.grid().occupant(u.zone()) == Some(u.id()))
        .map(|u| u.zone())
        .collect();
    let before = zones.len();
    zones.sort();
    zones.dedup();
    assert_eq!(zones.len(), before);
}

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use arena_tactics::config::ArenaConfig;
use arena_tactics::game::systems::fire_solution::{BallisticProjectile, ProjectileRegistry};
use arena_tactics::game::unit::{Avatar, WeaponSpec};
use arena_tactics::game::walk_map::WalkMap;
use arena_tactics::game::world::{UnitSpec, World};
use arena_tactics::util::vec2::Vec2;

/// Units in the demo arena; each hunts the next one in the ring
const DEMO_UNITS: usize = 6;
/// Seconds between stats lines
const REPORT_INTERVAL_SECS: u64 = 5;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("Arena Tactics v{}", env!("CARGO_PKG_VERSION"));

    let config = ArenaConfig::load_or_default();
    config.validate().map_err(anyhow::Error::msg)?;
    info!(
        "Configuration loaded: {}x{} cells of {}, {} Hz, {} workers",
        config.cols, config.rows, config.cell_size, config.tick_rate, config.workers
    );

    // 10 cells per second for one second
    let cell = config.cell_size;
    let registry = Arc::new(ProjectileRegistry::new());
    registry.register("bolt", BallisticProjectile::constant(cell * 10.0, 1.0));
    // Slow starter that speeds up, shorter range in practice
    registry.register("rocket", BallisticProjectile::new(cell * 20.0, cell * 14.0, 0.8));

    let mut world = World::new(&config, WalkMap::walled(config.cols, config.rows), registry);

    let mut ids = Vec::with_capacity(DEMO_UNITS);
    for n in 0..DEMO_UNITS {
        let weapon = if n % 2 == 0 {
            WeaponSpec::new("bolt", cell * 10.0)
        } else {
            WeaponSpec::new("rocket", cell * 4.0)
        };
        let spec = UnitSpec {
            size: Vec2::splat(cell),
            max_speed: Vec2::splat(cell * 4.0),
            weapon: Some(weapon),
        };
        match world.spawn(spec) {
            Ok(unit) => ids.push(unit.id()),
            Err(e) => warn!("Spawn {} failed: {}", n, e),
        }
    }
    for (i, &id) in ids.iter().enumerate() {
        let target = ids[(i + 1) % ids.len()];
        if target != id {
            world.assign_target(id, Some(target));
        }
    }
    info!("Spawned {} units", ids.len());

    #[cfg(feature = "metrics_http")]
    {
        if config.metrics_port != 0 {
            let metrics = world.metrics().clone();
            let port = config.metrics_port;
            tokio::spawn(async move {
                if let Err(e) = arena_tactics::metrics::start_metrics_server(metrics, port).await {
                    error!("Metrics server error: {}", e);
                }
            });
        }
    }

    let mut ticker = interval(Duration::from_secs_f64(1.0 / config.tick_rate as f64));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let report_every = config.tick_rate as u64 * REPORT_INTERVAL_SECS;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!("Tick loop started at {} Hz", config.tick_rate);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let tick = world.tick();
                if tick % report_every == 0 {
                    let s = world.metrics().snapshot();
                    info!(
                        tick,
                        tick_us = s.tick_time_us,
                        paths = s.paths_delivered,
                        stale = s.paths_discarded_stale,
                        shots = s.shots_fired,
                        collisions = s.zone_collisions,
                        "Tick stats"
                    );
                }
                if config.demo_ticks > 0 && tick + 1 >= config.demo_ticks {
                    info!("Demo finished after {} ticks", tick + 1);
                    break;
                }
            }
            result = &mut shutdown => {
                if let Err(e) = result {
                    error!("Failed to listen for Ctrl+C: {}", e);
                }
                info!("Shutdown signal received");
                break;
            }
        }
    }

    if !world.workers().wait_idle(Duration::from_secs(2)) {
        warn!("Background work still running at shutdown");
    }
    for unit in world.units() {
        info!(unit = unit.id(), zone = %unit.zone(), shots = unit.shots_fired(), "Final state");
    }
    info!("Arena stopped");

    Ok(())
}

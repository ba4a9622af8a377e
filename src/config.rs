use crate::game::constants::{behavior, fire, grid, sim};

/// Arena configuration
#[derive(Debug, Clone)]
pub struct ArenaConfig {
    /// Grid width in cells
    pub cols: u32,
    /// Grid height in cells
    pub rows: u32,
    /// Square cell edge length in world units
    pub cell_size: f32,
    /// Simulation tick rate in Hz
    pub tick_rate: u32,
    /// Background worker threads (0 runs everything inline)
    pub workers: usize,
    /// Random probes before a spawn reservation gives up
    pub reserve_probes: u32,
    /// Cap on simulated projectile flight, seconds
    pub fire_time_cap: f32,
    /// Ticks between replans while a unit waits for a route
    pub replan_ticks: u32,
    /// RNG seed for spawns, patterns and wandering
    pub seed: u64,
    /// Metrics exporter port (0 disables it)
    pub metrics_port: u16,
    /// Stop the demo after this many ticks (0 runs until Ctrl-C)
    pub demo_ticks: u64,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            cols: grid::DEFAULT_COLS,
            rows: grid::DEFAULT_ROWS,
            cell_size: grid::DEFAULT_CELL_SIZE,
            tick_rate: sim::TICK_RATE,
            workers: 2,
            reserve_probes: grid::RESERVE_PROBES,
            fire_time_cap: fire::MAX_SIMULATED_TIME,
            replan_ticks: behavior::REPLAN_TICKS,
            seed: 7,
            metrics_port: 0,
            demo_ticks: 0,
        }
    }
}

/// Parse an environment variable into `target`, warning and keeping the
/// default when the value is malformed or rejected by `accept`.
fn env_override<T, F>(name: &str, target: &mut T, accept: F)
where
    T: std::str::FromStr,
    F: Fn(&T) -> bool,
{
    if let Ok(raw) = std::env::var(name) {
        match raw.trim().parse::<T>() {
            Ok(parsed) if accept(&parsed) => *target = parsed,
            Ok(_) => tracing::warn!("{} '{}' out of range, using default", name, raw),
            Err(_) => tracing::warn!("Invalid {} '{}', using default", name, raw),
        }
    }
}

impl ArenaConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        env_override("ARENA_COLS", &mut config.cols, |v| (1..=1024).contains(v));
        env_override("ARENA_ROWS", &mut config.rows, |v| (1..=1024).contains(v));
        env_override("ARENA_CELL_SIZE", &mut config.cell_size, |v| *v > 0.0 && v.is_finite());
        env_override("ARENA_TICK_RATE", &mut config.tick_rate, |v| (1..=240).contains(v));
        env_override("ARENA_WORKERS", &mut config.workers, |v| *v <= 64);
        env_override("ARENA_RESERVE_PROBES", &mut config.reserve_probes, |v| *v > 0);
        env_override("ARENA_FIRE_TIME_CAP", &mut config.fire_time_cap, |v| *v > 0.0 && *v <= 60.0);
        env_override("ARENA_REPLAN_TICKS", &mut config.replan_ticks, |v| *v > 0);
        env_override("ARENA_SEED", &mut config.seed, |_| true);
        env_override("METRICS_PORT", &mut config.metrics_port, |_| true);
        env_override("ARENA_DEMO_TICKS", &mut config.demo_ticks, |_| true);

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if self.cols == 0 || self.rows == 0 {
            return Err("Grid must have at least one row and one column".to_string());
        }
        if !(self.cell_size > 0.0) || !self.cell_size.is_finite() {
            return Err("cell_size must be a positive number".to_string());
        }
        if self.tick_rate == 0 {
            return Err("tick_rate must be at least 1".to_string());
        }
        if self.reserve_probes == 0 {
            return Err("reserve_probes must be at least 1".to_string());
        }
        if !(self.fire_time_cap > 0.0) {
            return Err("fire_time_cap must be positive".to_string());
        }
        if self.replan_ticks == 0 {
            return Err("replan_ticks must be at least 1".to_string());
        }
        Ok(())
    }

    /// Simulation step in seconds
    pub fn dt(&self) -> f32 {
        1.0 / self.tick_rate as f32
    }

    /// Projectile sampling step: a quarter of the simulation step
    pub fn sub_tick_dt(&self) -> f32 {
        self.dt() / sim::SUB_TICKS_PER_TICK as f32
    }
}

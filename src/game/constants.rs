/// Simulation timing
pub mod sim {
    /// Simulation tick rate in Hz
    pub const TICK_RATE: u32 = 30;
    /// Sub-steps per tick used when sampling projectile flight
    pub const SUB_TICKS_PER_TICK: u32 = 4;
}

/// Zone grid constants
pub mod grid {
    /// Default grid width in cells
    pub const DEFAULT_COLS: u32 = 32;
    /// Default grid height in cells
    pub const DEFAULT_ROWS: u32 = 24;
    /// Default cell edge length in world units
    pub const DEFAULT_CELL_SIZE: f32 = 16.0;
    /// Random probes before a spawn reservation gives up
    pub const RESERVE_PROBES: u32 = 64;
    /// Component value of the "no zone" sentinel
    pub const NO_ZONE_INDEX: i32 = -100;
    /// Longest chain of occupants a single placement may relocate
    pub const MAX_RELOCATION_DEPTH: usize = 8;
}

/// Tracker subscriber bookkeeping
pub mod tracker {
    /// Slot count below which tombstones are never compacted
    pub const COMPACT_MIN_SLOTS: usize = 8;
}

/// Fire solution sampling
pub mod fire {
    /// Hard cap on simulated projectile flight (seconds)
    pub const MAX_SIMULATED_TIME: f32 = 5.0;
    /// Weapon/target speed drift tolerated before a solution goes stale
    pub const SPEED_TOLERANCE: f32 = 0.01;
    /// Firing range in zones used while no fresh solution exists
    pub const DEFAULT_FIRE_RANGE: i32 = 8;
}

/// Behavior tuning
pub mod behavior {
    /// Distance (world units) under which a unit counts as sitting on an anchor
    pub const ALIGN_EPSILON: f32 = 0.01;
    /// Ticks between replans while waiting for a usable route
    pub const REPLAN_TICKS: u32 = 15;
    /// Chance per tick that the idle wanderer picks a new heading
    pub const WANDER_TURN_CHANCE: f64 = 0.05;
    /// Chance per tick that the idle wanderer stops instead of turning
    pub const WANDER_STOP_CHANCE: f64 = 0.2;
}

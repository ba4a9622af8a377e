//! Arena Tactics combat core
//!
//! Grid-based combat AI for arena games: zone occupancy, per-entity zone
//! tracking, asynchronous A* path planning, ballistic lead tables and a
//! per-unit behavior state machine.
//!
//! # Features
//!
//! - `metrics_http` - tiny HTTP exporter for the core counters (enabled by default)

pub mod config;
pub mod game;
pub mod metrics;
pub mod util;

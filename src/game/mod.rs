pub mod behavior;
pub mod commands;
pub mod constants;
pub mod sim;
pub mod systems;
pub mod tracker;
pub mod unit;
pub mod walk_map;
pub mod workers;
pub mod world;
pub mod zone;
pub mod zone_grid;

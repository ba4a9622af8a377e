pub mod fire_solution;
pub mod path_planner;
pub mod path_search;

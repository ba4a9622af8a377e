pub mod ids;
pub mod vec2;

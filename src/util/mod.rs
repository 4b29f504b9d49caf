pub mod moving_average;
pub mod rect;
pub mod vec2;

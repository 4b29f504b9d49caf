pub mod aoi;
pub mod delta;
pub mod input;
pub mod liaison;
pub mod protocol;
pub mod transport;

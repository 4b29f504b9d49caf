//! Scene Sync Server Library
//!
//! An authoritative multiplayer scene simulation. A fixed-tick driver owns
//! every actor and effect; each connected client gets a windowed delta of
//! what it can see, merged since the last state it acknowledged.
//!
//! # Features
//!
//! - `profiling` - Per-participant tick cost sampling (enabled by default)

pub mod config;
pub mod metrics;
pub mod net;
pub mod scene;
pub mod util;

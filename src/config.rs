use std::str::FromStr;
use std::time::Duration;

use crate::net::aoi::{AreaOfInterest, DEFAULT_INTEREST_HEIGHT, DEFAULT_INTEREST_WIDTH};
use crate::net::liaison::DEFAULT_PING_WINDOW;
use crate::scene::spatial::DEFAULT_CELL_SIZE;

/// Scene server configuration
#[derive(Debug, Clone)]
pub struct SceneConfig {
    /// Milliseconds between ticks
    pub tick_interval_ms: u64,
    /// How long a scene keeps ticking after its last client leaves
    pub idle_grace_ms: u64,
    /// Client interest rectangle size (world units)
    pub interest_width: f32,
    pub interest_height: f32,
    /// Ping samples averaged per client
    pub ping_window: usize,
    /// Collect per-tick profiling data (needs the `profiling` feature)
    pub profiling: bool,
    /// Spatial grid cell size (world units)
    pub grid_cell_size: f32,
    /// Pending commands the scene accepts between ticks
    pub command_capacity: usize,
    /// Port for the metrics endpoint
    pub metrics_port: u16,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 50,
            idle_grace_ms: 30_000,
            interest_width: DEFAULT_INTEREST_WIDTH,
            interest_height: DEFAULT_INTEREST_HEIGHT,
            ping_window: DEFAULT_PING_WINDOW,
            profiling: false,
            grid_cell_size: DEFAULT_CELL_SIZE,
            command_capacity: 1000,
            metrics_port: 9090,
        }
    }
}

/// Parse `key` into `target` if present and accepted by `valid`; otherwise
/// warn and keep the default
fn apply<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    requirement: &str,
    valid: impl Fn(&T) -> bool,
    target: &mut T,
) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(parsed) if valid(&parsed) => *target = parsed,
        Ok(_) => tracing::warn!("{} must be {}, using default", key, requirement),
        Err(_) => tracing::warn!("Invalid {} '{}', using default", key, raw),
    }
}

impl SceneConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load config from any key-value source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        apply(&lookup, "SCENE_TICK_MS", "1-1000", |v: &u64| (1..=1000).contains(v), &mut config.tick_interval_ms);
        apply(&lookup, "SCENE_IDLE_GRACE_MS", "> 0", |v: &u64| *v > 0, &mut config.idle_grace_ms);
        apply(&lookup, "SCENE_INTEREST_WIDTH", "> 0", |v: &f32| *v > 0.0, &mut config.interest_width);
        apply(&lookup, "SCENE_INTEREST_HEIGHT", "> 0", |v: &f32| *v > 0.0, &mut config.interest_height);
        apply(&lookup, "SCENE_PING_WINDOW", "1-1024", |v: &usize| (1..=1024).contains(v), &mut config.ping_window);
        apply(&lookup, "SCENE_PROFILING", "true or false", |_: &bool| true, &mut config.profiling);
        apply(&lookup, "SCENE_GRID_CELL", "> 0", |v: &f32| *v > 0.0, &mut config.grid_cell_size);
        apply(&lookup, "METRICS_PORT", "> 0", |v: &u16| *v > 0, &mut config.metrics_port);

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if self.tick_interval_ms == 0 {
            return Err("tick_interval_ms must be at least 1".to_string());
        }
        if self.idle_grace_ms == 0 {
            return Err("idle_grace_ms must be at least 1".to_string());
        }
        if !(self.interest_width > 0.0 && self.interest_height > 0.0) {
            return Err("interest size must be positive".to_string());
        }
        if self.ping_window == 0 {
            return Err("ping_window must be at least 1".to_string());
        }
        if !(self.grid_cell_size > 0.0) {
            return Err("grid_cell_size must be positive".to_string());
        }
        if self.command_capacity == 0 {
            return Err("command_capacity must be at least 1".to_string());
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn idle_grace(&self) -> Duration {
        Duration::from_millis(self.idle_grace_ms)
    }

    /// Local interest rectangle for new clients
    pub fn interest(&self) -> AreaOfInterest {
        AreaOfInterest::centered(self.interest_width, self.interest_height)
    }

    /// Profiling is on only when requested and compiled in
    pub fn profiling_enabled(&self) -> bool {
        self.profiling && cfg!(feature = "profiling")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> SceneConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SceneConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = SceneConfig::default();
        assert_eq!(config.tick_interval_ms, 50);
        assert_eq!(config.metrics_port, 9090);
        assert!(!config.profiling);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("SCENE_TICK_MS", "20"),
            ("SCENE_INTEREST_WIDTH", "800"),
            ("SCENE_PROFILING", "true"),
            ("METRICS_PORT", "9100"),
        ]);
        assert_eq!(config.tick_interval(), Duration::from_millis(20));
        assert_eq!(config.interest().local().width(), 800.0);
        assert!(config.profiling);
        assert_eq!(config.metrics_port, 9100);
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = from_pairs(&[
            ("SCENE_TICK_MS", "0"),
            ("SCENE_PING_WINDOW", "lots"),
            ("SCENE_GRID_CELL", "-4"),
        ]);
        let defaults = SceneConfig::default();
        assert_eq!(config.tick_interval_ms, defaults.tick_interval_ms);
        assert_eq!(config.ping_window, defaults.ping_window);
        assert_eq!(config.grid_cell_size, defaults.grid_cell_size);
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        let mut config = SceneConfig::default();
        config.interest_height = 0.0;
        assert!(config.validate().is_err());

        let mut config = SceneConfig::default();
        config.idle_grace_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_or_default() {
        let config = SceneConfig::load_or_default();
        assert!(config.tick_interval_ms > 0);
    }
}

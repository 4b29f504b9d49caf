//! Tick profiling
//!
//! Owned by the scene and explicitly enabled, disabled and reset. Tracks:
//! - Whole-tick durations against the tick budget
//! - Per-unit costs (actor pass, each participant, reconciliation)

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Samples kept per rolling window (~2 seconds at 60Hz)
const MAX_SAMPLES: usize = 120;

/// Samples needed before the status is re-evaluated
const MIN_STATUS_SAMPLES: usize = 10;

/// Performance status levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerformanceStatus {
    /// Well under budget
    Excellent,
    /// Normal operation
    Good,
    /// Approaching the tick budget
    Warning,
    /// At or over the tick budget; ticks are being skipped
    Critical,
}

impl PerformanceStatus {
    pub fn is_degraded(&self) -> bool {
        matches!(self, PerformanceStatus::Warning | PerformanceStatus::Critical)
    }
}

/// Cost summary of one profiled unit
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileEntry {
    pub name: String,
    pub samples: usize,
    pub average: Duration,
    pub max: Duration,
}

/// Rolling window of durations
#[derive(Debug, Default)]
struct Samples {
    durations: VecDeque<Duration>,
}

impl Samples {
    fn push(&mut self, duration: Duration) {
        self.durations.push_back(duration);
        while self.durations.len() > MAX_SAMPLES {
            self.durations.pop_front();
        }
    }

    fn average(&self) -> Duration {
        if self.durations.is_empty() {
            return Duration::ZERO;
        }
        let sum: Duration = self.durations.iter().sum();
        sum / self.durations.len() as u32
    }

    fn max(&self) -> Duration {
        self.durations.iter().copied().max().unwrap_or(Duration::ZERO)
    }

    fn p95(&self) -> Duration {
        if self.durations.is_empty() {
            return Duration::ZERO;
        }
        let mut sorted: Vec<_> = self.durations.iter().copied().collect();
        sorted.sort();
        let idx = (sorted.len() as f32 * 0.95) as usize;
        sorted.get(idx.min(sorted.len() - 1)).copied().unwrap_or(Duration::ZERO)
    }
}

pub struct TickProfiler {
    enabled: bool,
    ticks: Samples,
    units: HashMap<String, Samples>,
    /// Target tick duration (budget)
    target_tick_duration: Duration,
    /// Threshold for excellent performance (fraction of budget)
    excellent_threshold: f32,
    /// Threshold for warning (fraction of budget)
    warning_threshold: f32,
    /// Threshold for critical (fraction of budget)
    critical_threshold: f32,
    status: PerformanceStatus,
    tick_start: Option<Instant>,
    last_actor_count: usize,
}

impl TickProfiler {
    pub fn new(tick_interval: Duration, enabled: bool) -> Self {
        Self {
            enabled,
            ticks: Samples::default(),
            units: HashMap::new(),
            target_tick_duration: tick_interval,
            excellent_threshold: 0.3, // < 30% of budget = excellent
            warning_threshold: 0.7,   // > 70% of budget = warning
            critical_threshold: 0.9,  // > 90% of budget = critical
            status: PerformanceStatus::Excellent,
            tick_start: None,
            last_actor_count: 0,
        }
    }

    /// Turning profiling off discards everything collected so far
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled && !enabled {
            self.reset();
        }
        self.enabled = enabled;
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn reset(&mut self) {
        self.ticks = Samples::default();
        self.units.clear();
        self.status = PerformanceStatus::Excellent;
        self.tick_start = None;
        self.last_actor_count = 0;
    }

    /// Start timing a tick
    pub fn tick_start(&mut self) {
        if self.enabled {
            self.tick_start = Some(Instant::now());
        }
    }

    /// End timing a tick and record the duration
    pub fn tick_end(&mut self, actor_count: usize) {
        if let Some(start) = self.tick_start.take() {
            self.record_tick(start.elapsed());
            self.last_actor_count = actor_count;
        }
    }

    fn record_tick(&mut self, duration: Duration) {
        self.ticks.push(duration);
        self.update_status();
    }

    /// Record the cost of one unit of work this tick
    pub fn record(&mut self, name: &str, duration: Duration) {
        if !self.enabled {
            return;
        }
        match self.units.get_mut(name) {
            Some(samples) => samples.push(duration),
            None => {
                let mut samples = Samples::default();
                samples.push(duration);
                self.units.insert(name.to_string(), samples);
            }
        }
    }

    fn update_status(&mut self) {
        if self.ticks.durations.len() < MIN_STATUS_SAMPLES {
            return;
        }
        let ratio = self.budget_usage_percent() / 100.0;

        self.status = if ratio < self.excellent_threshold {
            PerformanceStatus::Excellent
        } else if ratio < self.warning_threshold {
            PerformanceStatus::Good
        } else if ratio < self.critical_threshold {
            PerformanceStatus::Warning
        } else {
            PerformanceStatus::Critical
        };
    }

    pub fn status(&self) -> PerformanceStatus {
        self.status
    }

    pub fn average_tick_duration(&self) -> Duration {
        self.ticks.average()
    }

    /// 95th percentile tick duration
    pub fn p95_tick_duration(&self) -> Duration {
        self.ticks.p95()
    }

    /// Budget usage as percentage (0-100+)
    pub fn budget_usage_percent(&self) -> f32 {
        let avg = self.average_tick_duration();
        (avg.as_secs_f32() / self.target_tick_duration.as_secs_f32()) * 100.0
    }

    /// Per-unit costs, most expensive first
    pub fn report(&self) -> Vec<ProfileEntry> {
        let mut entries: Vec<ProfileEntry> = self
            .units
            .iter()
            .map(|(name, samples)| ProfileEntry {
                name: name.clone(),
                samples: samples.durations.len(),
                average: samples.average(),
                max: samples.max(),
            })
            .collect();
        entries.sort_by(|a, b| b.average.cmp(&a.average).then_with(|| a.name.cmp(&b.name)));
        entries
    }

    /// Human-readable status line
    pub fn status_message(&self) -> String {
        format!(
            "{:?} - {:.1}% budget, p95 {:.2}ms, {} actors",
            self.status,
            self.budget_usage_percent(),
            self.p95_tick_duration().as_secs_f64() * 1000.0,
            self.last_actor_count
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profiler() -> TickProfiler {
        // 50ms budget
        TickProfiler::new(Duration::from_millis(50), true)
    }

    #[test]
    fn test_new_profiler_is_excellent() {
        assert_eq!(profiler().status(), PerformanceStatus::Excellent);
    }

    #[test]
    fn test_status_follows_budget_usage() {
        let mut p = profiler();
        for _ in 0..20 {
            p.record_tick(Duration::from_millis(25));
        }
        assert_eq!(p.status(), PerformanceStatus::Good);

        for _ in 0..MAX_SAMPLES {
            p.record_tick(Duration::from_millis(40));
        }
        assert_eq!(p.status(), PerformanceStatus::Warning);
        assert!(p.status().is_degraded());

        for _ in 0..MAX_SAMPLES {
            p.record_tick(Duration::from_millis(60));
        }
        assert_eq!(p.status(), PerformanceStatus::Critical);
    }

    #[test]
    fn test_status_needs_enough_samples() {
        let mut p = profiler();
        for _ in 0..(MIN_STATUS_SAMPLES - 1) {
            p.record_tick(Duration::from_millis(60));
        }
        assert_eq!(p.status(), PerformanceStatus::Excellent);
    }

    #[test]
    fn test_report_sorted_by_average_cost() {
        let mut p = profiler();
        p.record("actors", Duration::from_millis(2));
        p.record("actors", Duration::from_millis(4));
        p.record("reconcile", Duration::from_millis(5));

        let report = p.report();
        assert_eq!(report[0].name, "reconcile");
        assert_eq!(report[1].name, "actors");
        assert_eq!(report[1].samples, 2);
        assert_eq!(report[1].average, Duration::from_millis(3));
        assert_eq!(report[1].max, Duration::from_millis(4));
    }

    #[test]
    fn test_disabled_profiler_records_nothing() {
        let mut p = TickProfiler::new(Duration::from_millis(50), false);
        p.record("actors", Duration::from_millis(2));
        p.tick_start();
        p.tick_end(3);

        assert!(p.report().is_empty());
        assert_eq!(p.average_tick_duration(), Duration::ZERO);
    }

    #[test]
    fn test_disable_resets() {
        let mut p = profiler();
        p.record("actors", Duration::from_millis(2));
        p.set_enabled(false);
        p.set_enabled(true);
        assert!(p.report().is_empty());
    }

    #[test]
    fn test_tick_timing() {
        let mut p = profiler();
        p.tick_start();
        std::thread::sleep(Duration::from_millis(1));
        p.tick_end(10);

        assert!(p.average_tick_duration() >= Duration::from_millis(1));
        assert!(p.status_message().contains("10 actors"));
    }
}

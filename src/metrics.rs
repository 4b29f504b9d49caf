//! Prometheus-compatible metrics endpoint
//!
//! Exposes scene metrics in Prometheus format and as JSON.
//! Default endpoint: http://localhost:9090/metrics

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::net::transport::DeliveryMode;
use crate::scene::profiler::PerformanceStatus;

/// Tick samples kept for percentiles
const TICK_HISTORY: usize = 1000;

/// Metrics shared between the scene thread and the endpoint
#[derive(Debug)]
pub struct SceneMetrics {
    // Occupancy
    pub clients: AtomicU64,
    pub actors: AtomicU64,
    pub effects_fired_total: AtomicU64,

    // Tick timing (microseconds)
    pub tick_time_us: AtomicU64,
    pub tick_time_p95_us: AtomicU64,
    pub tick_time_max_us: AtomicU64,
    pub tick_count: AtomicU64,

    // Performance status (0=Excellent, 1=Good, 2=Warning, 3=Critical)
    pub performance_status: AtomicU64,
    pub budget_usage_percent: AtomicU64,

    // Outbound deltas
    pub deltas_reliable_total: AtomicU64,
    pub deltas_unreliable_total: AtomicU64,
    pub bytes_encoded_total: AtomicU64,

    // Inbound
    pub inputs_received_total: AtomicU64,

    /// Units (actors, participants, clients) skipped after an error or panic
    pub failures_total: AtomicU64,

    /// 1 while the scene is parked with no clients
    pub idle: AtomicU64,

    start_time: Instant,

    // Rolling tick times for percentile calculation
    tick_history: RwLock<VecDeque<u64>>,
}

impl SceneMetrics {
    pub fn new() -> Self {
        Self {
            clients: AtomicU64::new(0),
            actors: AtomicU64::new(0),
            effects_fired_total: AtomicU64::new(0),
            tick_time_us: AtomicU64::new(0),
            tick_time_p95_us: AtomicU64::new(0),
            tick_time_max_us: AtomicU64::new(0),
            tick_count: AtomicU64::new(0),
            performance_status: AtomicU64::new(0),
            budget_usage_percent: AtomicU64::new(0),
            deltas_reliable_total: AtomicU64::new(0),
            deltas_unreliable_total: AtomicU64::new(0),
            bytes_encoded_total: AtomicU64::new(0),
            inputs_received_total: AtomicU64::new(0),
            failures_total: AtomicU64::new(0),
            idle: AtomicU64::new(0),
            start_time: Instant::now(),
            tick_history: RwLock::new(VecDeque::with_capacity(TICK_HISTORY)),
        }
    }

    /// Record a tick time and update percentiles
    pub fn record_tick_time(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.tick_time_us.store(us, Ordering::Relaxed);
        self.tick_count.fetch_add(1, Ordering::Relaxed);

        let mut history = self.tick_history.write();
        history.push_back(us);
        while history.len() > TICK_HISTORY {
            history.pop_front();
        }

        if history.len() >= 10 {
            let mut sorted: Vec<u64> = history.iter().copied().collect();
            sorted.sort_unstable();

            let p95_idx = (sorted.len() as f32 * 0.95) as usize;
            self.tick_time_p95_us
                .store(sorted[p95_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_max_us
                .store(sorted.last().copied().unwrap_or(0), Ordering::Relaxed);
        }
    }

    pub fn record_delta_sent(&self, mode: DeliveryMode, bytes: usize) {
        let counter = match mode {
            DeliveryMode::ReliableOrdered => &self.deltas_reliable_total,
            DeliveryMode::Unreliable => &self.deltas_unreliable_total,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.bytes_encoded_total
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_failures(&self, count: usize) {
        if count > 0 {
            self.failures_total
                .fetch_add(count as u64, Ordering::Relaxed);
        }
    }

    pub fn record_status(&self, status: PerformanceStatus, budget_usage_percent: f32) {
        let code = match status {
            PerformanceStatus::Excellent => 0,
            PerformanceStatus::Good => 1,
            PerformanceStatus::Warning => 2,
            PerformanceStatus::Critical => 3,
        };
        self.performance_status.store(code, Ordering::Relaxed);
        self.budget_usage_percent
            .store(budget_usage_percent.max(0.0) as u64, Ordering::Relaxed);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    fn status_name(&self) -> &'static str {
        match self.performance_status.load(Ordering::Relaxed) {
            0 => "excellent",
            1 => "good",
            2 => "warning",
            _ => "critical",
        }
    }

    /// Generate Prometheus-format metrics output
    pub fn to_prometheus(&self) -> String {
        let mut output = String::with_capacity(2048);

        macro_rules! metric {
            ($name:expr, $help:expr, $type:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $name, $help, $name, $type, $name, $value
                ));
            };
        }

        metric!("scene_clients", "Connected clients", "gauge",
            self.clients.load(Ordering::Relaxed));
        metric!("scene_actors", "Live actors", "gauge",
            self.actors.load(Ordering::Relaxed));
        metric!("scene_effects_fired_total", "Effects fired", "counter",
            self.effects_fired_total.load(Ordering::Relaxed));

        metric!("scene_tick_time_microseconds", "Last tick time in microseconds", "gauge",
            self.tick_time_us.load(Ordering::Relaxed));
        metric!("scene_tick_time_p95_microseconds", "95th percentile tick time", "gauge",
            self.tick_time_p95_us.load(Ordering::Relaxed));
        metric!("scene_tick_time_max_microseconds", "Maximum tick time", "gauge",
            self.tick_time_max_us.load(Ordering::Relaxed));
        metric!("scene_tick_count", "Total ticks processed", "counter",
            self.tick_count.load(Ordering::Relaxed));

        metric!("scene_performance_status", "Performance status (0=Excellent, 3=Critical)", "gauge",
            self.performance_status.load(Ordering::Relaxed));
        metric!("scene_budget_usage_percent", "Tick budget usage percentage", "gauge",
            self.budget_usage_percent.load(Ordering::Relaxed));
        output.push_str(&format!(
            "# HELP scene_performance_state Human-readable performance state\n# TYPE scene_performance_state gauge\nscene_performance_state{{state=\"{}\"}} 1\n",
            self.status_name()
        ));

        metric!("scene_deltas_reliable_total", "Deltas posted for ordered delivery", "counter",
            self.deltas_reliable_total.load(Ordering::Relaxed));
        metric!("scene_deltas_unreliable_total", "Deltas posted as datagrams", "counter",
            self.deltas_unreliable_total.load(Ordering::Relaxed));
        metric!("scene_bytes_encoded_total", "Encoded delta bytes", "counter",
            self.bytes_encoded_total.load(Ordering::Relaxed));
        metric!("scene_inputs_received_total", "Input messages received", "counter",
            self.inputs_received_total.load(Ordering::Relaxed));
        metric!("scene_failures_total", "Units skipped after an error or panic", "counter",
            self.failures_total.load(Ordering::Relaxed));
        metric!("scene_idle", "Scene parked with no clients (0/1)", "gauge",
            self.idle.load(Ordering::Relaxed));
        metric!("scene_uptime_seconds", "Server uptime in seconds", "counter",
            self.uptime_seconds());

        output
    }

    /// JSON rendering for direct API access
    pub fn to_json(&self) -> String {
        let value = json!({
            "scene": {
                "clients": self.clients.load(Ordering::Relaxed),
                "actors": self.actors.load(Ordering::Relaxed),
                "effects_fired": self.effects_fired_total.load(Ordering::Relaxed),
                "idle": self.idle.load(Ordering::Relaxed) == 1,
            },
            "performance": {
                "tick_time_us": self.tick_time_us.load(Ordering::Relaxed),
                "tick_time_p95_us": self.tick_time_p95_us.load(Ordering::Relaxed),
                "tick_time_max_us": self.tick_time_max_us.load(Ordering::Relaxed),
                "tick_count": self.tick_count.load(Ordering::Relaxed),
                "status": self.performance_status.load(Ordering::Relaxed),
                "status_name": self.status_name(),
                "budget_percent": self.budget_usage_percent.load(Ordering::Relaxed),
                "failures": self.failures_total.load(Ordering::Relaxed),
            },
            "network": {
                "deltas_reliable": self.deltas_reliable_total.load(Ordering::Relaxed),
                "deltas_unreliable": self.deltas_unreliable_total.load(Ordering::Relaxed),
                "bytes_encoded": self.bytes_encoded_total.load(Ordering::Relaxed),
                "inputs_received": self.inputs_received_total.load(Ordering::Relaxed),
            },
            "uptime_seconds": self.uptime_seconds(),
        });
        serde_json::to_string_pretty(&value).unwrap_or_else(|_| "{}".to_string())
    }
}

impl Default for SceneMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn http_response(status: &str, content_type: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        content_type,
        body.len(),
        body
    )
}

/// Build the response for one raw HTTP request
fn respond(metrics: &SceneMetrics, request: &str) -> String {
    if request.starts_with("GET /metrics/json") || request.starts_with("GET /json") {
        http_response("200 OK", "application/json", &metrics.to_json())
    } else if request.starts_with("GET /metrics") {
        http_response("200 OK", "text/plain; version=0.0.4", &metrics.to_prometheus())
    } else if request.starts_with("GET /health") || request.starts_with("GET / ") {
        http_response("200 OK", "text/plain", "OK")
    } else {
        "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
    }
}

/// Start the metrics HTTP server
pub async fn start_metrics_server(metrics: Arc<SceneMetrics>, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        let (mut socket, peer) = listener.accept().await?;
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 1024];

            match socket.read(&mut buffer).await {
                Ok(n) if n > 0 => {
                    let request = String::from_utf8_lossy(&buffer[..n]);
                    let response = respond(&metrics, &request);
                    if let Err(e) = socket.write_all(response.as_bytes()).await {
                        debug!("Failed to write metrics response to {}: {}", peer, e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Failed to read from metrics socket {}: {}", peer, e);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = SceneMetrics::new();
        assert_eq!(metrics.clients.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.tick_count.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_record_tick_time() {
        let metrics = SceneMetrics::new();
        for i in 0..100 {
            metrics.record_tick_time(Duration::from_micros(100 + i * 10));
        }

        assert_eq!(metrics.tick_count.load(Ordering::Relaxed), 100);
        assert!(metrics.tick_time_p95_us.load(Ordering::Relaxed) > 0);
        assert_eq!(metrics.tick_time_max_us.load(Ordering::Relaxed), 1090);
    }

    #[test]
    fn test_record_delta_sent() {
        let metrics = SceneMetrics::new();
        metrics.record_delta_sent(DeliveryMode::Unreliable, 100);
        metrics.record_delta_sent(DeliveryMode::ReliableOrdered, 50);
        metrics.record_delta_sent(DeliveryMode::Unreliable, 10);

        assert_eq!(metrics.deltas_unreliable_total.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.deltas_reliable_total.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.bytes_encoded_total.load(Ordering::Relaxed), 160);
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = SceneMetrics::new();
        metrics.clients.store(3, Ordering::Relaxed);
        metrics.record_status(PerformanceStatus::Warning, 75.0);

        let output = metrics.to_prometheus();
        assert!(output.contains("scene_clients 3"));
        assert!(output.contains("scene_performance_status 2"));
        assert!(output.contains("state=\"warning\""));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }

    #[test]
    fn test_json_format() {
        let metrics = SceneMetrics::new();
        metrics.actors.store(12, Ordering::Relaxed);

        let value: serde_json::Value = serde_json::from_str(&metrics.to_json()).unwrap();
        assert_eq!(value["scene"]["actors"], 12);
        assert_eq!(value["performance"]["status_name"], "excellent");
    }

    #[test]
    fn test_routes() {
        let metrics = SceneMetrics::new();
        assert!(respond(&metrics, "GET /metrics HTTP/1.1").contains("scene_tick_count"));
        assert!(respond(&metrics, "GET /metrics/json HTTP/1.1").contains("application/json"));
        assert!(respond(&metrics, "GET /health HTTP/1.1").ends_with("OK"));
        assert!(respond(&metrics, "GET /nope HTTP/1.1").starts_with("HTTP/1.1 404"));
    }
}

//! Prometheus-compatible metrics for the combat core
//!
//! Counters are plain atomics bumped from the tick loop and from background
//! workers. The binary can expose them at http://localhost:<port>/metrics.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

const TICK_HISTORY_LEN: usize = 1000;

/// Metrics registry for one arena
#[derive(Debug)]
pub struct Metrics {
    // Tick timing (microseconds)
    pub tick_count: AtomicU64,
    pub tick_time_us: AtomicU64,
    pub tick_time_p95_us: AtomicU64,
    pub tick_time_max_us: AtomicU64,

    // Units
    pub units_alive: AtomicU64,

    // Path planning
    pub paths_scheduled: AtomicU64,
    pub paths_delivered: AtomicU64,
    pub paths_discarded_stale: AtomicU64,
    pub paths_unreachable: AtomicU64,

    // Fire solutions
    pub fire_solutions_computed: AtomicU64,
    pub fire_solutions_failed: AtomicU64,
    pub shots_fired: AtomicU64,

    // Grid
    pub zone_collisions: AtomicU64,

    start_time: Instant,

    tick_history: RwLock<VecDeque<u64>>,
}

/// Point-in-time copy of every counter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub tick_count: u64,
    pub tick_time_us: u64,
    pub units_alive: u64,
    pub paths_scheduled: u64,
    pub paths_delivered: u64,
    pub paths_discarded_stale: u64,
    pub paths_unreachable: u64,
    pub fire_solutions_computed: u64,
    pub fire_solutions_failed: u64,
    pub shots_fired: u64,
    pub zone_collisions: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            tick_count: AtomicU64::new(0),
            tick_time_us: AtomicU64::new(0),
            tick_time_p95_us: AtomicU64::new(0),
            tick_time_max_us: AtomicU64::new(0),
            units_alive: AtomicU64::new(0),
            paths_scheduled: AtomicU64::new(0),
            paths_delivered: AtomicU64::new(0),
            paths_discarded_stale: AtomicU64::new(0),
            paths_unreachable: AtomicU64::new(0),
            fire_solutions_computed: AtomicU64::new(0),
            fire_solutions_failed: AtomicU64::new(0),
            shots_fired: AtomicU64::new(0),
            zone_collisions: AtomicU64::new(0),
            start_time: Instant::now(),
            tick_history: RwLock::new(VecDeque::with_capacity(TICK_HISTORY_LEN)),
        }
    }

    /// Record a tick time and update the rolling percentiles
    pub fn record_tick_time(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.tick_time_us.store(us, Ordering::Relaxed);
        self.tick_count.fetch_add(1, Ordering::Relaxed);

        let mut history = self.tick_history.write();
        history.push_back(us);
        while history.len() > TICK_HISTORY_LEN {
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

    #[inline]
    pub fn record_path_scheduled(&self) {
        self.paths_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_path_delivered(&self) {
        self.paths_delivered.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_path_stale(&self) {
        self.paths_discarded_stale.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_path_unreachable(&self) {
        self.paths_unreachable.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_fire_solution(&self, ok: bool) {
        if ok {
            self.fire_solutions_computed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.fire_solutions_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_shot(&self) {
        self.shots_fired.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_zone_collision(&self) {
        self.zone_collisions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_units_alive(&self, count: usize) {
        self.units_alive.store(count as u64, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tick_count: self.tick_count.load(Ordering::Relaxed),
            tick_time_us: self.tick_time_us.load(Ordering::Relaxed),
            units_alive: self.units_alive.load(Ordering::Relaxed),
            paths_scheduled: self.paths_scheduled.load(Ordering::Relaxed),
            paths_delivered: self.paths_delivered.load(Ordering::Relaxed),
            paths_discarded_stale: self.paths_discarded_stale.load(Ordering::Relaxed),
            paths_unreachable: self.paths_unreachable.load(Ordering::Relaxed),
            fire_solutions_computed: self.fire_solutions_computed.load(Ordering::Relaxed),
            fire_solutions_failed: self.fire_solutions_failed.load(Ordering::Relaxed),
            shots_fired: self.shots_fired.load(Ordering::Relaxed),
            zone_collisions: self.zone_collisions.load(Ordering::Relaxed),
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

        metric!("arena_tactics_tick_count", "Total ticks processed", "counter",
            self.tick_count.load(Ordering::Relaxed));
        metric!("arena_tactics_tick_time_microseconds", "Last tick time in microseconds", "gauge",
            self.tick_time_us.load(Ordering::Relaxed));
        metric!("arena_tactics_tick_time_p95_microseconds", "95th percentile tick time", "gauge",
            self.tick_time_p95_us.load(Ordering::Relaxed));
        metric!("arena_tactics_tick_time_max_microseconds", "Maximum tick time", "gauge",
            self.tick_time_max_us.load(Ordering::Relaxed));

        metric!("arena_tactics_units_alive", "Number of live units", "gauge",
            self.units_alive.load(Ordering::Relaxed));

        metric!("arena_tactics_paths_scheduled_total", "Path jobs scheduled", "counter",
            self.paths_scheduled.load(Ordering::Relaxed));
        metric!("arena_tactics_paths_delivered_total", "Paths accepted by their owner", "counter",
            self.paths_delivered.load(Ordering::Relaxed));
        metric!("arena_tactics_paths_stale_total", "Paths discarded as superseded", "counter",
            self.paths_discarded_stale.load(Ordering::Relaxed));
        metric!("arena_tactics_paths_unreachable_total", "Path jobs with no route", "counter",
            self.paths_unreachable.load(Ordering::Relaxed));

        metric!("arena_tactics_fire_solutions_total", "Fire solutions computed", "counter",
            self.fire_solutions_computed.load(Ordering::Relaxed));
        metric!("arena_tactics_fire_solutions_failed_total", "Fire solution recalculations that failed", "counter",
            self.fire_solutions_failed.load(Ordering::Relaxed));
        metric!("arena_tactics_shots_fired_total", "Fire commands issued", "counter",
            self.shots_fired.load(Ordering::Relaxed));

        metric!("arena_tactics_zone_collisions_total", "Tick-time placements rejected by an occupant", "counter",
            self.zone_collisions.load(Ordering::Relaxed));
        metric!("arena_tactics_uptime_seconds", "Uptime in seconds", "counter",
            self.uptime_seconds());

        output
    }

    /// Generate JSON format metrics
    pub fn to_json(&self) -> String {
        let s = self.snapshot();
        format!(r#"{{
  "ticks": {{
    "count": {},
    "time_us": {},
    "time_p95_us": {},
    "time_max_us": {}
  }},
  "units_alive": {},
  "paths": {{
    "scheduled": {},
    "delivered": {},
    "stale": {},
    "unreachable": {}
  }},
  "fire": {{
    "solutions": {},
    "failed": {},
    "shots": {}
  }},
  "zone_collisions": {},
  "uptime_seconds": {}
}}"#,
            s.tick_count,
            s.tick_time_us,
            self.tick_time_p95_us.load(Ordering::Relaxed),
            self.tick_time_max_us.load(Ordering::Relaxed),
            s.units_alive,
            s.paths_scheduled,
            s.paths_delivered,
            s.paths_discarded_stale,
            s.paths_unreachable,
            s.fire_solutions_computed,
            s.fire_solutions_failed,
            s.shots_fired,
            s.zone_collisions,
            self.uptime_seconds(),
        )
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Start the metrics HTTP server
#[cfg(feature = "metrics_http")]
pub async fn start_metrics_server(
    metrics: std::sync::Arc<Metrics>,
    port: u16,
) -> anyhow::Result<()> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tracing::{debug, info};

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

                    let response = if request.starts_with("GET /metrics/json") {
                        let body = metrics.to_json();
                        format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            body.len(),
                            body
                        )
                    } else if request.starts_with("GET /metrics") {
                        let body = metrics.to_prometheus();
                        format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            body.len(),
                            body
                        )
                    } else if request.starts_with("GET /health") {
                        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 2\r\nConnection: close\r\n\r\nOK".to_string()
                    } else {
                        "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
                    };

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
        let metrics = Metrics::new();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_record_tick_time() {
        let metrics = Metrics::new();
        for i in 0..100 {
            metrics.record_tick_time(Duration::from_micros(100 + i * 10));
        }

        assert_eq!(metrics.tick_count.load(Ordering::Relaxed), 100);
        assert!(metrics.tick_time_p95_us.load(Ordering::Relaxed) >= 1000);
        assert_eq!(metrics.tick_time_max_us.load(Ordering::Relaxed), 1090);
    }

    #[test]
    fn test_recorders() {
        let metrics = Metrics::new();
        metrics.record_path_scheduled();
        metrics.record_path_scheduled();
        metrics.record_path_delivered();
        metrics.record_path_stale();
        metrics.record_fire_solution(true);
        metrics.record_fire_solution(false);
        metrics.record_zone_collision();

        let s = metrics.snapshot();
        assert_eq!(s.paths_scheduled, 2);
        assert_eq!(s.paths_delivered, 1);
        assert_eq!(s.paths_discarded_stale, 1);
        assert_eq!(s.fire_solutions_computed, 1);
        assert_eq!(s.fire_solutions_failed, 1);
        assert_eq!(s.zone_collisions, 1);
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = Metrics::new();
        metrics.set_units_alive(6);
        metrics.record_path_unreachable();

        let output = metrics.to_prometheus();
        assert!(output.contains("arena_tactics_units_alive 6"));
        assert!(output.contains("arena_tactics_paths_unreachable_total 1"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }

    #[test]
    fn test_json_format() {
        let metrics = Metrics::new();
        metrics.record_shot();

        let output = metrics.to_json();
        assert!(output.contains("\"shots\": 1"));
        assert!(output.contains("\"paths\":"));
    }
}

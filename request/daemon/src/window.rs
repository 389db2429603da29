//! Time-windowed aggregation
//!
//! Groups drained events into fixed wall-clock windows and produces one
//! `WindowMetrics` report per non-empty window. Windows are aligned to
//! multiples of their duration since the Unix epoch.
//!
//! Totals, min/max and the histogram are exact. Percentiles come from a
//! bounded reservoir (Algorithm R), so every request in the window has the
//! same chance of being retained.

use chrono::{DateTime, Utc};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::types::*;

/// Accumulates the current window
#[derive(Debug)]
pub struct WindowAggregator {
    window_ns: i64,
    window_start: i64,
    agent_id: String,
    max_samples: usize,
    /// Uniform sample of the window's latencies (nanoseconds)
    latencies: Vec<u64>,
    rng: StdRng,
    total: u64,
    sum_ns: u128,
    min_ns: u64,
    max_ns: u64,
    histogram: LatencyHistogram,
    processes: BTreeMap<ContextKey, u64>,
    connections: BTreeMap<u16, u64>,
}

impl WindowAggregator {
    /// Create an aggregator whose first window contains the current time
    pub fn new(window: Duration, agent_id: String, max_samples: usize) -> Self {
        Self::starting_at(window, agent_id, max_samples, Utc::now())
    }

    /// Create an aggregator whose first window contains `now`
    pub fn starting_at(
        window: Duration,
        agent_id: String,
        max_samples: usize,
        now: DateTime<Utc>,
    ) -> Self {
        let window_ns = i64::try_from(window.as_nanos()).unwrap_or(i64::MAX).max(1);
        let now_ns = now.timestamp_nanos_opt().unwrap_or(0);

        Self {
            window_ns,
            window_start: now_ns.div_euclid(window_ns) * window_ns,
            agent_id,
            max_samples,
            latencies: Vec::new(),
            rng: StdRng::seed_from_u64(now_ns as u64),
            total: 0,
            sum_ns: 0,
            min_ns: u64::MAX,
            max_ns: 0,
            histogram: LatencyHistogram::default(),
            processes: BTreeMap::new(),
            connections: BTreeMap::new(),
        }
    }

    /// Add a completed request to the current window
    pub fn add_sample(&mut self, event: &CompletedEvent) {
        let latency_ns = event.latency_ns;

        self.total += 1;
        self.sum_ns += u128::from(latency_ns);
        self.min_ns = self.min_ns.min(latency_ns);
        self.max_ns = self.max_ns.max(latency_ns);
        self.histogram.add_sample(latency_ns / 1_000);
        *self.processes.entry(event.context_key).or_insert(0) += 1;

        if self.latencies.len() < self.max_samples {
            self.latencies.push(latency_ns);
        } else {
            let slot = self.rng.gen_range(0..self.total);
            if let Ok(slot) = usize::try_from(slot) {
                if slot < self.max_samples {
                    self.latencies[slot] = latency_ns;
                }
            }
        }
    }

    /// Add a connection attempt to the current window
    pub fn add_connection(&mut self, sample: ConnectionSample) {
        *self.connections.entry(sample.port).or_insert(0) += 1;
    }

    /// Close the current window and start the next one
    ///
    /// Returns None when nothing was recorded in the closed window.
    pub fn rotate(&mut self) -> Option<WindowMetrics> {
        let window_start = self.window_start;
        self.window_start = self.window_start.saturating_add(self.window_ns);

        if self.total == 0 && self.connections.is_empty() {
            return None;
        }

        let mut latencies = std::mem::take(&mut self.latencies);
        let percentiles = calculate_percentiles(&mut latencies);

        let (avg_latency_us, min_latency_us) = if self.total > 0 {
            (
                self.sum_ns as f64 / self.total as f64 / 1_000.0,
                self.min_ns / 1_000,
            )
        } else {
            (0.0, 0)
        };

        let metrics = WindowMetrics {
            window_start,
            window_end: window_start.saturating_add(self.window_ns),
            total_requests: self.total,
            avg_latency_us,
            min_latency_us,
            max_latency_us: self.max_ns / 1_000,
            percentiles,
            histogram: std::mem::take(&mut self.histogram),
            process_breakdown: std::mem::take(&mut self.processes),
            connection_attempts: std::mem::take(&mut self.connections),
            retained_samples: latencies.len() as u64,
            agent_id: self.agent_id.clone(),
            timestamp: Utc::now().to_rfc3339(),
            pipeline: Default::default(),
        };

        self.total = 0;
        self.sum_ns = 0;
        self.min_ns = u64::MAX;
        self.max_ns = 0;

        Some(metrics)
    }

    /// Window length
    pub fn window(&self) -> Duration {
        Duration::from_nanos(self.window_ns as u64)
    }

    /// Start of the current window (Unix nanoseconds)
    pub fn window_start(&self) -> i64 {
        self.window_start
    }

    /// Requests recorded in the current window
    pub fn sample_count(&self) -> u64 {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn aggregator(window_secs: u64, max_samples: usize) -> WindowAggregator {
        let now = Utc.timestamp_opt(1_700_000_007, 500).unwrap();
        WindowAggregator::starting_at(
            Duration::from_secs(window_secs),
            "test-agent".to_string(),
            max_samples,
            now,
        )
    }

    fn event(key: ContextKey, latency_ns: u64) -> CompletedEvent {
        CompletedEvent {
            timestamp_ns: 0,
            latency_ns,
            context_key: key,
        }
    }

    #[test]
    fn test_window_alignment() {
        let agg = aggregator(10, 100);
        assert_eq!(agg.window_start(), 1_700_000_000 * 1_000_000_000);
        assert_eq!(agg.window(), Duration::from_secs(10));
    }

    #[test]
    fn test_empty_window_advances() {
        let mut agg = aggregator(10, 100);
        let start = agg.window_start();

        assert!(agg.rotate().is_none());
        assert_eq!(agg.window_start(), start + 10_000_000_000);
    }

    #[test]
    fn test_rotate_metrics() {
        let mut agg = aggregator(1, 1_000);
        for i in 0..10u64 {
            agg.add_sample(&event(1234, (i + 1) * 10_000));
            agg.add_sample(&event(5678, (i + 1) * 15_000));
        }
        agg.add_connection(ConnectionSample { port: 443 });
        agg.add_connection(ConnectionSample { port: 443 });
        assert_eq!(agg.sample_count(), 20);

        let start = agg.window_start();
        let metrics = agg.rotate().unwrap();

        assert_eq!(metrics.window_start, start);
        assert_eq!(metrics.window_end, start + 1_000_000_000);
        assert_eq!(metrics.total_requests, 20);
        assert_eq!(metrics.process_breakdown.len(), 2);
        assert_eq!(metrics.process_breakdown[&1234], 10);
        assert_eq!(metrics.connection_attempts[&443], 2);
        assert_eq!(metrics.min_latency_us, 10);
        assert_eq!(metrics.max_latency_us, 150);
        // (550_000 + 825_000) / 20 / 1000
        assert!((metrics.avg_latency_us - 68.75).abs() < 1e-9);
        assert_eq!(metrics.histogram.total_count(), 20);
        assert_eq!(metrics.agent_id, "test-agent");

        // State is reset for the next window
        assert_eq!(agg.sample_count(), 0);
        assert!(agg.rotate().is_none());
    }

    #[test]
    fn test_percentiles_in_window() {
        let mut agg = aggregator(10, 1_000);
        for i in 1..=100u64 {
            agg.add_sample(&event(1, i * 1_000_000));
        }

        let metrics = agg.rotate().unwrap();
        assert_eq!(metrics.percentiles.p50, 50_000);
        assert_eq!(metrics.percentiles.p95, 95_000);
        assert_eq!(metrics.percentiles.p99, 99_000);
    }

    #[test]
    fn test_retained_samples_bounded() {
        let mut agg = aggregator(10, 5);
        for i in 0..50u64 {
            agg.add_sample(&event(1, i * 1_000));
        }

        let metrics = agg.rotate().unwrap();
        assert_eq!(metrics.total_requests, 50);
        assert_eq!(metrics.retained_samples, 5);
        assert_eq!(metrics.max_latency_us, 49);
    }

    #[test]
    fn test_percentiles_cover_whole_window() {
        let mut agg = aggregator(10, 100);
        for _ in 0..100 {
            agg.add_sample(&event(1, 1_000_000));
        }
        for _ in 0..900 {
            agg.add_sample(&event(1, 100_000_000));
        }

        let metrics = agg.rotate().unwrap();
        assert_eq!(metrics.total_requests, 1_000);
        assert_eq!(metrics.retained_samples, 100);
        assert_eq!(metrics.min_latency_us, 1_000);
        assert_eq!(metrics.max_latency_us, 100_000);
        // 90% of the window is slow, so the median must be too
        assert_eq!(metrics.percentiles.p50, 100_000);
        assert_eq!(metrics.percentiles.p99, 100_000);
    }

    #[test]
    fn test_connections_only_window() {
        let mut agg = aggregator(10, 10);
        agg.add_connection(ConnectionSample { port: 80 });

        let metrics = agg.rotate().unwrap();
        assert_eq!(metrics.total_requests, 0);
        assert_eq!(metrics.min_latency_us, 0);
        assert_eq!(metrics.connection_attempts[&80], 1);
    }
}

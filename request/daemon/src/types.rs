//! Userspace type definitions
//!
//! Defines the records that flow through the correlation pipeline and the
//! structures exported per aggregation window.
//!
//! ## Organization
//!
//! - **Kernel Types**: signal layout shared with the eBPF programs (from probe_common)
//! - **Pipeline Types**: decoded signals and completed events
//! - **Export Types**: window metrics, histogram and percentiles

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::stats::PipelineCounters;

// ============================================================================
// Kernel Types (from eBPF programs)
// ============================================================================

pub mod kernel {
    //! Types shared between kernel eBPF programs and userspace
    //!
    //! These are re-exported from the probe-common crate and must
    //! maintain binary compatibility with the eBPF programs.

    pub use probe_common::constants;
    pub use probe_common::types::RawSignal;
}

pub use kernel::RawSignal;

// ============================================================================
// Pipeline Types
// ============================================================================

/// Identifier of the unit of work a start/end pair belongs to (a process ID)
pub type ContextKey = u32;

/// A decoded instrumentation signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Request processing started for `key`
    Start { key: ContextKey, timestamp_ns: u64 },
    /// Request processing finished for `key`
    End { key: ContextKey, timestamp_ns: u64 },
    /// Connection attempt towards `port`
    ConnectionAttempt { port: u16 },
}

impl Signal {
    /// Decode a raw kernel signal
    ///
    /// Returns None for an unknown kind.
    pub fn decode(raw: &RawSignal) -> Option<Self> {
        use probe_common::constants::{SIGNAL_KIND_CONNECT, SIGNAL_KIND_END, SIGNAL_KIND_START};

        match raw.kind {
            SIGNAL_KIND_START => Some(Signal::Start {
                key: raw.key,
                timestamp_ns: raw.timestamp_ns,
            }),
            SIGNAL_KIND_END => Some(Signal::End {
                key: raw.key,
                timestamp_ns: raw.timestamp_ns,
            }),
            SIGNAL_KIND_CONNECT => Some(Signal::ConnectionAttempt { port: raw.port }),
            _ => None,
        }
    }
}

/// A matched start/end pair
///
/// Built exactly once per pair by the correlator and never mutated.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletedEvent {
    /// Completion time (nanoseconds, monotonic clock of the probe)
    pub timestamp_ns: u64,
    /// Completion minus start, clamped at zero
    pub latency_ns: u64,
    /// Context the request ran in
    pub context_key: ContextKey,
}

/// A connection attempt observed at the syscall layer
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSample {
    /// Destination port (host byte order)
    pub port: u16,
}

// ============================================================================
// Export Types
// ============================================================================

/// Aggregated metrics for one window
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct WindowMetrics {
    /// Window start (Unix nanoseconds)
    pub window_start: i64,
    /// Window end (Unix nanoseconds)
    pub window_end: i64,
    /// Number of completed requests
    pub total_requests: u64,
    /// Mean latency in microseconds
    pub avg_latency_us: f64,
    /// Minimum latency in microseconds
    pub min_latency_us: u64,
    /// Maximum latency in microseconds
    pub max_latency_us: u64,
    /// Latency percentiles in microseconds
    pub percentiles: Percentiles,
    /// Latency histogram
    pub histogram: LatencyHistogram,
    /// Requests per process ID
    pub process_breakdown: BTreeMap<ContextKey, u64>,
    /// Connection attempts per destination port
    pub connection_attempts: BTreeMap<u16, u64>,
    /// Latencies kept for percentile computation
    pub retained_samples: u64,
    /// Agent that produced the report
    pub agent_id: String,
    /// RFC 3339 time the report was generated
    pub timestamp: String,
    /// Pipeline health counters at report time
    pub pipeline: PipelineCounters,
}

/// Latency histogram buckets
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct LatencyHistogram {
    /// 0-1ms bucket
    #[serde(rename = "0-1ms")]
    pub bucket_0_1ms: u64,
    /// 1-5ms bucket
    #[serde(rename = "1-5ms")]
    pub bucket_1_5ms: u64,
    /// 5-10ms bucket
    #[serde(rename = "5-10ms")]
    pub bucket_5_10ms: u64,
    /// 10-50ms bucket
    #[serde(rename = "10-50ms")]
    pub bucket_10_50ms: u64,
    /// 50-100ms bucket
    #[serde(rename = "50-100ms")]
    pub bucket_50_100ms: u64,
    /// 100ms+ bucket
    #[serde(rename = "100ms+")]
    pub bucket_100ms_plus: u64,
}

impl LatencyHistogram {
    /// Add a sample to the appropriate bucket
    ///
    /// # Arguments
    ///
    /// * `latency_us` - Latency in microseconds
    pub fn add_sample(&mut self, latency_us: u64) {
        match latency_us {
            l if l < 1_000 => self.bucket_0_1ms += 1,
            l if l < 5_000 => self.bucket_1_5ms += 1,
            l if l < 10_000 => self.bucket_5_10ms += 1,
            l if l < 50_000 => self.bucket_10_50ms += 1,
            l if l < 100_000 => self.bucket_50_100ms += 1,
            _ => self.bucket_100ms_plus += 1,
        }
    }

    /// Get total count across all buckets
    pub fn total_count(&self) -> u64 {
        self.bucket_0_1ms
            + self.bucket_1_5ms
            + self.bucket_5_10ms
            + self.bucket_10_50ms
            + self.bucket_50_100ms
            + self.bucket_100ms_plus
    }
}

/// Latency percentiles in microseconds
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Percentiles {
    /// 50th percentile (median)
    pub p50: u64,
    /// 75th percentile
    pub p75: u64,
    /// 90th percentile
    pub p90: u64,
    /// 95th percentile
    pub p95: u64,
    /// 99th percentile
    pub p99: u64,
    /// 99.9th percentile
    pub p999: u64,
}

/// Above this many samples, percentiles use selection instead of a full sort
const SORT_THRESHOLD: usize = 1000;

/// Nearest-rank index: floor((n - 1) * pct / 100)
fn rank(len: usize, pct: f64) -> usize {
    let index = ((len - 1) as f64 * (pct / 100.0)) as usize;
    index.min(len - 1)
}

/// Calculate a single percentile of latency samples
///
/// Reorders `samples` in place. Returns 0 for an empty slice.
pub fn percentile(samples: &mut [u64], pct: f64) -> u64 {
    if samples.is_empty() {
        return 0;
    }
    let index = rank(samples.len(), pct);
    *samples.select_nth_unstable(index).1
}

/// Calculate percentiles from latency samples in nanoseconds
///
/// # Arguments
///
/// * `samples` - Latencies in nanoseconds (reordered in place)
///
/// # Returns
///
/// Percentiles in microseconds
pub fn calculate_percentiles(samples: &mut [u64]) -> Percentiles {
    if samples.is_empty() {
        return Percentiles::default();
    }

    let points = [50.0, 75.0, 90.0, 95.0, 99.0, 99.9];
    let mut values = [0u64; 6];

    if samples.len() <= SORT_THRESHOLD {
        samples.sort_unstable();
        for (value, pct) in values.iter_mut().zip(points) {
            *value = samples[rank(samples.len(), pct)];
        }
    } else {
        for (value, pct) in values.iter_mut().zip(points) {
            *value = percentile(samples, pct);
        }
    }

    let [p50, p75, p90, p95, p99, p999] = values.map(|ns| ns / 1_000);
    Percentiles {
        p50,
        p75,
        p90,
        p95,
        p99,
        p999,
    }
}

//! Pipeline counters
//!
//! Every non-fatal condition in the pipeline is recorded here instead of
//! being raised. Counters are owned by the component that increments them,
//! so independent pipelines (and tests) never share state.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic event counter
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Add one
    #[inline]
    pub fn incr(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Add `n`
    #[inline]
    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    /// Current value
    #[inline]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Counters owned by a correlator
#[derive(Debug, Default)]
pub struct CorrelatorStats {
    /// Start signals received
    pub starts: Counter,
    /// End signals received
    pub ends: Counter,
    /// Events built and accepted by the channel
    pub completed: Counter,
    /// End signals with no pending start
    pub unmatched_ends: Counter,
    /// Starts that met a full index (rejected or caused an eviction)
    pub index_overflows: Counter,
    /// Pending starts evicted to make room
    pub evicted_starts: Counter,
    /// Pending starts replaced by a newer start for the same key
    pub overwritten_starts: Counter,
    /// Duplicate starts ignored in favour of the pending one
    pub retained_starts: Counter,
    /// End timestamps earlier than their start
    pub clock_anomalies: Counter,
}

/// Point-in-time copy of all pipeline counters
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct PipelineCounters {
    pub starts: u64,
    pub ends: u64,
    pub completed: u64,
    pub unmatched_ends: u64,
    pub index_overflows: u64,
    pub evicted_starts: u64,
    pub overwritten_starts: u64,
    pub retained_starts: u64,
    pub clock_anomalies: u64,
    /// Completed events dropped by the channel
    pub channel_drops: u64,
    /// Connection samples dropped by the queue
    pub queue_drops: u64,
    /// Raw signals with an unknown kind
    pub malformed_signals: u64,
    /// Samples the kernel reported as lost from the perf buffers
    pub lost_signals: u64,
    /// Starts currently awaiting their end (gauge)
    pub pending_starts: u64,
}

impl CorrelatorStats {
    /// Copy the correlator's share of the counters into `out`
    pub fn fill(&self, out: &mut PipelineCounters) {
        out.starts = self.starts.get();
        out.ends = self.ends.get();
        out.completed = self.completed.get();
        out.unmatched_ends = self.unmatched_ends.get();
        out.index_overflows = self.index_overflows.get();
        out.evicted_starts = self.evicted_starts.get();
        out.overwritten_starts = self.overwritten_starts.get();
        out.retained_starts = self.retained_starts.get();
        out.clock_anomalies = self.clock_anomalies.get();
    }
}

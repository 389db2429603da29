//! Engine configuration
//!
//! Sizes and policies for every bounded structure in the pipeline. Built
//! from CLI flags by the binary; defaults come from probe_common.

use anyhow::{bail, Result};
use probe_common::constants::*;
use std::time::Duration;

use crate::{
    channel::Backpressure,
    index::{DuplicatePolicy, OverflowPolicy},
};

/// Configuration of the correlation and aggregation engine
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Maximum pending starts
    pub index_capacity: usize,
    /// Behaviour of a new start on a full index
    pub overflow_policy: OverflowPolicy,
    /// Behaviour of a start for an already pending key
    pub duplicate_policy: DuplicatePolicy,
    /// Maximum buffered connection samples
    pub queue_capacity: usize,
    /// Maximum undrained completed events
    pub channel_capacity: usize,
    /// Behaviour of publish on a full channel
    pub backpressure: Backpressure,
    /// Maximum keys in the running-stats surface
    pub aggregate_capacity: usize,
    /// Window length
    pub window: Duration,
    /// Latencies retained per window for percentiles
    pub max_window_samples: usize,
    /// Window reports buffered between aggregation and export
    pub metrics_buffer: usize,
    /// How often the consumer drains the channel
    pub drain_interval: Duration,
    /// Identifier stamped on every window report
    pub agent_id: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            index_capacity: MAX_PENDING_REQUESTS as usize,
            overflow_policy: OverflowPolicy::default(),
            duplicate_policy: DuplicatePolicy::default(),
            queue_capacity: MAX_CONNECTION_SAMPLES as usize,
            channel_capacity: DEFAULT_COMPLETION_CAPACITY as usize,
            backpressure: Backpressure::default(),
            aggregate_capacity: DEFAULT_AGGREGATE_KEYS as usize,
            window: Duration::from_secs(10),
            max_window_samples: DEFAULT_WINDOW_SAMPLES as usize,
            metrics_buffer: DEFAULT_METRICS_BUFFER as usize,
            drain_interval: Duration::from_millis(100),
            agent_id: "request-probe-1".to_string(),
        }
    }
}

impl EngineConfig {
    /// Reject configurations that would leave a structure unusable
    pub fn validate(&self) -> Result<()> {
        let capacities = [
            ("index capacity", self.index_capacity),
            ("queue capacity", self.queue_capacity),
            ("channel capacity", self.channel_capacity),
            ("aggregate capacity", self.aggregate_capacity),
            ("window sample limit", self.max_window_samples),
            ("metrics buffer", self.metrics_buffer),
        ];
        for (name, value) in capacities {
            if value == 0 {
                bail!("{} must be >= 1", name);
            }
        }

        if self.window.is_zero() {
            bail!("Window duration must be > 0");
        }
        if self.drain_interval.is_zero() {
            bail!("Drain interval must be > 0");
        }
        if self.drain_interval > self.window {
            bail!(
                "Drain interval ({:?}) must not exceed the window ({:?})",
                self.drain_interval,
                self.window
            );
        }
        if self.agent_id.trim().is_empty() {
            bail!("Agent ID must not be empty");
        }

        Ok(())
    }
}

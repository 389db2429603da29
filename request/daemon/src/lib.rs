//! Request Probe Userspace Library
//!
//! Correlates request start/end signals from the eBPF probes into latency
//! events, aggregates them per process and per time window, and exports the
//! results.

pub mod aggregator;
pub mod channel;
pub mod config;
pub mod correlator;
pub mod error;
pub mod events;
pub mod exporter;
pub mod index;
pub mod loader;
pub mod pipeline;
pub mod queue;
pub mod stats;
pub mod types;
pub mod window;

pub use aggregator::{KeyedAggregator, RunningStats};
pub use channel::{Backpressure, CompletionChannel};
pub use config::EngineConfig;
pub use correlator::Correlator;
pub use error::CorrelationError;
pub use events::EventProcessor;
pub use exporter::{ExporterType, JsonExporter, MetricsExporter, PrometheusExporter};
pub use index::{DuplicatePolicy, OverflowPolicy, PendingIndex, PutOutcome};
pub use loader::{AttachResult, KernelStats, ProbeLoader};
pub use pipeline::Pipeline;
pub use queue::ConnectionSampleQueue;
pub use stats::PipelineCounters;
pub use types::*;
pub use window::WindowAggregator;

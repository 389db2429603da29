//! Correlation pipeline
//!
//! Owns the pending index, completion channel, correlator, connection
//! queue and running-stats surface, and routes decoded signals to them.
//! Producers call `dispatch`; the consumer task calls `drain_into`.

use parking_lot::{RwLock, RwLockReadGuard};
use std::sync::Arc;

use crate::{
    aggregator::KeyedAggregator,
    channel::{Backpressure, CompletionChannel},
    config::EngineConfig,
    correlator::Correlator,
    error::CorrelationError,
    index::PendingIndex,
    queue::ConnectionSampleQueue,
    stats::{Counter, PipelineCounters},
    types::{CompletedEvent, ConnectionSample, RawSignal, Signal},
    window::WindowAggregator,
};

/// The assembled correlation and aggregation engine
#[derive(Debug)]
pub struct Pipeline {
    correlator: Correlator,
    connections: ConnectionSampleQueue,
    aggregates: RwLock<KeyedAggregator>,
    malformed_signals: Counter,
    lost_signals: Counter,
}

impl Pipeline {
    /// Build every component from `config`
    pub fn new(config: &EngineConfig) -> Self {
        let index = Arc::new(PendingIndex::new(
            config.index_capacity,
            config.overflow_policy,
            config.duplicate_policy,
        ));
        let channel = Arc::new(CompletionChannel::new(
            config.channel_capacity,
            config.backpressure,
        ));

        Self {
            correlator: Correlator::new(index, channel),
            connections: ConnectionSampleQueue::new(config.queue_capacity),
            aggregates: RwLock::new(KeyedAggregator::new(config.aggregate_capacity)),
            malformed_signals: Counter::default(),
            lost_signals: Counter::default(),
        }
    }

    /// Route one decoded signal
    ///
    /// Returns the completed event for a matched end, None for starts and
    /// connection attempts. Errors are already counted.
    pub fn dispatch(&self, signal: Signal) -> Result<Option<CompletedEvent>, CorrelationError> {
        match signal {
            Signal::Start { key, timestamp_ns } => {
                self.correlator.try_start(key, timestamp_ns)?;
                Ok(None)
            }
            Signal::End { key, timestamp_ns } => {
                self.correlator.on_end(key, timestamp_ns).map(Some)
            }
            Signal::ConnectionAttempt { port } => {
                self.connections.push(ConnectionSample { port })?;
                Ok(None)
            }
        }
    }

    /// Decode and route a raw kernel signal
    ///
    /// Unknown kinds are counted and ignored.
    pub fn dispatch_raw(
        &self,
        raw: &RawSignal,
    ) -> Result<Option<CompletedEvent>, CorrelationError> {
        match Signal::decode(raw) {
            Some(signal) => self.dispatch(signal),
            None => {
                self.malformed_signals.incr();
                Ok(None)
            }
        }
    }

    /// Route a batch of raw signals in order
    ///
    /// Rejected signals are counted by their component. Returns the number
    /// of completed events published.
    pub fn dispatch_batch(&self, batch: &[RawSignal]) -> usize {
        batch
            .iter()
            .filter(|raw| matches!(self.dispatch_raw(raw), Ok(Some(_))))
            .count()
    }

    /// Whether dispatching may block the calling thread
    ///
    /// True under `Backpressure::Wait`, where a publish on a full channel
    /// waits for the consumer.
    pub fn may_block(&self) -> bool {
        matches!(self.correlator.channel().policy(), Backpressure::Wait(_))
    }

    /// Drain completed events and connection samples into the surfaces
    ///
    /// Folds every drained event into the running stats and `window`, and
    /// moves every queued connection sample into `window`. Returns the
    /// number of completed events drained.
    pub fn drain_into(&self, window: &mut WindowAggregator) -> usize {
        let mut drained = 0;
        {
            let mut aggregates = self.aggregates.write();
            for event in self.correlator.channel().drain() {
                aggregates.record(&event);
                window.add_sample(&event);
                drained += 1;
            }
        }

        while let Some(sample) = self.connections.pop() {
            window.add_connection(sample);
        }

        drained
    }

    /// Record a perf sample too short to hold a signal
    pub fn record_malformed(&self) {
        self.malformed_signals.incr();
    }

    /// Record samples the kernel reported as lost
    pub fn record_lost(&self, count: u64) {
        self.lost_signals.add(count);
    }

    /// Snapshot of all pipeline counters
    pub fn counters(&self) -> PipelineCounters {
        let mut counters = PipelineCounters::default();
        self.correlator.stats().fill(&mut counters);
        counters.channel_drops = self.correlator.channel().dropped();
        counters.queue_drops = self.connections.dropped();
        counters.malformed_signals = self.malformed_signals.get();
        counters.lost_signals = self.lost_signals.get();
        counters.pending_starts = self.correlator.index().len() as u64;
        counters
    }

    /// Read access to the running-stats surface
    pub fn aggregates(&self) -> RwLockReadGuard<'_, KeyedAggregator> {
        self.aggregates.read()
    }

    pub fn correlator(&self) -> &Correlator {
        &self.correlator
    }

    pub fn connections(&self) -> &ConnectionSampleQueue {
        &self.connections
    }
}

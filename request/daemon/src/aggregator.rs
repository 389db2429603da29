//! Per-key running statistics
//!
//! Folds drained completed events into count/sum/min/max per context key.
//! The number of keys is bounded; when a new key arrives at capacity the
//! least recently updated key is evicted.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::types::{CompletedEvent, ContextKey};

/// Running latency statistics for one key
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunningStats {
    pub count: u64,
    pub sum_ns: u64,
    pub min_ns: u64,
    pub max_ns: u64,
    /// Completion timestamp of the most recent event
    pub last_timestamp_ns: u64,
}

impl RunningStats {
    fn first(event: &CompletedEvent) -> Self {
        Self {
            count: 1,
            sum_ns: event.latency_ns,
            min_ns: event.latency_ns,
            max_ns: event.latency_ns,
            last_timestamp_ns: event.timestamp_ns,
        }
    }

    fn record(&mut self, event: &CompletedEvent) {
        self.count += 1;
        self.sum_ns = self.sum_ns.saturating_add(event.latency_ns);
        self.min_ns = self.min_ns.min(event.latency_ns);
        self.max_ns = self.max_ns.max(event.latency_ns);
        self.last_timestamp_ns = self.last_timestamp_ns.max(event.timestamp_ns);
    }

    /// Mean latency in nanoseconds
    pub fn mean_ns(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.sum_ns as f64 / self.count as f64
    }
}

/// Bounded map of running statistics keyed by context
#[derive(Debug)]
pub struct KeyedAggregator {
    /// Stats and the tick of their last update
    stats: HashMap<ContextKey, (RunningStats, u64)>,
    /// Last-update tick -> key, oldest first
    recency: BTreeMap<u64, ContextKey>,
    next_tick: u64,
    capacity: usize,
    evicted_keys: u64,
}

impl KeyedAggregator {
    /// Create an aggregator tracking at most `capacity` keys
    ///
    /// A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            stats: HashMap::new(),
            recency: BTreeMap::new(),
            next_tick: 0,
            capacity: capacity.max(1),
            evicted_keys: 0,
        }
    }

    /// Fold one completed event
    pub fn record(&mut self, event: &CompletedEvent) {
        let tick = self.next_tick;
        self.next_tick += 1;

        let key = event.context_key;
        if let Some((stats, last_tick)) = self.stats.get_mut(&key) {
            stats.record(event);
            self.recency.remove(&*last_tick);
            *last_tick = tick;
            self.recency.insert(tick, key);
            return;
        }

        if self.stats.len() >= self.capacity {
            if let Some((_, stale)) = self.recency.pop_first() {
                self.stats.remove(&stale);
                self.evicted_keys += 1;
            }
        }

        self.stats.insert(key, (RunningStats::first(event), tick));
        self.recency.insert(tick, key);
    }

    /// Fold a batch of events
    pub fn extend<I: IntoIterator<Item = CompletedEvent>>(&mut self, events: I) {
        for event in events {
            self.record(&event);
        }
    }

    /// Statistics for `key`
    pub fn get(&self, key: ContextKey) -> Option<RunningStats> {
        self.stats.get(&key).map(|(stats, _)| *stats)
    }

    /// Copy of all statistics ordered by key
    pub fn snapshot(&self) -> BTreeMap<ContextKey, RunningStats> {
        self.stats
            .iter()
            .map(|(key, (stats, _))| (*key, *stats))
            .collect()
    }

    /// Number of tracked keys
    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Keys dropped to stay within capacity
    pub fn evicted_keys(&self) -> u64 {
        self.evicted_keys
    }
}

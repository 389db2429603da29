//! Start/end correlation
//!
//! Pairs start and end signals through the pending index and publishes one
//! completed event per matched pair. Both entry points run on the perf
//! reader tasks, so they never block beyond the index's critical section
//! and the channel's backpressure policy, and they never panic.

use log::debug;
use std::sync::Arc;

use crate::{
    channel::CompletionChannel,
    error::CorrelationError,
    index::{PendingIndex, PutOutcome},
    stats::CorrelatorStats,
    types::{CompletedEvent, ContextKey},
};

/// Correlates start/end signals into completed events
#[derive(Debug)]
pub struct Correlator {
    index: Arc<PendingIndex>,
    channel: Arc<CompletionChannel>,
    stats: CorrelatorStats,
}

impl Correlator {
    /// Create a correlator over a pending index and a completion channel
    pub fn new(index: Arc<PendingIndex>, channel: Arc<CompletionChannel>) -> Self {
        Self {
            index,
            channel,
            stats: CorrelatorStats::default(),
        }
    }

    /// Handle a start signal
    pub fn on_start(&self, key: ContextKey, timestamp_ns: u64) {
        // Overflow is already counted inside try_start
        let _ = self.try_start(key, timestamp_ns);
    }

    /// Handle a start signal, reporting a rejected start as an error
    ///
    /// An eviction still stores the new start and is reported as Ok.
    pub fn try_start(&self, key: ContextKey, timestamp_ns: u64) -> Result<(), CorrelationError> {
        self.stats.starts.incr();

        match self.index.put(key, timestamp_ns) {
            PutOutcome::Inserted => Ok(()),
            PutOutcome::Replaced { previous_ns } => {
                self.stats.overwritten_starts.incr();
                debug!(
                    "Start for context {} overwrote pending start at {}ns",
                    key, previous_ns
                );
                Ok(())
            }
            PutOutcome::KeptExisting { retained_ns } => {
                self.stats.retained_starts.incr();
                debug!(
                    "Start for context {} ignored, keeping pending start at {}ns",
                    key, retained_ns
                );
                Ok(())
            }
            PutOutcome::Evicted {
                key: evicted,
                start_ns,
            } => {
                self.stats.index_overflows.incr();
                self.stats.evicted_starts.incr();
                debug!(
                    "Pending index full, evicted context {} (started {}ns)",
                    evicted, start_ns
                );
                Ok(())
            }
            PutOutcome::Rejected => {
                self.stats.index_overflows.incr();
                debug!("Pending index full, start for context {} rejected", key);
                Err(CorrelationError::IndexOverflow(key))
            }
        }
    }

    /// Handle an end signal
    ///
    /// Consumes the pending start for `key` and publishes the completed
    /// event. A negative latency is clamped to zero and counted as a clock
    /// anomaly.
    pub fn on_end(
        &self,
        key: ContextKey,
        timestamp_ns: u64,
    ) -> Result<CompletedEvent, CorrelationError> {
        self.stats.ends.incr();

        let Some(start_ns) = self.index.take_and_remove(key) else {
            self.stats.unmatched_ends.incr();
            debug!("End for context {} has no pending start", key);
            return Err(CorrelationError::UnmatchedEnd(key));
        };

        let latency_ns = match timestamp_ns.checked_sub(start_ns) {
            Some(latency) => latency,
            None => {
                self.stats.clock_anomalies.incr();
                debug!(
                    "End for context {} precedes its start by {}ns, clamping",
                    key,
                    start_ns - timestamp_ns
                );
                0
            }
        };

        let event = CompletedEvent {
            timestamp_ns,
            latency_ns,
            context_key: key,
        };

        self.channel.publish(event)?;
        self.stats.completed.incr();

        Ok(event)
    }

    pub fn stats(&self) -> &CorrelatorStats {
        &self.stats
    }

    pub fn index(&self) -> &PendingIndex {
        &self.index
    }

    pub fn channel(&self) -> &CompletionChannel {
        &self.channel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Backpressure;
    use crate::index::{DuplicatePolicy, OverflowPolicy};

    fn correlator(
        index_capacity: usize,
        overflow: OverflowPolicy,
        duplicate: DuplicatePolicy,
        channel_capacity: usize,
    ) -> Correlator {
        Correlator::new(
            Arc::new(PendingIndex::new(index_capacity, overflow, duplicate)),
            Arc::new(CompletionChannel::new(channel_capacity, Backpressure::Drop)),
        )
    }

    fn default_correlator() -> Correlator {
        correlator(
            16,
            OverflowPolicy::RejectNew,
            DuplicatePolicy::Overwrite,
            16,
        )
    }

    #[test]
    fn test_matched_pair() {
        let c = default_correlator();
        c.on_start(7, 1_000);

        let event = c.on_end(7, 1_750).unwrap();
        assert_eq!(
            event,
            CompletedEvent {
                timestamp_ns: 1_750,
                latency_ns: 750,
                context_key: 7
            }
        );
        assert_eq!(c.channel().drain().collect::<Vec<_>>(), vec![event]);
        assert_eq!(c.stats().completed.get(), 1);
        assert!(c.index().is_empty());
    }

    #[test]
    fn test_unmatched_end() {
        let c = default_correlator();

        assert_eq!(c.on_end(3, 500), Err(CorrelationError::UnmatchedEnd(3)));
        assert_eq!(c.stats().unmatched_ends.get(), 1);
        assert_eq!(c.channel().drain().count(), 0);
    }

    #[test]
    fn test_second_end_is_unmatched() {
        let c = default_correlator();
        c.on_start(3, 100);
        c.on_end(3, 200).unwrap();

        assert_eq!(c.on_end(3, 300), Err(CorrelationError::UnmatchedEnd(3)));
        assert_eq!(c.channel().drain().count(), 1);
    }

    #[test]
    fn test_duplicate_start_overwrite() {
        let c = correlator(4, OverflowPolicy::RejectNew, DuplicatePolicy::Overwrite, 4);
        c.on_start(1, 100);
        c.on_start(1, 200);

        let event = c.on_end(1, 300).unwrap();
        assert_eq!(event.latency_ns, 100);
        assert_eq!(c.stats().overwritten_starts.get(), 1);
        assert_eq!(c.channel().drain().count(), 1);
    }

    #[test]
    fn test_duplicate_start_keep_first() {
        let c = correlator(4, OverflowPolicy::RejectNew, DuplicatePolicy::KeepFirst, 4);
        c.on_start(1, 100);
        c.on_start(1, 200);

        let event = c.on_end(1, 300).unwrap();
        assert_eq!(event.latency_ns, 200);
        assert_eq!(c.stats().retained_starts.get(), 1);
        assert_eq!(c.channel().drain().count(), 1);
    }

    #[test]
    fn test_capacity_two_reject_scenario() {
        let c = correlator(2, OverflowPolicy::RejectNew, DuplicatePolicy::Overwrite, 8);
        c.on_start(1, 100);
        c.on_start(2, 200);
        assert_eq!(c.try_start(3, 300), Err(CorrelationError::IndexOverflow(3)));
        assert_eq!(c.stats().index_overflows.get(), 1);
        assert!(!c.index().contains(3));

        let event = c.on_end(2, 250).unwrap();
        assert_eq!(event.context_key, 2);
        assert_eq!(event.latency_ns, 50);

        assert_eq!(c.on_end(3, 350), Err(CorrelationError::UnmatchedEnd(3)));
        assert_eq!(c.on_end(1, 400).unwrap().latency_ns, 300);
    }

    #[test]
    fn test_capacity_two_evict_scenario() {
        let c = correlator(2, OverflowPolicy::EvictOldest, DuplicatePolicy::Overwrite, 8);
        c.on_start(1, 100);
        c.on_start(2, 200);
        c.on_start(3, 300);
        assert_eq!(c.stats().index_overflows.get(), 1);
        assert_eq!(c.stats().evicted_starts.get(), 1);
        assert!(!c.index().contains(1));

        let event = c.on_end(2, 250).unwrap();
        assert_eq!(event.context_key, 2);
        assert_eq!(event.latency_ns, 50);

        assert_eq!(c.on_end(1, 400), Err(CorrelationError::UnmatchedEnd(1)));
        assert_eq!(c.on_end(3, 400).unwrap().latency_ns, 100);
    }

    #[test]
    fn test_negative_latency_clamped() {
        let c = default_correlator();
        c.on_start(9, 5_000);

        let event = c.on_end(9, 4_000).unwrap();
        assert_eq!(event.latency_ns, 0);
        assert_eq!(c.stats().clock_anomalies.get(), 1);
    }

    #[test]
    fn test_saturated_channel_consumes_start() {
        let c = correlator(4, OverflowPolicy::RejectNew, DuplicatePolicy::Overwrite, 1);
        c.on_start(1, 10);
        c.on_start(2, 20);

        assert!(c.on_end(1, 30).is_ok());
        assert_eq!(c.on_end(2, 40), Err(CorrelationError::ChannelSaturated(2)));
        assert!(c.index().is_empty());
        assert_eq!(c.stats().completed.get(), 1);
        assert_eq!(c.channel().dropped(), 1);
    }

    #[test]
    fn test_concurrent_producers() {
        use std::thread;

        let c = Arc::new(correlator(
            4096,
            OverflowPolicy::RejectNew,
            DuplicatePolicy::Overwrite,
            4096,
        ));

        let handles: Vec<_> = (0..8u32)
            .map(|t| {
                let c = Arc::clone(&c);
                thread::spawn(move || {
                    for i in 0..250u32 {
                        let key = t * 10_000 + i;
                        c.on_start(key, 1_000);
                        c.on_end(key, 1_000 + u64::from(i)).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let events: Vec<_> = c.channel().drain().collect();
        assert_eq!(events.len(), 2_000);
        assert!(events
            .iter()
            .all(|e| e.latency_ns == u64::from(e.context_key % 10_000)));
        assert!(c.index().is_empty());
    }

    #[test]
    fn test_concurrent_same_key() {
        use std::thread;

        let c = Arc::new(correlator(
            16,
            OverflowPolicy::RejectNew,
            DuplicatePolicy::Overwrite,
            1 << 16,
        ));

        let handles: Vec<_> = (0..8u64)
            .map(|t| {
                let c = Arc::clone(&c);
                thread::spawn(move || {
                    for i in 0..1_000u64 {
                        c.on_start(7, t * 10_000 + i);
                        let _ = c.on_end(7, t * 10_000 + i + 5);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let stats = c.stats();
        let events: Vec<_> = c.channel().drain().collect();
        assert_eq!(stats.ends.get(), 8_000);
        assert_eq!(stats.completed.get() + stats.unmatched_ends.get(), stats.ends.get());
        assert_eq!(events.len() as u64, stats.completed.get());
        assert!(events.iter().all(|e| e.context_key == 7));
        // Every start is either consumed by one end, overwritten or still pending
        assert_eq!(
            stats.starts.get(),
            stats.completed.get() + stats.overwritten_starts.get() + c.index().len() as u64
        );
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn signal_strategy() -> impl Strategy<Value = Vec<(bool, u32, u64)>> {
            // (is_start, key, timestamp) over a small key space to force collisions
            prop::collection::vec((any::<bool>(), 0u32..8, 0u64..1_000_000), 0..200)
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(100))]

            #[test]
            fn prop_matched_pair_latency(key in any::<u32>(), t1 in 0u64..u64::MAX / 2, delta in 0u64..u64::MAX / 2) {
                let c = default_correlator();
                c.on_start(key, t1);
                let event = c.on_end(key, t1 + delta).unwrap();

                prop_assert_eq!(event.latency_ns, delta);
                prop_assert_eq!(c.channel().drain().count(), 1);
            }

            #[test]
            fn prop_unmatched_end_emits_nothing(key in any::<u32>(), ts in any::<u64>()) {
                let c = default_correlator();
                prop_assert_eq!(c.on_end(key, ts), Err(CorrelationError::UnmatchedEnd(key)));
                prop_assert_eq!(c.stats().unmatched_ends.get(), 1);
                prop_assert_eq!(c.channel().drain().count(), 0);
            }

            #[test]
            fn prop_events_equal_matched_ends(signals in signal_strategy(), evict in any::<bool>()) {
                let overflow = if evict { OverflowPolicy::EvictOldest } else { OverflowPolicy::RejectNew };
                let c = correlator(4, overflow, DuplicatePolicy::Overwrite, 1024);

                let mut matched = 0u64;
                for (is_start, key, ts) in signals {
                    if is_start {
                        c.on_start(key, ts);
                    } else if c.on_end(key, ts).is_ok() {
                        matched += 1;
                    }
                    prop_assert!(c.index().len() <= 4);
                }

                let stats = c.stats();
                prop_assert_eq!(c.channel().drain().count() as u64, matched);
                prop_assert_eq!(stats.completed.get(), matched);
                prop_assert_eq!(stats.ends.get(), matched + stats.unmatched_ends.get());
                prop_assert_eq!(c.channel().drain().count(), 0);
            }
        }
    }
}

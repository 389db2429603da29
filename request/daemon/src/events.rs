//! Event processing from eBPF perf buffers
//!
//! Reads raw signals from the per-CPU perf buffers and feeds them into the
//! pipeline, runs the consumer that drains completed events into windows,
//! and reports progress.

use crate::{
    pipeline::Pipeline,
    types::{RawSignal, WindowMetrics},
    window::WindowAggregator,
};
use anyhow::Result;
use aya::{
    maps::{perf::AsyncPerfEventArray, MapData},
    util::online_cpus,
};
use bytes::BytesMut;
use log::{debug, info, warn};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{
        mpsc::{self, error::TrySendError},
        watch,
    },
    task::{self, JoinHandle},
    time::{interval, interval_at, sleep, Instant, MissedTickBehavior},
};

/// Buffers handed to each perf reader per read call
const READ_BATCH: usize = 16;

/// First pause after a failed perf read; doubles up to `MAX_READ_BACKOFF`
const READ_BACKOFF: Duration = Duration::from_millis(10);
const MAX_READ_BACKOFF: Duration = Duration::from_secs(1);

/// Pause before retrying after `failures` consecutive read errors
fn read_backoff(failures: u32) -> Duration {
    let shift = failures.saturating_sub(1).min(16);
    READ_BACKOFF
        .saturating_mul(1 << shift)
        .min(MAX_READ_BACKOFF)
}

/// Event processor that reads from perf buffers
pub struct EventProcessor {
    pipeline: Arc<Pipeline>,
    verbose: bool,
}

impl EventProcessor {
    /// Create a new event processor
    ///
    /// # Arguments
    ///
    /// * `pipeline` - Shared correlation pipeline
    /// * `verbose` - Log every decoded signal
    pub fn new(pipeline: Arc<Pipeline>, verbose: bool) -> Self {
        Self { pipeline, verbose }
    }

    /// Spawn per-CPU event readers
    ///
    /// Creates a task for each online CPU that decodes `RawSignal`s from
    /// its perf buffer and dispatches them. Lost samples reported by the
    /// kernel are added to the pipeline counters.
    pub fn spawn_cpu_readers(&self, mut perf_array: AsyncPerfEventArray<MapData>) -> Result<()> {
        let cpus = online_cpus()?;
        info!("Spawning event readers for {} CPUs", cpus.len());

        for cpu_id in cpus {
            let mut buf = perf_array.open(cpu_id, None)?;
            let pipeline = Arc::clone(&self.pipeline);
            let verbose = self.verbose;

            tokio::spawn(async move {
                let mut buffers = (0..READ_BATCH)
                    .map(|_| BytesMut::with_capacity(std::mem::size_of::<RawSignal>()))
                    .collect::<Vec<_>>();
                let mut batch = Vec::with_capacity(READ_BATCH);
                let mut failures = 0u32;

                loop {
                    let events = match buf.read_events(&mut buffers).await {
                        Ok(events) => {
                            failures = 0;
                            events
                        }
                        Err(e) => {
                            failures = failures.saturating_add(1);
                            let pause = read_backoff(failures);
                            warn!(
                                "Error reading events from CPU {} ({} in a row, retrying in {:?}): {}",
                                cpu_id, failures, pause, e
                            );
                            sleep(pause).await;
                            continue;
                        }
                    };

                    if events.lost > 0 {
                        pipeline.record_lost(events.lost as u64);
                    }

                    for buf in buffers.iter_mut().take(events.read) {
                        if buf.len() < std::mem::size_of::<RawSignal>() {
                            pipeline.record_malformed();
                            continue;
                        }

                        let ptr = buf.as_ptr() as *const RawSignal;
                        // SAFETY: length checked above, RawSignal is plain repr(C) data
                        let raw = unsafe { ptr.read_unaligned() };

                        if verbose {
                            debug!(
                                "Signal: kind={} key={} port={} ts={}ns",
                                raw.kind, raw.key, raw.port, raw.timestamp_ns
                            );
                        }
                        batch.push(raw);
                    }

                    batch = Self::dispatch_batch(&pipeline, batch).await;
                    batch.clear();
                }
            });
        }

        Ok(())
    }

    /// Dispatch one batch of raw signals without stalling the runtime
    ///
    /// Under a waiting backpressure policy a publish can block until the
    /// consumer task drains the channel, so the batch runs on the blocking
    /// pool and the runtime threads stay free for the consumer. Returns the
    /// batch so its allocation can be reused.
    pub async fn dispatch_batch(pipeline: &Arc<Pipeline>, batch: Vec<RawSignal>) -> Vec<RawSignal> {
        if !pipeline.may_block() {
            pipeline.dispatch_batch(&batch);
            return batch;
        }

        let worker = Arc::clone(pipeline);
        match task::spawn_blocking(move || {
            worker.dispatch_batch(&batch);
            batch
        })
        .await
        {
            Ok(batch) => batch,
            Err(e) => {
                warn!("Signal dispatch task failed: {}", e);
                Vec::with_capacity(READ_BATCH)
            }
        }
    }

    /// Spawn the consumer task
    ///
    /// Drains the pipeline into `window` every `drain_interval` and closes
    /// a window every window length, the first one window after start.
    /// Closed windows carry a counter snapshot and are offered to
    /// `metrics_tx` without waiting; a full buffer drops the window.
    ///
    /// When `shutdown` flips to true (or its sender goes away) the task
    /// drains once more and returns the aggregator holding the partial
    /// window.
    pub fn spawn_consumer(
        &self,
        mut window: WindowAggregator,
        drain_interval: Duration,
        metrics_tx: mpsc::Sender<WindowMetrics>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<WindowAggregator> {
        let pipeline = Arc::clone(&self.pipeline);
        let window_len = window.window();

        tokio::spawn(async move {
            let mut drain_tick = interval(drain_interval);
            drain_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut window_tick = interval_at(Instant::now() + window_len, window_len);
            window_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = drain_tick.tick() => {
                        pipeline.drain_into(&mut window);
                    }
                    _ = window_tick.tick() => {
                        pipeline.drain_into(&mut window);
                        let Some(mut metrics) = window.rotate() else {
                            continue;
                        };
                        metrics.pipeline = pipeline.counters();

                        match metrics_tx.try_send(metrics) {
                            Ok(()) => {}
                            Err(TrySendError::Full(metrics)) => warn!(
                                "Metrics buffer full, dropping window starting at {}",
                                metrics.window_start
                            ),
                            Err(TrySendError::Closed(metrics)) => warn!(
                                "Metrics receiver gone, dropping window starting at {}",
                                metrics.window_start
                            ),
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            let drained = pipeline.drain_into(&mut window);
            debug!("Consumer stopped after final drain of {} events", drained);
            window
        })
    }

    /// Spawn progress reporter
    ///
    /// Creates a task that periodically reports correlation progress.
    pub fn spawn_progress_reporter(&self, interval_secs: u64) {
        let pipeline = Arc::clone(&self.pipeline);

        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));

            loop {
                ticker.tick().await;

                let counters = pipeline.counters();
                let keys = pipeline.aggregates().len();
                info!(
                    "📈 Progress: {} requests completed, {} pending, {} unmatched ends, {} processes tracked",
                    counters.completed, counters.pending_starts, counters.unmatched_ends, keys
                );

                let dropped = counters.channel_drops + counters.queue_drops + counters.lost_signals;
                if dropped > 0 {
                    warn!(
                        "Dropped so far: {} completions, {} connection samples, {} lost in kernel",
                        counters.channel_drops, counters.queue_drops, counters.lost_signals
                    );
                }
            }
        });
    }
}

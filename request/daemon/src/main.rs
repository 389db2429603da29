//! eBPF Request Probe - Userspace Program
//!
//! Loads the request probes, attaches them to the target web server,
//! correlates request start/end signals into latencies and exports
//! per-window metrics.
//!
//! ## Usage
//!
//! ```bash
//! # Run for 60 seconds against the system nginx and export to JSON
//! sudo ./request-probe --duration 60 --output request-metrics.json
//!
//! # Probe a different binary with 5 second windows
//! sudo ./request-probe --binary /opt/nginx/sbin/nginx --window-secs 5
//!
//! # Evict the oldest pending request instead of rejecting new ones
//! sudo ./request-probe --overflow-policy evict-oldest
//!
//! # Export to Prometheus format
//! sudo ./request-probe --format prometheus --output request-metrics.prom
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use probe_common::constants::*;
use request_probe::{
    channel::Backpressure,
    config::EngineConfig,
    events::EventProcessor,
    exporter::ExporterType,
    index::{DuplicatePolicy, OverflowPolicy},
    loader::{AttachResult, KernelStats, ProbeLoader},
    pipeline::Pipeline,
    stats::PipelineCounters,
    types::WindowMetrics,
    window::WindowAggregator,
};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::{
    signal,
    sync::{mpsc, watch},
    time::{sleep, Instant},
};

/// Request latency probe for nginx using eBPF
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Duration to run the probe (in seconds, 0 = infinite)
    #[clap(short, long, default_value_t = 60)]
    duration: u64,

    /// Output file for window metrics (rewritten every window)
    #[clap(short, long, default_value = "request-metrics.json")]
    output: PathBuf,

    /// Output format (json, prometheus)
    #[clap(short, long, default_value = "json")]
    format: String,

    /// Binary to attach the request uprobes to
    #[clap(short, long, default_value = DEFAULT_TARGET_BINARY)]
    binary: PathBuf,

    /// Verbose logging
    #[clap(short, long)]
    verbose: bool,

    /// Path to eBPF object file (if not embedded)
    #[clap(long)]
    ebpf_object: Option<PathBuf>,

    /// Progress reporting interval in seconds
    #[clap(long, default_value_t = 10)]
    progress_interval: u64,

    /// Aggregation window length in seconds
    #[clap(long, default_value_t = 10)]
    window_secs: u64,

    /// Identifier stamped on every window report
    #[clap(long, default_value = "request-probe-1")]
    agent_id: String,

    /// Maximum pending (started, not yet finished) requests
    #[clap(long, default_value_t = MAX_PENDING_REQUESTS as usize)]
    index_capacity: usize,

    /// What to do with a new request when the pending index is full (reject, evict-oldest)
    #[clap(long, default_value_t = OverflowPolicy::RejectNew)]
    overflow_policy: OverflowPolicy,

    /// What to do with a second start for a pending process (overwrite, keep-first)
    #[clap(long, default_value_t = DuplicatePolicy::Overwrite)]
    duplicate_policy: DuplicatePolicy,

    /// Maximum completed events awaiting the consumer
    #[clap(long, default_value_t = DEFAULT_COMPLETION_CAPACITY as usize)]
    channel_capacity: usize,

    /// Behaviour on a full completion channel (drop, wait:<ms>)
    #[clap(long, default_value_t = Backpressure::Drop)]
    backpressure: Backpressure,

    /// Maximum buffered connection samples
    #[clap(long, default_value_t = MAX_CONNECTION_SAMPLES as usize)]
    queue_capacity: usize,

    /// Maximum processes tracked in the running statistics
    #[clap(long, default_value_t = DEFAULT_AGGREGATE_KEYS as usize)]
    aggregate_capacity: usize,

    /// How often completed events are drained (milliseconds)
    #[clap(long, default_value_t = 100)]
    drain_interval_ms: u64,

    /// Latencies retained per window for percentiles
    #[clap(long, default_value_t = DEFAULT_WINDOW_SAMPLES as usize)]
    max_window_samples: usize,
}

impl Args {
    fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            index_capacity: self.index_capacity,
            overflow_policy: self.overflow_policy,
            duplicate_policy: self.duplicate_policy,
            queue_capacity: self.queue_capacity,
            channel_capacity: self.channel_capacity,
            backpressure: self.backpressure,
            aggregate_capacity: self.aggregate_capacity,
            window: Duration::from_secs(self.window_secs),
            max_window_samples: self.max_window_samples,
            drain_interval: Duration::from_millis(self.drain_interval_ms),
            agent_id: self.agent_id.clone(),
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    print_banner();

    let config = args.engine_config();
    config.validate().context("Invalid configuration")?;
    let export_format: ExporterType = args.format.parse()?;

    info!("Starting eBPF request probe...");
    info!(
        "   Duration: {} seconds",
        if args.duration == 0 {
            "infinite".to_string()
        } else {
            args.duration.to_string()
        }
    );
    info!("   Target: {:?}", args.binary);
    info!("   Output: {:?} ({:?})", args.output, export_format);
    info!("   Window: {:?}, agent: {}", config.window, config.agent_id);

    // Load and attach eBPF programs
    let mut loader = ProbeLoader::load(args.ebpf_object.clone())?;
    loader.attach_uprobes(&args.binary)?;
    if loader.attach_tracepoints()? == AttachResult::NotFound {
        warn!("Connection attempts will not be recorded");
    }

    let perf_array = loader.get_perf_array()?;

    info!("Collecting request latencies...");

    let pipeline = Arc::new(Pipeline::new(&config));
    log_pipeline(&pipeline);
    let processor = EventProcessor::new(Arc::clone(&pipeline), args.verbose);

    // Spawn per-CPU event readers
    processor.spawn_cpu_readers(perf_array)?;

    // Spawn progress reporter
    processor.spawn_progress_reporter(args.progress_interval);

    // Window reports flow through a small buffer to the exporter
    let (metrics_tx, mut metrics_rx) = mpsc::channel::<WindowMetrics>(config.metrics_buffer);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let window = WindowAggregator::new(
        config.window,
        config.agent_id.clone(),
        config.max_window_samples,
    );
    let consumer = processor.spawn_consumer(
        window,
        config.drain_interval,
        metrics_tx.clone(),
        shutdown_rx,
    );

    let exporter = export_format.build(args.output.clone());
    let export_task = tokio::spawn(async move {
        let mut exported = 0u64;
        let mut last = None;
        while let Some(metrics) = metrics_rx.recv().await {
            match exporter.export(&metrics) {
                Ok(()) => exported += 1,
                Err(e) => warn!("Failed to export window: {:#}", e),
            }
            last = Some(metrics);
        }
        (exported, last)
    });

    // Run for specified duration or until interrupted
    let start_time = Instant::now();
    if args.duration > 0 {
        tokio::select! {
            _ = sleep(Duration::from_secs(args.duration)) => {
                info!("Duration reached, shutting down...");
            }
            _ = signal::ctrl_c() => {
                info!("Interrupted, shutting down...");
            }
        }
    } else {
        signal::ctrl_c().await?;
        info!("Interrupted, shutting down...");
    }

    let elapsed = start_time.elapsed().as_secs();

    // Stop the consumer and flush the partial window
    shutdown_tx.send(true).ok();
    let mut window = consumer.await.context("Consumer task failed")?;
    if let Some(mut metrics) = window.rotate() {
        metrics.pipeline = pipeline.counters();
        metrics_tx
            .send(metrics)
            .await
            .context("Exporter stopped before the final window")?;
    }
    drop(metrics_tx);

    let (exported, last) = export_task.await.context("Exporter task failed")?;
    info!("{} window reports written to {:?}", exported, args.output);

    let kernel = match loader.kernel_stats() {
        Ok(stats) => Some(stats),
        Err(e) => {
            warn!("Could not read kernel statistics: {:#}", e);
            None
        }
    };

    print_summary(elapsed, &pipeline.counters(), kernel, last.as_ref());

    Ok(())
}

fn log_pipeline(pipeline: &Pipeline) {
    let correlator = pipeline.correlator();
    let index = correlator.index();
    info!(
        "   Pending index: {} ({}, {})",
        index.capacity(),
        index.overflow_policy(),
        index.duplicate_policy()
    );
    info!(
        "   Completion channel: {} ({})",
        correlator.channel().capacity(),
        correlator.channel().policy()
    );
    info!(
        "   Connection queue: {}, tracked processes: {}",
        pipeline.connections().capacity(),
        pipeline.aggregates().capacity()
    );
}

fn print_banner() {
    println!(
        r#"
╔═══════════════════════════════════════════════════╗
║        eBPF Request Probe - nginx latency         ║
║        start/end correlation and windows          ║
╚═══════════════════════════════════════════════════╝
    "#
    );
}

fn print_summary(
    elapsed: u64,
    counters: &PipelineCounters,
    kernel: Option<KernelStats>,
    last: Option<&WindowMetrics>,
) {
    info!("");
    info!("============================================");
    info!("             Summary Report");
    info!("============================================");
    info!("");
    info!("  Duration:           {} seconds", elapsed);
    info!("  Requests completed: {}", counters.completed);
    info!("  Still pending:      {}", counters.pending_starts);
    info!("");
    info!("  Correlation:");
    info!("    starts:             {:>10}", counters.starts);
    info!("    ends:               {:>10}", counters.ends);
    info!("    unmatched ends:     {:>10}", counters.unmatched_ends);
    info!("    index overflows:    {:>10}", counters.index_overflows);
    info!("    evicted starts:     {:>10}", counters.evicted_starts);
    info!("    overwritten starts: {:>10}", counters.overwritten_starts);
    info!("    retained starts:    {:>10}", counters.retained_starts);
    info!("    clock anomalies:    {:>10}", counters.clock_anomalies);
    info!("");
    info!("  Drops:");
    info!("    completion channel: {:>10}", counters.channel_drops);
    info!("    connection queue:   {:>10}", counters.queue_drops);
    info!("    malformed signals:  {:>10}", counters.malformed_signals);
    info!("    lost in kernel:     {:>10}", counters.lost_signals);

    if let Some(kernel) = kernel {
        info!("");
        info!("  Kernel signals:");
        info!("    total:              {:>10}", kernel.total);
        info!("    starts:             {:>10}", kernel.starts);
        info!("    ends:               {:>10}", kernel.ends);
        info!("    connects:           {:>10}", kernel.connects);
        info!("    skipped connects:   {:>10}", kernel.skipped_connects);
    }

    if let Some(metrics) = last {
        info!("");
        info!("  Last window ({} requests):", metrics.total_requests);
        info!("    avg:  {:>10.2} μs", metrics.avg_latency_us);
        info!("    p50:  {:>10} μs", metrics.percentiles.p50);
        info!("    p90:  {:>10} μs", metrics.percentiles.p90);
        info!("    p99:  {:>10} μs", metrics.percentiles.p99);
        info!("    p999: {:>10} μs", metrics.percentiles.p999);
        info!("    max:  {:>10} μs", metrics.max_latency_us);
    }
    info!("");
    info!("============================================");
}

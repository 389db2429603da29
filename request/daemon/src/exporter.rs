//! Metrics exporters
//!
//! Writes window metrics to a file as JSON or Prometheus text format. The
//! file always holds the latest window.

use crate::types::WindowMetrics;
use anyhow::{bail, Context, Result};
use std::{
    fs::File,
    io::Write,
    path::{Path, PathBuf},
    str::FromStr,
};

/// Trait for metrics exporters
pub trait MetricsExporter {
    /// Export one window's metrics
    fn export(&self, metrics: &WindowMetrics) -> Result<()>;
}

/// Export format type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExporterType {
    /// JSON format
    Json,
    /// Prometheus text format
    Prometheus,
}

impl FromStr for ExporterType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(ExporterType::Json),
            "prometheus" | "prom" => Ok(ExporterType::Prometheus),
            _ => bail!("Unsupported format: {}. Use json or prometheus", s),
        }
    }
}

impl ExporterType {
    /// Build the exporter for this format writing to `output_path`
    pub fn build(self, output_path: PathBuf) -> Box<dyn MetricsExporter + Send> {
        match self {
            ExporterType::Json => Box::new(JsonExporter::new(output_path, true)),
            ExporterType::Prometheus => Box::new(PrometheusExporter::new(output_path)),
        }
    }
}

fn write_file(path: &Path, data: &str) -> Result<()> {
    let mut file = File::create(path)
        .with_context(|| format!("Failed to create output file: {:?}", path))?;

    file.write_all(data.as_bytes())
        .with_context(|| format!("Failed to write to output file: {:?}", path))?;

    Ok(())
}

/// JSON exporter
pub struct JsonExporter {
    output_path: PathBuf,
    pretty: bool,
}

impl JsonExporter {
    /// Create a new JSON exporter
    ///
    /// # Arguments
    ///
    /// * `output_path` - Path to output file
    /// * `pretty` - Enable pretty-printing
    pub fn new(output_path: PathBuf, pretty: bool) -> Self {
        Self {
            output_path,
            pretty,
        }
    }
}

impl MetricsExporter for JsonExporter {
    fn export(&self, metrics: &WindowMetrics) -> Result<()> {
        let json = if self.pretty {
            serde_json::to_string_pretty(metrics)?
        } else {
            serde_json::to_string(metrics)?
        };

        write_file(&self.output_path, &json)
    }
}

/// Prometheus exporter
pub struct PrometheusExporter {
    output_path: PathBuf,
}

impl PrometheusExporter {
    pub fn new(output_path: PathBuf) -> Self {
        Self { output_path }
    }

    fn header(output: &mut String, name: &str, help: &str, kind: &str) {
        output.push_str(&format!("# HELP request_probe_{} {}\n", name, help));
        output.push_str(&format!("# TYPE request_probe_{} {}\n", name, kind));
    }

    /// Convert metrics to Prometheus format
    fn to_prometheus_format(metrics: &WindowMetrics) -> String {
        let mut output = String::new();
        let agent = format!("agent=\"{}\"", metrics.agent_id);

        Self::header(&mut output, "requests_total", "Completed requests in the window", "gauge");
        output.push_str(&format!("request_probe_requests_total{{{}}} {}\n", agent, metrics.total_requests));
        output.push('\n');

        Self::header(&mut output, "window_start_seconds", "Start of the reported window", "gauge");
        output.push_str(&format!(
            "request_probe_window_start_seconds{{{}}} {}\n",
            agent,
            metrics.window_start / 1_000_000_000
        ));
        output.push('\n');

        Self::header(&mut output, "latency_microseconds", "Request latency in microseconds", "gauge");
        let stats = [
            ("avg", metrics.avg_latency_us),
            ("min", metrics.min_latency_us as f64),
            ("max", metrics.max_latency_us as f64),
        ];
        for (stat, value) in stats {
            output.push_str(&format!(
                "request_probe_latency_microseconds{{{},stat=\"{}\"}} {}\n",
                agent, stat, value
            ));
        }
        let p = &metrics.percentiles;
        let quantiles = [
            ("0.5", p.p50),
            ("0.75", p.p75),
            ("0.9", p.p90),
            ("0.95", p.p95),
            ("0.99", p.p99),
            ("0.999", p.p999),
        ];
        for (quantile, value) in quantiles {
            output.push_str(&format!(
                "request_probe_latency_microseconds{{{},quantile=\"{}\"}} {}\n",
                agent, quantile, value
            ));
        }
        output.push('\n');

        // Buckets are cumulative in the exposition format
        Self::header(&mut output, "latency_histogram", "Request latency histogram in microseconds", "histogram");
        let h = &metrics.histogram;
        let buckets = [
            ("1000", h.bucket_0_1ms),
            ("5000", h.bucket_1_5ms),
            ("10000", h.bucket_5_10ms),
            ("50000", h.bucket_10_50ms),
            ("100000", h.bucket_50_100ms),
            ("+Inf", h.bucket_100ms_plus),
        ];
        let mut cumulative = 0;
        for (le, count) in buckets {
            cumulative += count;
            output.push_str(&format!(
                "request_probe_latency_histogram_bucket{{{},le=\"{}\"}} {}\n",
                agent, le, cumulative
            ));
        }
        output.push_str(&format!(
            "request_probe_latency_histogram_sum{{{}}} {}\n",
            agent,
            metrics.avg_latency_us * metrics.total_requests as f64
        ));
        output.push_str(&format!(
            "request_probe_latency_histogram_count{{{}}} {}\n",
            agent, cumulative
        ));
        output.push('\n');

        Self::header(&mut output, "process_requests", "Completed requests per process", "gauge");
        for (pid, count) in &metrics.process_breakdown {
            output.push_str(&format!(
                "request_probe_process_requests{{{},pid=\"{}\"}} {}\n",
                agent, pid, count
            ));
        }
        output.push('\n');

        Self::header(&mut output, "connection_attempts", "Outbound connection attempts per port", "gauge");
        for (port, count) in &metrics.connection_attempts {
            output.push_str(&format!(
                "request_probe_connection_attempts{{{},port=\"{}\"}} {}\n",
                agent, port, count
            ));
        }
        output.push('\n');

        Self::header(&mut output, "pipeline_events_total", "Correlation pipeline counters since start", "counter");
        let c = &metrics.pipeline;
        let counters = [
            ("starts", c.starts),
            ("ends", c.ends),
            ("completed", c.completed),
            ("unmatched_ends", c.unmatched_ends),
            ("index_overflows", c.index_overflows),
            ("evicted_starts", c.evicted_starts),
            ("overwritten_starts", c.overwritten_starts),
            ("retained_starts", c.retained_starts),
            ("clock_anomalies", c.clock_anomalies),
            ("channel_drops", c.channel_drops),
            ("queue_drops", c.queue_drops),
            ("malformed_signals", c.malformed_signals),
            ("lost_signals", c.lost_signals),
        ];
        for (kind, value) in counters {
            output.push_str(&format!(
                "request_probe_pipeline_events_total{{{},kind=\"{}\"}} {}\n",
                agent, kind, value
            ));
        }
        output.push('\n');

        Self::header(&mut output, "pending_starts", "Starts awaiting their end", "gauge");
        output.push_str(&format!("request_probe_pending_starts{{{}}} {}\n", agent, c.pending_starts));

        output
    }
}

impl MetricsExporter for PrometheusExporter {
    fn export(&self, metrics: &WindowMetrics) -> Result<()> {
        write_file(&self.output_path, &Self::to_prometheus_format(metrics))
    }
}

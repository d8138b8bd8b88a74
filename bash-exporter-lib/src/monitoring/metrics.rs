//! Self-observability metrics for the exporter
//!
//! These describe the engine itself: how often it is scraped, how long that
//! takes, how the result cache behaves, how reloads go and how many commands
//! run at once. They live in their own registry, constructed once at startup
//! and shared by reference, and are exposed next to the extracted metrics.

use crate::error::{ExporterError, Result};
use prometheus::proto::MetricFamily;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, HistogramTimer, HistogramVec,
    Opts, Registry, TextEncoder,
};
use tracing::debug;

/// Content type of the text exposition format
pub const TEXT_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Registry of the exporter's own counters, gauges and histograms
#[derive(Clone)]
pub struct ExporterMetrics {
    registry: Registry,

    /// Number of scrapes served
    pub scrapes: Counter,

    /// Time taken by each scrape
    pub scrape_duration: Histogram,

    /// Failed command executions by metric name
    pub command_errors: CounterVec,

    pub cache_hits: Counter,
    pub cache_misses: Counter,

    /// Successful configuration reloads
    pub config_reloads: Counter,

    /// Rejected configuration reloads
    pub config_reload_errors: Counter,

    /// Execution time of each command by metric name
    pub command_duration: HistogramVec,

    /// Commands running right now
    pub concurrent_commands: Gauge,
}

impl ExporterMetrics {
    /// Create and register all exporter metrics in a fresh registry
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let scrapes = Counter::with_opts(Opts::new(
            "bash_exporter_scrapes_total",
            "Number of metrics scrapes.",
        ))?;
        let scrape_duration = Histogram::with_opts(HistogramOpts::new(
            "bash_exporter_scrape_duration_seconds",
            "Time taken to collect all configured metrics.",
        ))?;
        let command_errors = CounterVec::new(
            Opts::new(
                "bash_exporter_command_errors_total",
                "Number of command errors.",
            ),
            &["metric_name"],
        )?;
        let cache_hits = Counter::with_opts(Opts::new(
            "bash_exporter_cache_hits_total",
            "Number of cache hits.",
        ))?;
        let cache_misses = Counter::with_opts(Opts::new(
            "bash_exporter_cache_misses_total",
            "Number of cache misses.",
        ))?;
        let config_reloads = Counter::with_opts(Opts::new(
            "bash_exporter_config_reloads_total",
            "Number of successful config reloads.",
        ))?;
        let config_reload_errors = Counter::with_opts(Opts::new(
            "bash_exporter_config_reload_errors_total",
            "Number of failed config reloads.",
        ))?;
        let command_duration = HistogramVec::new(
            HistogramOpts::new(
                "bash_exporter_command_duration_seconds",
                "Duration of each command execution.",
            ),
            &["metric_name"],
        )?;
        let concurrent_commands = Gauge::with_opts(Opts::new(
            "bash_exporter_concurrent_commands",
            "Number of concurrently running commands.",
        ))?;

        registry.register(Box::new(scrapes.clone()))?;
        registry.register(Box::new(scrape_duration.clone()))?;
        registry.register(Box::new(command_errors.clone()))?;
        registry.register(Box::new(cache_hits.clone()))?;
        registry.register(Box::new(cache_misses.clone()))?;
        registry.register(Box::new(config_reloads.clone()))?;
        registry.register(Box::new(config_reload_errors.clone()))?;
        registry.register(Box::new(command_duration.clone()))?;
        registry.register(Box::new(concurrent_commands.clone()))?;

        debug!("All exporter metrics registered successfully");

        Ok(Self {
            registry,
            scrapes,
            scrape_duration,
            command_errors,
            cache_hits,
            cache_misses,
            config_reloads,
            config_reload_errors,
            command_duration,
            concurrent_commands,
        })
    }

    /// Snapshot of every exporter metric family
    pub fn gather(&self) -> Vec<MetricFamily> {
        self.registry.gather()
    }

    /// Count a scrape and time it until the returned timer drops
    pub fn start_scrape(&self) -> HistogramTimer {
        self.scrapes.inc();
        self.scrape_duration.start_timer()
    }

    /// Count a failed command for `metric_name`
    pub fn record_command_error(&self, metric_name: &str) {
        self.command_errors.with_label_values(&[metric_name]).inc();
    }

    /// Mark one command as running until the guard drops
    pub fn track_command(&self, metric_name: &str) -> CommandGuard {
        self.concurrent_commands.inc();
        CommandGuard {
            gauge: self.concurrent_commands.clone(),
            _timer: self
                .command_duration
                .with_label_values(&[metric_name])
                .start_timer(),
        }
    }
}

impl std::fmt::Debug for ExporterMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExporterMetrics")
            .field("scrapes", &self.scrapes.get())
            .field("concurrent_commands", &self.concurrent_commands.get())
            .finish_non_exhaustive()
    }
}

/// Keeps the in-flight gauge raised and the duration timer running for one
/// command execution
#[must_use = "dropping the guard immediately ends the measurement"]
pub struct CommandGuard {
    gauge: Gauge,
    _timer: HistogramTimer,
}

impl Drop for CommandGuard {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}

/// Render metric families in the text exposition format
pub fn encode_families(families: &[MetricFamily]) -> Result<String> {
    let encoder = TextEncoder::new();
    let mut output = Vec::new();
    encoder.encode(families, &mut output)?;
    String::from_utf8(output).map_err(|e| ExporterError::server(e.to_string()))
}

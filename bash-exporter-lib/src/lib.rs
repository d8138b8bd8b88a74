//! # Bash Exporter Library
//!
//! A command-driven Prometheus exporter. Operators describe shell commands in
//! a YAML file; on every scrape the exporter runs them (bounded concurrency,
//! per-command timeouts, a result cache in front), parses their text output
//! into labeled gauges and counters and serves them over HTTP together with
//! its own health metrics.
//!
//! ## Features
//!
//! - Simple metrics (one family per command) and compound metrics (one
//!   command fanned out into several filtered families)
//! - Static and dynamic labels taken from output fields
//! - Command blacklist, per-metric timeout, cache TTL and shell overrides
//! - Hot reload over HTTP (`/reload`) or SIGHUP without restarting
//! - Async/await support with Tokio
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use bash_exporter_lib::{load_config, run_exporter};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = load_config("configs/config.yaml")?;
//!     run_exporter("configs/config.yaml", config).await?;
//!     Ok(())
//! }
//! ```

// Core modules
pub mod app;
pub mod config;
pub mod duration;
pub mod error;
pub mod loader;
pub mod validation;

// Extraction engine
pub mod cache;
pub mod collector;
pub mod executor;
pub mod pipeline;
pub mod sample;

// Monitoring and metrics
pub mod monitoring;

// Public API exports
pub use app::{run_exporter, ExporterApp};
pub use cache::{cache_key, ResultCache};
pub use collector::CommandCollector;
pub use config::{Config, ConfigBuilder, GlobalSpec, MetricSpec, PostfixMetricSpec};
pub use error::{CommandError, ExporterError, ValidationError};
pub use executor::{CommandResult, CommandRunner, ShellRunner};
pub use loader::{load_config, ConfigSource, FileConfigSource, CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH};
pub use monitoring::{ExporterMetrics, MetricsServer, MetricsServerConfig};
pub use sample::{Sample, ValueKind};

pub type ExporterResult<T> = Result<T, ExporterError>;

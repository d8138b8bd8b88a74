//! Monitoring and Metrics Module
//!
//! The exporter's own metrics registry and the HTTP server that exposes it
//! alongside the command-driven metrics.

pub mod metrics;
pub mod metrics_server;

pub use metrics::{encode_families, CommandGuard, ExporterMetrics, TEXT_CONTENT_TYPE};
pub use metrics_server::{route, MetricsServer, MetricsServerConfig, ServerState};

//! Exporter Application Runner
//!
//! This module wires the shared pieces together (self metrics, result cache,
//! shell runner, collector and HTTP server) and drives them until a shutdown
//! signal arrives. SIGHUP reloads the configuration in place.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::cache::{ResultCache, DEFAULT_SWEEP_INTERVAL};
use crate::collector::CommandCollector;
use crate::config::Config;
use crate::executor::ShellRunner;
use crate::loader::FileConfigSource;
use crate::monitoring::{ExporterMetrics, MetricsServer, MetricsServerConfig};
use crate::ExporterResult;

/// High-level exporter application
///
/// Owns every long-lived component. Dropping it without calling [`run`]
/// starts nothing.
///
/// [`run`]: ExporterApp::run
pub struct ExporterApp {
    collector: Arc<CommandCollector>,
    cache: Arc<ResultCache>,
    server: MetricsServer,
    shutdown: CancellationToken,
}

impl ExporterApp {
    /// Build the application from an already validated configuration.
    ///
    /// `config_path` is where reloads read the next snapshot from.
    pub fn new<P: Into<PathBuf>>(config_path: P, config: Config) -> ExporterResult<Self> {
        let shutdown = CancellationToken::new();
        let metrics = Arc::new(ExporterMetrics::new()?);
        let cache = Arc::new(ResultCache::new());
        let runner = Arc::new(ShellRunner::with_cancellation(shutdown.clone()));
        let source = Arc::new(FileConfigSource::new(config_path));
        let server_config = MetricsServerConfig::from(&config.server);

        let collector = Arc::new(CommandCollector::new(
            config,
            source,
            runner,
            Arc::clone(&cache),
            metrics,
        ));
        let server = MetricsServer::new(server_config, Arc::clone(&collector));

        Ok(Self {
            collector,
            cache,
            server,
            shutdown,
        })
    }

    /// Get access to the collector (for advanced use cases)
    pub fn collector(&self) -> &Arc<CommandCollector> {
        &self.collector
    }

    /// Token that stops the application when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Serve until SIGTERM/SIGINT or until the token is cancelled
    pub async fn run(self) -> ExporterResult<()> {
        log_families(&self.collector).await;

        let sweeper = self
            .cache
            .spawn_sweeper(DEFAULT_SWEEP_INTERVAL, self.shutdown.clone());
        let shutdown_token = self.shutdown.clone();
        let shutdown_handler = tokio::spawn(async move {
            if let Err(e) = setup_shutdown_handler(shutdown_token).await {
                tracing::error!("Failed to install shutdown signal handlers: {}", e);
            }
        });
        let reload_handler = tokio::spawn(setup_reload_handler(
            Arc::clone(&self.collector),
            self.shutdown.clone(),
        ));

        tracing::info!(
            "Starting bash exporter on {}",
            self.server.config().bind_address
        );
        let result = self.server.start(self.shutdown.clone()).await;
        if let Err(e) = &result {
            tracing::error!("Metrics server failed: {}", e);
        }

        self.shutdown.cancel();
        shutdown_handler.abort();
        if let Err(e) = reload_handler.await {
            tracing::warn!("Reload handler task failed: {}", e);
        }
        if let Err(e) = sweeper.await {
            tracing::warn!("Cache sweeper task failed: {}", e);
        }

        tracing::info!("Bash exporter stopped");
        result
    }
}

/// High-level convenience function to run the exporter with a configuration
/// loaded from `config_path`
pub async fn run_exporter<P: Into<PathBuf>>(config_path: P, config: Config) -> ExporterResult<()> {
    let app = ExporterApp::new(config_path, config)?;
    app.run().await
}

async fn log_families(collector: &CommandCollector) {
    let descs = collector.describe().await;
    tracing::info!("Exporting {} metric families", descs.len());
    for desc in &descs {
        tracing::debug!("Metric family {}: {}", desc.fq_name, desc.help);
    }
}

/// Reload the configuration on every SIGHUP until shutdown
#[cfg(unix)]
async fn setup_reload_handler(collector: Arc<CommandCollector>, shutdown: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sighup = match signal(SignalKind::hangup()) {
        Ok(sighup) => sighup,
        Err(e) => {
            tracing::error!("Failed to install SIGHUP handler: {}", e);
            return;
        }
    };

    loop {
        tokio::select! {
            received = sighup.recv() => {
                if received.is_none() {
                    break;
                }
                tracing::info!("Received SIGHUP, attempting to reload config");
                match collector.reload_config().await {
                    Ok(()) => log_families(&collector).await,
                    Err(e) => tracing::error!("Config reload failed: {}", e),
                }
            }
            _ = shutdown.cancelled() => break,
        }
    }
}

#[cfg(not(unix))]
async fn setup_reload_handler(_collector: Arc<CommandCollector>, shutdown: CancellationToken) {
    shutdown.cancelled().await;
}

/// Set up graceful shutdown signal handling
///
/// Cancels `shutdown_token` on SIGTERM or SIGINT (Ctrl+C on Windows).
async fn setup_shutdown_handler(shutdown_token: CancellationToken) -> ExporterResult<()> {
    use tokio::signal;

    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
            }
        }
    }

    #[cfg(windows)]
    {
        signal::ctrl_c().await?;
        tracing::info!("Received Ctrl+C, initiating graceful shutdown");
    }

    shutdown_token.cancel();
    Ok(())
}

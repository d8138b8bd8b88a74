//! Scrape orchestration and configuration hot-reload
//!
//! [`CommandCollector`] owns the current [`Config`] snapshot. A scrape holds
//! the read lock from start to finish and fans out one job per metric through
//! a semaphore shared by every scrape of that snapshot; a reload builds the
//! replacement first and then swaps it in under the write lock, so it waits
//! for in-flight scrapes and never exposes a half-replaced snapshot.

use crate::cache::ResultCache;
use crate::config::{Config, Labels, MetricSpec};
use crate::error::Result;
use crate::executor::CommandRunner;
use crate::loader::ConfigSource;
use crate::monitoring::ExporterMetrics;
use crate::pipeline::{merge_labels, Extractor};
use crate::sample::{into_metric_families, Sample};
use prometheus::core::Desc;
use prometheus::proto::MetricFamily;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

/// A config version and the job permits sized from it
struct Snapshot {
    config: Arc<Config>,
    permits: Arc<Semaphore>,
}

impl Snapshot {
    fn new(config: Config) -> Self {
        let permits = Arc::new(Semaphore::new(config.global.effective_max_concurrent()));
        Self {
            config: Arc::new(config),
            permits,
        }
    }
}

/// Command-driven collector backing the exposition endpoint
pub struct CommandCollector {
    snapshot: RwLock<Snapshot>,
    source: Arc<dyn ConfigSource>,
    extractor: Extractor,
    metrics: Arc<ExporterMetrics>,
}

impl CommandCollector {
    pub fn new(
        config: Config,
        source: Arc<dyn ConfigSource>,
        runner: Arc<dyn CommandRunner>,
        cache: Arc<ResultCache>,
        metrics: Arc<ExporterMetrics>,
    ) -> Self {
        Self {
            snapshot: RwLock::new(Snapshot::new(config)),
            source,
            extractor: Extractor::new(runner, cache, Arc::clone(&metrics)),
            metrics,
        }
    }

    /// The snapshot scrapes currently run against
    pub async fn current_config(&self) -> Arc<Config> {
        Arc::clone(&self.snapshot.read().await.config)
    }

    pub fn metrics(&self) -> &Arc<ExporterMetrics> {
        &self.metrics
    }

    /// Run every configured metric and return the resulting families.
    ///
    /// Returns once every admitted job has finished. A failing metric is
    /// simply absent from the result.
    pub async fn collect(&self) -> Vec<MetricFamily> {
        let snapshot = self.snapshot.read().await;
        let _timer = self.metrics.start_scrape();
        info!("Metrics collection started");

        let config = Arc::clone(&snapshot.config);
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<Sample>>();
        let mut jobs = JoinSet::new();

        for index in 0..config.metrics.len() {
            let permit = match Arc::clone(&snapshot.permits).acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!("Job admission closed: {}", e);
                    break;
                }
            };
            let config = Arc::clone(&config);
            let extractor = self.extractor.clone();
            let tx = tx.clone();

            jobs.spawn(async move {
                let _permit = permit;
                let spec = &config.metrics[index];
                let samples = extractor.extract(spec, &config.global).await;
                debug!("Metric {} produced {} samples", spec.name, samples.len());
                // receiver outlives every job
                let _ = tx.send(samples);
            });
        }
        drop(tx);

        while let Some(joined) = jobs.join_next().await {
            if let Err(e) = joined {
                error!("Metric job failed: {}", e);
            }
        }

        let mut samples = Vec::new();
        while let Some(batch) = rx.recv().await {
            samples.extend(batch);
        }

        let families = into_metric_families(samples);
        info!("Metrics collection finished: {} families", families.len());
        drop(snapshot);
        families
    }

    /// Descriptors of every family the current snapshot can produce.
    ///
    /// Descriptors that cannot be built are logged and left out.
    pub async fn describe(&self) -> Vec<Desc> {
        let config = self.current_config().await;
        let mut descs = Vec::new();

        for metric in &config.metrics {
            for (name, help, dynamic, labels) in family_shapes(metric) {
                let const_labels: HashMap<String, String> = labels.into_iter().collect();
                match Desc::new(name.clone(), help, dynamic, const_labels) {
                    Ok(desc) => descs.push(desc),
                    Err(e) => error!("Failed to describe {}: {}", name, e),
                }
            }
        }
        descs
    }

    /// Load a fresh snapshot and make it current.
    ///
    /// On failure the current snapshot stays in place and the error is
    /// returned to the caller.
    pub async fn reload_config(&self) -> Result<()> {
        info!("Reloading configuration from {}", self.source.describe());

        let fresh = match self.source.load().await {
            Ok(config) => config,
            Err(e) => {
                self.metrics.config_reload_errors.inc();
                error!("Config reload failed, keeping current configuration: {}", e);
                return Err(e);
            }
        };

        let metric_count = fresh.metrics.len();
        let fresh = Snapshot::new(fresh);
        {
            let mut current = self.snapshot.write().await;
            *current = fresh;
        }
        self.metrics.config_reloads.inc();
        info!("Configuration reloaded: {} metrics", metric_count);
        Ok(())
    }
}

type FamilyShape = (String, String, Vec<String>, Labels);

/// Name, help, dynamic label names and constant labels of each family
fn family_shapes(metric: &MetricSpec) -> Vec<FamilyShape> {
    if !metric.is_compound() {
        return vec![(
            metric.name.clone(),
            metric.help.clone(),
            metric.dynamic_labels.iter().map(|l| l.name.clone()).collect(),
            metric.labels.clone(),
        )];
    }
    metric
        .postfix_metrics
        .iter()
        .map(|postfix| {
            (
                postfix.full_name(&metric.name),
                postfix.help.clone(),
                postfix.dynamic_labels.iter().map(|l| l.name.clone()).collect(),
                merge_labels(&metric.labels, &postfix.labels),
            )
        })
        .collect()
}

impl std::fmt::Debug for CommandCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandCollector")
            .field("source", &self.source.describe())
            .finish_non_exhaustive()
    }
}

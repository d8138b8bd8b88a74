//! Shared test utilities for bash-exporter-lib integration tests.
//!
//! Provides a scriptable [`CommandRunner`] that records every call and the
//! concurrency it observed, an in-memory [`ConfigSource`] and helpers for
//! reading metric families.
#![allow(dead_code)]

use async_trait::async_trait;
use bash_exporter_lib::error::Result;
use bash_exporter_lib::{
    CommandCollector, CommandError, CommandResult, CommandRunner, Config, ConfigSource,
    ExporterMetrics, ResultCache, ValidationError,
};
use prometheus::proto::MetricFamily;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

/// One recorded runner invocation
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerCall {
    pub shell: String,
    pub command: String,
    pub timeout: Duration,
}

/// Scriptable runner; unknown commands fail with an execution error
#[derive(Default)]
pub struct MockRunner {
    responses: Mutex<HashMap<String, CommandResult>>,
    calls: Mutex<Vec<RunnerCall>>,
    delay: Duration,
    gate: Option<Semaphore>,
    metrics: Option<Arc<ExporterMetrics>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    peak_gauge: Mutex<f64>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every run sleeps for `delay` before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Every run waits until [`MockRunner::open_gate`] releases it
    pub fn gated(mut self) -> Self {
        self.gate = Some(Semaphore::new(0));
        self
    }

    /// Sample the in-flight gauge of `metrics` while commands run
    pub fn observing(mut self, metrics: Arc<ExporterMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn respond(self, command: &str, outcome: CommandResult) -> Self {
        self.set_response(command, outcome);
        self
    }

    pub fn set_response(&self, command: &str, outcome: CommandResult) {
        self.responses
            .lock()
            .unwrap()
            .insert(command.to_string(), outcome);
    }

    pub fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1024);
        }
    }

    pub fn calls(&self) -> Vec<RunnerCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_for(&self, command: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.command == command)
            .count()
    }

    /// Highest number of simultaneous runs seen
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Highest value of the in-flight gauge seen during runs
    pub fn peak_gauge(&self) -> f64 {
        *self.peak_gauge.lock().unwrap()
    }

    /// Wait until at least `n` runs have started
    pub async fn wait_for_calls(&self, n: usize) {
        for _ in 0..500 {
            if self.call_count() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {} runner calls, saw {}", n, self.call_count());
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(&self, shell: &str, command: &str, timeout: Duration) -> CommandResult {
        self.calls.lock().unwrap().push(RunnerCall {
            shell: shell.to_string(),
            command: command.to_string(),
            timeout,
        });

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Some(metrics) = &self.metrics {
            let gauge = metrics.concurrent_commands.get();
            let mut peak = self.peak_gauge.lock().unwrap();
            if gauge > *peak {
                *peak = gauge;
            }
        }

        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.responses
            .lock()
            .unwrap()
            .get(command)
            .cloned()
            .unwrap_or_else(|| Err(CommandError::execution("exit status: 127", "command not found")))
    }
}

/// Config source whose next snapshot is set by the test
pub struct MemoryConfigSource {
    next: Mutex<std::result::Result<Config, String>>,
}

impl MemoryConfigSource {
    pub fn new(config: Config) -> Self {
        Self {
            next: Mutex::new(Ok(config)),
        }
    }

    pub fn set(&self, config: Config) {
        *self.next.lock().unwrap() = Ok(config);
    }

    /// Make the next load fail validation with `problem`
    pub fn fail(&self, problem: &str) {
        *self.next.lock().unwrap() = Err(problem.to_string());
    }
}

#[async_trait]
impl ConfigSource for MemoryConfigSource {
    async fn load(&self) -> Result<Config> {
        match &*self.next.lock().unwrap() {
            Ok(config) => Ok(config.clone()),
            Err(problem) => Err(ValidationError::new(vec![problem.clone()]).into()),
        }
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// Everything a collector test needs to poke at
pub struct Harness {
    pub collector: Arc<CommandCollector>,
    pub runner: Arc<MockRunner>,
    pub source: Arc<MemoryConfigSource>,
    pub cache: Arc<ResultCache>,
    pub metrics: Arc<ExporterMetrics>,
}

/// Build a collector around `config` with a runner configured by `runner`
pub fn harness<F>(config: Config, runner: F) -> Harness
where
    F: FnOnce(MockRunner) -> MockRunner,
{
    let metrics = Arc::new(ExporterMetrics::new().unwrap());
    let runner = Arc::new(runner(MockRunner::new().observing(Arc::clone(&metrics))));
    let source = Arc::new(MemoryConfigSource::new(config.clone()));
    let cache = Arc::new(ResultCache::new());
    let collector = Arc::new(CommandCollector::new(
        config,
        source.clone(),
        runner.clone(),
        Arc::clone(&cache),
        Arc::clone(&metrics),
    ));
    Harness {
        collector,
        runner,
        source,
        cache,
        metrics,
    }
}

pub fn find<'a>(families: &'a [MetricFamily], name: &str) -> Option<&'a MetricFamily> {
    families.iter().find(|f| f.get_name() == name)
}

pub fn family_names(families: &[MetricFamily]) -> Vec<String> {
    families.iter().map(|f| f.get_name().to_string()).collect()
}

/// Gauge or counter value of the only metric in `family`
pub fn single_value(family: &MetricFamily) -> f64 {
    assert_eq!(family.get_metric().len(), 1, "family {}", family.get_name());
    value_of(&family.get_metric()[0])
}

pub fn value_of(metric: &prometheus::proto::Metric) -> f64 {
    if metric.has_counter() {
        metric.get_counter().get_value()
    } else {
        metric.get_gauge().get_value()
    }
}

/// Command errors recorded for `metric_name`, read without creating a series
pub fn command_errors(metrics: &ExporterMetrics, metric_name: &str) -> f64 {
    metrics
        .gather()
        .iter()
        .filter(|f| f.get_name() == "bash_exporter_command_errors_total")
        .flat_map(|f| f.get_metric())
        .filter(|m| label(m, "metric_name") == Some(metric_name))
        .map(|m| m.get_counter().get_value())
        .sum()
}

/// Value of the label `name` on `metric`
pub fn label<'a>(metric: &'a prometheus::proto::Metric, name: &str) -> Option<&'a str> {
    metric
        .get_label()
        .iter()
        .find(|l| l.get_name() == name)
        .map(|l| l.get_value())
}

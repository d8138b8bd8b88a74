//! Extraction pipeline: command output lines to typed, labeled samples
//!
//! [`Extractor::resolve_output`] decides whether a command may run, serves it
//! from the result cache when possible and otherwise runs it through the
//! [`CommandRunner`]. [`collect_simple`] and [`collect_compound`] turn the
//! resulting lines into [`Sample`]s. Every per-line problem is logged and
//! skipped so one bad line never costs its siblings.

use crate::cache::{cache_key, ResultCache};
use crate::config::{DynamicLabelSpec, GlobalSpec, Labels, MetricSpec, PostfixMetricSpec};
use crate::error::{ExporterError, Result};
use crate::executor::CommandRunner;
use crate::monitoring::ExporterMetrics;
use crate::sample::{Sample, ValueKind};
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Everything a scrape job needs to turn one configured metric into samples
#[derive(Clone)]
pub struct Extractor {
    runner: Arc<dyn CommandRunner>,
    cache: Arc<ResultCache>,
    metrics: Arc<ExporterMetrics>,
}

impl Extractor {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        cache: Arc<ResultCache>,
        metrics: Arc<ExporterMetrics>,
    ) -> Self {
        Self {
            runner,
            cache,
            metrics,
        }
    }

    /// Produce the command output lines for one metric.
    ///
    /// Blacklisted commands fail before the cache or the runner is touched.
    /// A cached outcome, failed or not, is returned without running anything.
    pub async fn resolve_output(&self, spec: &MetricSpec, global: &GlobalSpec) -> Result<Vec<String>> {
        if is_blacklisted(spec, global) {
            self.metrics.record_command_error(&spec.name);
            return Err(ExporterError::blacklisted(&spec.name, &spec.command));
        }

        let key = cache_key(&spec.name, &spec.command);
        if let Some(outcome) = self.cache.get(&key) {
            self.metrics.cache_hits.inc();
            debug!("Cache hit for metric {}", spec.name);
            return Ok(split_lines(&outcome?));
        }
        self.metrics.cache_misses.inc();

        let timeout = spec.effective_timeout(global);
        let ttl = spec.effective_cache_ttl(global);
        let shell = spec.effective_shell(global);

        let outcome = {
            let _guard = self.metrics.track_command(&spec.name);
            self.runner.run(shell, &spec.command, timeout).await
        };
        self.cache.set(&key, outcome.clone(), ttl);

        match outcome {
            Ok(output) => Ok(split_lines(&output)),
            Err(e) => {
                self.metrics.record_command_error(&spec.name);
                Err(e.into())
            }
        }
    }

    /// Resolve and parse one metric; failures are logged, never propagated
    pub async fn extract(&self, spec: &MetricSpec, global: &GlobalSpec) -> Vec<Sample> {
        let lines = match self.resolve_output(spec, global).await {
            Ok(lines) => lines,
            Err(e) => {
                error!("Failed to execute command for metric {}: {}", spec.name, e);
                return Vec::new();
            }
        };

        if spec.is_compound() {
            collect_compound(spec, &lines)
        } else {
            match collect_simple(spec, &lines) {
                Ok(samples) => samples,
                Err(e) => {
                    error!("Skipping metric {}: {}", spec.name, e);
                    Vec::new()
                }
            }
        }
    }
}

/// Whether the first token of the command is blacklisted for this metric
pub fn is_blacklisted(spec: &MetricSpec, global: &GlobalSpec) -> bool {
    if spec.ignore_blacklist {
        return false;
    }
    spec.executable()
        .map(|exe| global.is_blacklisted(exe))
        .unwrap_or(false)
}

/// Newline-delimited, individually trimmed, non-empty lines
pub fn split_lines(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// One sample per output line of a simple metric.
///
/// Lines that are too short or whose value does not parse are skipped. An
/// unsupported value type fails the whole metric.
pub fn collect_simple(spec: &MetricSpec, lines: &[String]) -> Result<Vec<Sample>> {
    let kind: ValueKind = spec.value_type.parse()?;
    let mut samples = Vec::with_capacity(lines.len());

    for line in lines {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let value = match extract_value(&fields, spec.field, line) {
            Ok(value) => value,
            Err(e) => {
                warn!("Metric {}: {}", spec.name, e);
                continue;
            }
        };

        match build_labels(&spec.labels, &spec.dynamic_labels, &fields) {
            Ok(labels) => samples.push(Sample {
                name: spec.name.clone(),
                help: spec.help.clone(),
                kind,
                labels,
                value,
            }),
            Err(e) => warn!("Metric {}: {}", spec.name, e),
        }
    }

    Ok(samples)
}

/// Fan one command output out into every postfix family of a compound metric.
///
/// Each postfix metric filters lines independently. A postfix metric with an
/// unusable type or line filter is logged once and skipped; the others still
/// produce samples.
pub fn collect_compound(spec: &MetricSpec, lines: &[String]) -> Vec<Sample> {
    let postfixes: Vec<PreparedPostfix<'_>> = spec
        .postfix_metrics
        .iter()
        .filter_map(|postfix| match PreparedPostfix::new(spec, postfix) {
            Ok(prepared) => Some(prepared),
            Err(e) => {
                error!(
                    "Skipping postfix-metric {} of {}: {}",
                    postfix.name, spec.name, e
                );
                None
            }
        })
        .collect();

    let mut samples = Vec::new();
    for line in lines {
        let fields: Vec<&str> = line.split_whitespace().collect();
        for postfix in &postfixes {
            if !postfix.matches(line) {
                continue;
            }
            match postfix.sample(&fields, line) {
                Ok(sample) => samples.push(sample),
                Err(e) => warn!("Postfix-metric {}: {}", postfix.full_name, e),
            }
        }
    }
    samples
}

/// A postfix metric with its filter compiled and labels merged once per call
struct PreparedPostfix<'a> {
    spec: &'a PostfixMetricSpec,
    full_name: String,
    kind: ValueKind,
    filter: Option<Regex>,
    labels: Labels,
}

impl<'a> PreparedPostfix<'a> {
    fn new(parent: &MetricSpec, spec: &'a PostfixMetricSpec) -> Result<Self> {
        let kind = spec.value_type.parse()?;
        let filter = match spec.line_filter.as_deref() {
            None | Some("") => None,
            Some(pattern) => Some(Regex::new(pattern).map_err(|source| {
                ExporterError::LineFilterPattern {
                    pattern: pattern.to_string(),
                    source,
                }
            })?),
        };
        Ok(Self {
            spec,
            full_name: spec.full_name(&parent.name),
            kind,
            filter,
            labels: merge_labels(&parent.labels, &spec.labels),
        })
    }

    fn matches(&self, line: &str) -> bool {
        self.filter.as_ref().map_or(true, |re| re.is_match(line))
    }

    fn sample(&self, fields: &[&str], line: &str) -> Result<Sample> {
        let value = extract_value(fields, self.spec.field, line)?;
        let labels = build_labels(&self.labels, &self.spec.dynamic_labels, fields)?;
        Ok(Sample {
            name: self.full_name.clone(),
            help: self.spec.help.clone(),
            kind: self.kind,
            labels,
            value,
        })
    }
}

/// Parent labels overlaid with child labels; the child wins on collision
pub fn merge_labels(parent: &Labels, child: &Labels) -> Labels {
    let mut merged = parent.clone();
    merged.extend(child.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// Parse the field at `index` as a 64-bit float
pub fn extract_value(fields: &[&str], index: usize, line: &str) -> Result<f64> {
    let raw = fields
        .get(index)
        .ok_or_else(|| ExporterError::FieldOutOfRange {
            index,
            available: fields.len(),
            line: line.to_string(),
        })?;
    raw.parse::<f64>().map_err(|e| ExporterError::ValueParse {
        value: raw.to_string(),
        message: e.to_string(),
    })
}

/// Values for each dynamic label; a missing field yields an empty value
pub fn dynamic_label_values(fields: &[&str], labels: &[DynamicLabelSpec]) -> Vec<(String, String)> {
    labels
        .iter()
        .map(|label| {
            let value = fields.get(label.field).copied().unwrap_or_default();
            (label.name.clone(), value.to_string())
        })
        .collect()
}

fn build_labels(
    static_labels: &Labels,
    dynamic: &[DynamicLabelSpec],
    fields: &[&str],
) -> Result<Labels> {
    let mut labels = static_labels.clone();
    for (name, value) in dynamic_label_values(fields, dynamic) {
        if labels.contains_key(&name) {
            return Err(ExporterError::sample(format!(
                "label {} is both static and dynamic",
                name
            )));
        }
        labels.insert(name, value);
    }
    Ok(labels)
}

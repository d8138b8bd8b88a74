//! Typed samples and their conversion into exposition metric families

use crate::config::Labels;
use crate::error::{ExporterError, Result};
use prometheus::proto::{Counter, Gauge, LabelPair, Metric, MetricFamily, MetricType};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Exposition type of a configured metric
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Gauge,
    Counter,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Gauge => "gauge",
            ValueKind::Counter => "counter",
        }
    }

    fn metric_type(self) -> MetricType {
        match self {
            ValueKind::Gauge => MetricType::GAUGE,
            ValueKind::Counter => MetricType::COUNTER,
        }
    }
}

impl FromStr for ValueKind {
    type Err = ExporterError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gauge" => Ok(ValueKind::Gauge),
            "counter" => Ok(ValueKind::Counter),
            other => Err(ExporterError::UnsupportedValueKind(other.to_string())),
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One labeled numeric observation extracted from a command output line
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Family name, already including any postfix
    pub name: String,
    pub help: String,
    pub kind: ValueKind,
    /// Static and dynamic labels combined
    pub labels: Labels,
    pub value: f64,
}

impl Sample {
    fn to_metric(&self) -> Metric {
        let mut metric = Metric::default();
        for (name, value) in &self.labels {
            let mut pair = LabelPair::default();
            pair.set_name(name.clone());
            pair.set_value(value.clone());
            metric.mut_label().push(pair);
        }
        match self.kind {
            ValueKind::Gauge => {
                let mut gauge = Gauge::default();
                gauge.set_value(self.value);
                metric.set_gauge(gauge);
            }
            ValueKind::Counter => {
                let mut counter = Counter::default();
                counter.set_value(self.value);
                metric.set_counter(counter);
            }
        }
        metric
    }
}

struct FamilyBuilder {
    family: MetricFamily,
    kind: ValueKind,
    seen: BTreeSet<Vec<(String, String)>>,
}

impl FamilyBuilder {
    fn new(sample: &Sample) -> Self {
        let mut family = MetricFamily::default();
        family.set_name(sample.name.clone());
        family.set_help(sample.help.clone());
        family.set_field_type(sample.kind.metric_type());
        Self {
            family,
            kind: sample.kind,
            seen: BTreeSet::new(),
        }
    }

    fn push(&mut self, sample: &Sample) -> Result<()> {
        if sample.kind != self.kind {
            return Err(ExporterError::sample(format!(
                "family {} already declared as {}, got {} sample",
                sample.name, self.kind, sample.kind
            )));
        }
        let identity: Vec<(String, String)> = sample
            .labels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if !self.seen.insert(identity) {
            return Err(ExporterError::sample(format!(
                "duplicate label set {:?} for family {}",
                sample.labels, sample.name
            )));
        }
        self.family.mut_metric().push(sample.to_metric());
        Ok(())
    }
}

/// Group samples into families sorted by name.
///
/// Samples that would make a family inconsistent (a second label set equal
/// to an earlier one, or a type that disagrees with the first sample) are
/// logged and dropped; the rest of the family is kept.
pub fn into_metric_families(samples: Vec<Sample>) -> Vec<MetricFamily> {
    let mut families: BTreeMap<String, FamilyBuilder> = BTreeMap::new();

    for sample in &samples {
        let builder = families
            .entry(sample.name.clone())
            .or_insert_with(|| FamilyBuilder::new(sample));
        if let Err(e) = builder.push(sample) {
            warn!("Dropping sample for {}: {}", sample.name, e);
        }
    }

    families
        .into_values()
        .map(|builder| builder.family)
        .filter(|family| !family.get_metric().is_empty())
        .collect()
}

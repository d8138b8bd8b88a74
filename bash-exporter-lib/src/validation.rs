//! Structural and semantic checks for configuration snapshots
//!
//! Every problem is collected rather than stopping at the first one, so an
//! operator fixing a config file sees the full list in one run.

use crate::config::{Config, DynamicLabelSpec, GlobalSpec, Labels, LoggingConfig, MetricSpec};
use crate::config::{PostfixMetricSpec, ServerConfig};
use crate::error::ValidationError;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Metric and label names accepted by the exposition format
    static ref NAME_PATTERN: Regex =
        Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("name pattern is valid");
}

const VALID_LEVELS: [&str; 3] = ["info", "debug", "error"];
const VALID_TYPES: [&str; 2] = ["gauge", "counter"];

/// Validate a whole configuration, returning every problem found
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    let mut problems = Vec::new();

    validate_server(&config.server, &mut problems);
    validate_logging(&config.logging, &mut problems);
    validate_global(&config.global, &mut problems);

    if config.metrics.is_empty() {
        problems.push("at least one metric must be defined".to_string());
    }
    for metric in &config.metrics {
        let mut errs = Vec::new();
        validate_metric(metric, &mut errs);
        problems.extend(
            errs.into_iter()
                .map(|e| format!("metric '{}': {}", metric.name, e)),
        );
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::new(problems))
    }
}

/// Whether `name` is a valid metric or label name
pub fn is_valid_name(name: &str) -> bool {
    NAME_PATTERN.is_match(name)
}

fn validate_server(server: &ServerConfig, problems: &mut Vec<String>) {
    if server.listen_address.trim().is_empty() {
        problems.push("server.listen_address is required".to_string());
    }
    if !server.metrics_path.starts_with('/') {
        problems.push(format!(
            "server.metrics_path: {} must start with '/'",
            server.metrics_path
        ));
    }
}

fn validate_logging(logging: &LoggingConfig, problems: &mut Vec<String>) {
    if !VALID_LEVELS.contains(&logging.level.as_str()) {
        problems.push(format!(
            "logging.level: {} is not valid. Valid levels: info, debug, error",
            logging.level
        ));
    }
}

fn validate_global(global: &GlobalSpec, problems: &mut Vec<String>) {
    if global.command_blacklist.iter().any(|c| c.trim().is_empty()) {
        problems.push("global.command_blacklist must not contain empty entries".to_string());
    }
    if matches!(&global.shell, Some(shell) if shell.trim().is_empty()) {
        problems.push("global.shell must not be empty when set".to_string());
    }
}

fn validate_metric(metric: &MetricSpec, errs: &mut Vec<String>) {
    if metric.name.is_empty() {
        errs.push("name is required".to_string());
    } else if !is_valid_name(&metric.name) {
        errs.push("metric name is not valid".to_string());
    }
    if metric.help.is_empty() {
        errs.push("help string is required".to_string());
    }
    if !VALID_TYPES.contains(&metric.value_type.as_str()) {
        errs.push("type is invalid. valid: gauge, counter".to_string());
    }
    if metric.command.trim().is_empty() {
        errs.push("command is required".to_string());
    }

    validate_labels(&metric.labels, errs);
    validate_dynamic_labels(&metric.dynamic_labels, errs);

    for postfix in &metric.postfix_metrics {
        let mut postfix_errs = Vec::new();
        validate_postfix(postfix, &mut postfix_errs);
        errs.extend(
            postfix_errs
                .into_iter()
                .map(|e| format!("postfix-metric '{}': {}", postfix.name, e)),
        );
    }
}

fn validate_postfix(postfix: &PostfixMetricSpec, errs: &mut Vec<String>) {
    if postfix.name.is_empty() {
        errs.push("name is required".to_string());
    } else if !is_valid_name(&postfix.name) {
        errs.push("postfix-metric name is not valid".to_string());
    }
    if postfix.help.is_empty() {
        errs.push("help string is required".to_string());
    }
    if !VALID_TYPES.contains(&postfix.value_type.as_str()) {
        errs.push("type is invalid. valid: gauge, counter".to_string());
    }

    validate_labels(&postfix.labels, errs);
    validate_dynamic_labels(&postfix.dynamic_labels, errs);
}

fn validate_dynamic_labels(labels: &[DynamicLabelSpec], errs: &mut Vec<String>) {
    for label in labels {
        if label.name.is_empty() {
            errs.push("dynamic_label name is required".to_string());
            continue;
        }
        if !is_valid_name(&label.name) {
            errs.push(format!("dynamic_label name: {} is not valid", label.name));
        }
        if label.name.starts_with("__") {
            errs.push(format!(
                "dynamic_label name '{}' must not start with '__'",
                label.name
            ));
        }
    }
}

fn validate_labels(labels: &Labels, errs: &mut Vec<String>) {
    for (name, value) in labels {
        if !is_valid_name(name) {
            errs.push(format!("label name {} is not valid", name));
        }
        if name.starts_with("__") {
            errs.push(format!("label name '{}' must not start with '__'", name));
        }
        if value.is_empty() {
            errs.push(format!("label {} requires value", name));
        }
    }
}

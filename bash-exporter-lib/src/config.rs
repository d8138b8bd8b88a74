use crate::duration;
use crate::error::Result;
use crate::validation;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Timeout applied when neither the metric nor the global section sets one
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Cache TTL applied when neither the metric nor the global section sets one
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Concurrent command jobs allowed per scrape when unset
pub const DEFAULT_MAX_CONCURRENT: usize = 10;

/// Shell used to run commands when unset
pub const DEFAULT_SHELL: &str = "bash";

pub const DEFAULT_LISTEN_ADDRESS: &str = ":8080";
pub const DEFAULT_METRICS_PATH: &str = "/metrics";
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Static label set, kept ordered so descriptors are stable across scrapes
pub type Labels = BTreeMap<String, String>;

/// One complete configuration version.
///
/// A snapshot is never mutated once handed to the collector; reloads build a
/// fresh value and swap it in whole.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub global: GlobalSpec,
    pub metrics: Vec<MetricSpec>,
}

/// HTTP exposition settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address, `host:port` or `:port` for all interfaces
    pub listen_address: String,

    /// Path the metrics are served on
    pub metrics_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: DEFAULT_LISTEN_ADDRESS.to_string(),
            metrics_path: DEFAULT_METRICS_PATH.to_string(),
        }
    }
}

impl ServerConfig {
    /// Listen address in a form `SocketAddr` parsing accepts
    pub fn bind_address(&self) -> String {
        if self.listen_address.starts_with(':') {
            format!("0.0.0.0{}", self.listen_address)
        } else {
            self.listen_address.clone()
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// One of `debug`, `info`, `error`
    pub level: String,

    /// Append logs to this file instead of stdout
    pub path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            path: None,
        }
    }
}

/// Defaults shared by every metric
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct GlobalSpec {
    /// Command timeout, zero means "use the built-in default"
    #[serde(deserialize_with = "duration::deserialize")]
    pub timeout: Duration,

    /// Result cache TTL, zero means "use the built-in default"
    #[serde(deserialize_with = "duration::deserialize")]
    pub cache_ttl: Duration,

    /// Maximum concurrently running metric jobs, zero means default
    pub max_concurrent: usize,

    /// Executables that must never be run
    pub command_blacklist: Vec<String>,

    /// Shell used for `-c` invocation
    pub shell: Option<String>,
}

impl GlobalSpec {
    pub fn effective_max_concurrent(&self) -> usize {
        if self.max_concurrent == 0 {
            DEFAULT_MAX_CONCURRENT
        } else {
            self.max_concurrent
        }
    }

    /// Whether `executable` appears on the blacklist
    pub fn is_blacklisted(&self, executable: &str) -> bool {
        self.command_blacklist.iter().any(|b| b == executable)
    }
}

/// A dynamic label whose value is read from a field of the output line
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DynamicLabelSpec {
    pub name: String,
    pub field: usize,
}

impl DynamicLabelSpec {
    pub fn new<S: Into<String>>(name: S, field: usize) -> Self {
        Self {
            name: name.into(),
            field,
        }
    }
}

/// A command and how to turn its output into samples
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricSpec {
    pub name: String,
    pub help: String,

    /// `gauge` or `counter`
    #[serde(rename = "type")]
    pub value_type: String,

    pub command: String,

    #[serde(deserialize_with = "duration::deserialize_option")]
    pub timeout: Option<Duration>,

    #[serde(deserialize_with = "duration::deserialize_option")]
    pub cache_ttl: Option<Duration>,

    pub shell: Option<String>,
    pub labels: Labels,
    pub dynamic_labels: Vec<DynamicLabelSpec>,

    /// Whitespace-separated field holding the value
    pub field: usize,

    /// Skip the global blacklist check for this metric
    pub ignore_blacklist: bool,

    /// When non-empty the metric is compound: one family per entry
    pub postfix_metrics: Vec<PostfixMetricSpec>,
}

impl MetricSpec {
    /// Create a simple metric reading field 0 of every output line
    pub fn new<N, H, T, C>(name: N, help: H, value_type: T, command: C) -> Self
    where
        N: Into<String>,
        H: Into<String>,
        T: Into<String>,
        C: Into<String>,
    {
        Self {
            name: name.into(),
            help: help.into(),
            value_type: value_type.into(),
            command: command.into(),
            ..Default::default()
        }
    }

    /// Set the value field index
    pub fn field(mut self, field: usize) -> Self {
        self.field = field;
        self
    }

    /// Set the per-metric timeout override
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the per-metric cache TTL override
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Set the per-metric shell override
    pub fn shell<S: Into<String>>(mut self, shell: S) -> Self {
        self.shell = Some(shell.into());
        self
    }

    /// Add a static label
    pub fn label<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Add a dynamic label read from `field`
    pub fn dynamic_label<S: Into<String>>(mut self, name: S, field: usize) -> Self {
        self.dynamic_labels.push(DynamicLabelSpec::new(name, field));
        self
    }

    /// Enable/disable the blacklist opt-out
    pub fn ignore_blacklist(mut self, ignore: bool) -> Self {
        self.ignore_blacklist = ignore;
        self
    }

    /// Add a postfix metric, turning this into a compound metric
    pub fn postfix(mut self, postfix: PostfixMetricSpec) -> Self {
        self.postfix_metrics.push(postfix);
        self
    }

    pub fn is_compound(&self) -> bool {
        !self.postfix_metrics.is_empty()
    }

    /// First whitespace-separated token of the command
    pub fn executable(&self) -> Option<&str> {
        self.command.split_whitespace().next()
    }

    /// Metric override > global > built-in default
    pub fn effective_timeout(&self, global: &GlobalSpec) -> Duration {
        first_non_zero(&[self.timeout, Some(global.timeout)]).unwrap_or(DEFAULT_TIMEOUT)
    }

    /// Metric override > global > built-in default
    pub fn effective_cache_ttl(&self, global: &GlobalSpec) -> Duration {
        first_non_zero(&[self.cache_ttl, Some(global.cache_ttl)]).unwrap_or(DEFAULT_CACHE_TTL)
    }

    /// Metric override > global > `bash`
    pub fn effective_shell<'a>(&'a self, global: &'a GlobalSpec) -> &'a str {
        [self.shell.as_deref(), global.shell.as_deref()]
            .into_iter()
            .flatten()
            .find(|s| !s.trim().is_empty())
            .unwrap_or(DEFAULT_SHELL)
    }
}

fn first_non_zero(candidates: &[Option<Duration>]) -> Option<Duration> {
    candidates.iter().flatten().copied().find(|d| !d.is_zero())
}

/// A sub-extraction sharing its parent's command execution
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct PostfixMetricSpec {
    /// Appended to the parent name as `parent_name`
    pub name: String,
    pub help: String,

    #[serde(rename = "type")]
    pub value_type: String,

    pub field: usize,

    /// Regular expression a line must match, empty or absent matches all
    #[serde(rename = "match")]
    pub line_filter: Option<String>,

    pub labels: Labels,
    pub dynamic_labels: Vec<DynamicLabelSpec>,
}

impl PostfixMetricSpec {
    pub fn new<N, H, T>(name: N, help: H, value_type: T, field: usize) -> Self
    where
        N: Into<String>,
        H: Into<String>,
        T: Into<String>,
    {
        Self {
            name: name.into(),
            help: help.into(),
            value_type: value_type.into(),
            field,
            ..Default::default()
        }
    }

    /// Only lines matching `pattern` feed this postfix metric
    pub fn line_filter<S: Into<String>>(mut self, pattern: S) -> Self {
        self.line_filter = Some(pattern.into());
        self
    }

    pub fn label<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn dynamic_label<S: Into<String>>(mut self, name: S, field: usize) -> Self {
        self.dynamic_labels.push(DynamicLabelSpec::new(name, field));
        self
    }

    /// Family name when attached to `parent`
    pub fn full_name(&self, parent: &str) -> String {
        format!("{}_{}", parent, self.name)
    }
}

/// Builder pattern for creating configuration
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new config builder
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Set the listen address
    pub fn listen_address<S: Into<String>>(mut self, address: S) -> Self {
        self.config.server.listen_address = address.into();
        self
    }

    /// Set the metrics path
    pub fn metrics_path<S: Into<String>>(mut self, path: S) -> Self {
        self.config.server.metrics_path = path.into();
        self
    }

    /// Set the log level
    pub fn log_level<S: Into<String>>(mut self, level: S) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// Set the global command timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.global.timeout = timeout;
        self
    }

    /// Set the global cache TTL
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.global.cache_ttl = ttl;
        self
    }

    /// Set the maximum number of concurrent jobs
    pub fn max_concurrent(mut self, max: usize) -> Self {
        self.config.global.max_concurrent = max;
        self
    }

    /// Blacklist an executable
    pub fn blacklist<S: Into<String>>(mut self, executable: S) -> Self {
        self.config.global.command_blacklist.push(executable.into());
        self
    }

    /// Set the global shell
    pub fn shell<S: Into<String>>(mut self, shell: S) -> Self {
        self.config.global.shell = Some(shell.into());
        self
    }

    /// Add a metric
    pub fn metric(mut self, metric: MetricSpec) -> Self {
        self.config.metrics.push(metric);
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<Config> {
        validation::validate(&self.config)?;
        Ok(self.config)
    }

    /// Build without validation, for snapshots that are trusted as-is
    pub fn build_unchecked(self) -> Config {
        self.config
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }
}

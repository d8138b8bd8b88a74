use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Comprehensive error types for exporter operations
#[derive(Error, Debug)]
pub enum ExporterError {
    /// Configuration file could not be read
    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration file is not valid YAML for the expected schema
    #[error("failed to parse YAML from file {path}: {message}")]
    ConfigParse { path: PathBuf, message: String },

    /// Configuration parsed but failed semantic validation
    #[error("invalid configuration: {0}")]
    Validation(#[from] ValidationError),

    /// Command executable is on the global blacklist
    #[error("command '{command}' for metric '{metric}' is in black list")]
    BlacklistViolation { metric: String, command: String },

    /// Command runner failures (timeout, non-zero exit, cancellation)
    #[error(transparent)]
    Command(#[from] CommandError),

    /// Requested field index is beyond the fields of an output line
    #[error("field index {index} out of range of {available} output fields in line '{line}'")]
    FieldOutOfRange {
        index: usize,
        available: usize,
        line: String,
    },

    /// Selected field is not a floating point number
    #[error("failed to parse value '{value}': {message}")]
    ValueParse { value: String, message: String },

    /// Metric type other than gauge or counter
    #[error("unsupported metric type: {0}")]
    UnsupportedValueKind(String),

    /// Postfix metric line filter is not a valid regular expression
    #[error("invalid line filter pattern '{pattern}': {source}")]
    LineFilterPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Sample could not be turned into an exposition metric
    #[error("failed to construct sample: {0}")]
    SampleConstruction(String),

    /// Prometheus registry or encoder errors
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP server errors
    #[error("server error: {0}")]
    Server(String),
}

impl ExporterError {
    /// Create a new config parse error
    pub fn config_parse<P: Into<PathBuf>, S: Into<String>>(path: P, msg: S) -> Self {
        ExporterError::ConfigParse {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create a new blacklist violation error
    pub fn blacklisted<M: Into<String>, C: Into<String>>(metric: M, command: C) -> Self {
        ExporterError::BlacklistViolation {
            metric: metric.into(),
            command: command.into(),
        }
    }

    /// Create a new sample construction error
    pub fn sample<S: Into<String>>(msg: S) -> Self {
        ExporterError::SampleConstruction(msg.into())
    }

    /// Create a new server error
    pub fn server<S: Into<String>>(msg: S) -> Self {
        ExporterError::Server(msg.into())
    }

    /// Whether this error came from loading or validating configuration
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            ExporterError::ConfigRead { .. }
                | ExporterError::ConfigParse { .. }
                | ExporterError::Validation(_)
        )
    }
}

/// Classified outcome of a failed command run.
///
/// Cloneable so the cache can remember a failure and serve it again until the
/// entry expires.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The command did not finish before its deadline and was killed
    #[error("command timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// The command exited non-zero or could not be started
    #[error("command execution failed: {reason}; stderr: {stderr}")]
    Execution { reason: String, stderr: String },

    /// The runner was cancelled while the command was running
    #[error("command execution cancelled")]
    Cancelled,
}

impl CommandError {
    /// Create a new execution error
    pub fn execution<R: Into<String>, S: Into<String>>(reason: R, stderr: S) -> Self {
        CommandError::Execution {
            reason: reason.into(),
            stderr: stderr.into(),
        }
    }
}

/// All problems found while validating one configuration document
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{}", problems.join("; "))]
pub struct ValidationError {
    pub problems: Vec<String>,
}

impl ValidationError {
    pub fn new(problems: Vec<String>) -> Self {
        Self { problems }
    }

    /// True when any recorded problem contains `needle`
    pub fn mentions(&self, needle: &str) -> bool {
        self.problems.iter().any(|p| p.contains(needle))
    }
}

/// Result type for exporter operations
pub type Result<T> = std::result::Result<T, ExporterError>;

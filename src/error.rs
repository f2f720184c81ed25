use std::io;
use std::path::PathBuf;

/// Fatal errors detected before the pipeline reads its first line.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("log format has no variables: {0:?}")]
    NoVariables(String),

    #[error("malformed log format at {offset}: {reason}")]
    MalformedFormat { offset: usize, reason: String },

    #[error("log format variable ${0} appears more than once")]
    DuplicateVariable(String),

    #[error("failed to build pattern for log format")]
    Pattern(#[from] regex::Error),

    #[error("invalid filter expression {expression:?}: {reason}")]
    Filter { expression: String, reason: String },

    #[error("access log file \"{}\" does not exist", .0.display())]
    MissingAccessLog(PathBuf),

    #[error("nginx config file \"{}\" does not exist", .0.display())]
    MissingServerConfig(PathBuf),

    #[error("failed to read nginx config \"{}\"", path.display())]
    ReadServerConfig {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed nginx config \"{}\": {reason}", path.display())]
    MalformedServerConfig { path: PathBuf, reason: String },

    #[error("access log file is not provided and cannot be detected from the nginx config (\"{}\")", .0.display())]
    NoAccessLog(PathBuf),

    #[error("several access logs are configured ({}); pass one with --access-log", .0.join(", "))]
    AmbiguousAccessLog(Vec<String>),

    #[error("incorrect format name {format:?} set in config for access log file \"{path}\"")]
    UnknownFormatName { path: String, format: String },

    #[error("invalid metric name template {template:?}: {reason}")]
    MetricTemplate { template: String, reason: String },

    #[error("failed to resolve host name")]
    Hostname(#[source] nix::Error),
}

/// A captured field could not be converted to its numeric type.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("cannot coerce {field} value {value:?}")]
pub struct CoercionError {
    pub field: &'static str,
    pub value: String,
}

/// Evaluation of a filter expression against one line or record failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FilterError {
    #[error("unknown field {0:?}")]
    UnknownField(String),

    #[error("cannot compare {left} with {right} using {op}")]
    Incomparable {
        left: &'static str,
        right: &'static str,
        op: &'static str,
    },
}

/// A metric increment could not be delivered.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to resolve statsd address {0}")]
    Resolve(String, #[source] io::Error),

    #[error("failed to send {metric} to statsd")]
    Send {
        metric: String,
        #[source]
        source: io::Error,
    },
}

/// Errors that stop the streaming pipeline.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to read access log")]
    Read(#[from] io::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

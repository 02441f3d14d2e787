use std::time::Duration;

use thiserror::Error;

/// Invalid environment-derived configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}' ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// A declarative matrix that cannot produce a well-formed sweep.
#[derive(Debug, Error)]
pub enum MatrixError {
    #[error("matrix produces no experiment runs")]
    EmptyPlan,

    #[error("could not parse matrix file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("matrix dimension '{dimension}' repeats value '{value}'")]
    DuplicateValue {
        dimension: &'static str,
        value: String,
    },

    #[error("{0} must be at least 1")]
    Zero(&'static str),

    #[error("two runs would share the label '{0}'")]
    DuplicateLabel(String),

    #[error("{field} = {value} is too large")]
    TooLarge { field: &'static str, value: u32 },
}

/// Rejected while building a job descriptor, before anything reaches the scheduler.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobSpecError {
    #[error("missing required field: {0}")]
    Missing(&'static str),

    #[error("{field} '{value}' is not a valid DNS-1123 label")]
    InvalidName { field: &'static str, value: String },

    #[error("unknown benchmark mode '{0}' (expected kem, zk-prove, zk-verify or suite)")]
    UnknownMode(String),

    #[error("unrecognized benchmark flag '{0}'")]
    UnknownFlag(String),

    #[error("flag '{0}' is missing its value")]
    MissingValue(String),

    #[error("unexpected argument '{0}': expected a --flag")]
    StrayArgument(String),
}

/// Scheduler-side failures. Not-found on delete and completion timeouts are
/// outcomes, not errors, and never surface here.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("failed to invoke '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' exited with {status}: {stderr}")]
    Api {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("job '{0}' already exists (previous instance still terminating?)")]
    AlreadyExists(String),

    #[error("deployment '{name}' did not finish rolling out within {timeout:?}")]
    RolloutTimeout { name: String, timeout: Duration },

    #[error("could not decode scheduler response for '{name}': {reason}")]
    Decode { name: String, reason: String },
}

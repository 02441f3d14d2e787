pub mod cluster;
pub mod config;
pub mod error;
pub mod fsutil;
pub mod job;
pub mod lifecycle;
pub mod matrix;
pub mod sink;
pub mod suite;
pub mod sweep;

#[cfg(test)]
mod test_support;

pub use cluster::{ClusterJobClient, KubectlClient, WaitOutcome};
pub use config::OrchestratorConfig;
pub use error::{ClusterError, ConfigError, JobSpecError, MatrixError};
pub use matrix::{MatrixDriver, MatrixReport};
pub use suite::{ScaledSuiteRunner, SuiteReport, SuiteRequest};
pub use sweep::{generate, Category, ExperimentSpec, ParameterMatrix};

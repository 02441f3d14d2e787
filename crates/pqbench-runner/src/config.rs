//! Orchestrator configuration.
//!
//! Built once at startup from environment-style key/value inputs and then
//! passed by reference into every component. Nothing below `main` reads the
//! process environment.

use crate::error::ConfigError;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

pub const BENCH_CLIENT_IMAGE: &str = "bench-client";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullPolicy {
    IfNotPresent,
    Never,
}

impl PullPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            PullPolicy::IfNotPresent => "IfNotPresent",
            PullPolicy::Never => "Never",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub reference: String,
    pub pull_policy: PullPolicy,
}

impl ImageRef {
    /// Registry images are pulled; without a registry the image must already
    /// be loaded on the nodes under its local tag.
    pub fn resolve(registry: Option<&str>, tag: &str) -> Self {
        match registry.map(str::trim).filter(|r| !r.is_empty()) {
            Some(registry) => Self {
                reference: format!(
                    "{}/{}:{}",
                    registry.trim_end_matches('/'),
                    BENCH_CLIENT_IMAGE,
                    tag
                ),
                pull_policy: PullPolicy::IfNotPresent,
            },
            None => Self {
                reference: format!("{}:{}", BENCH_CLIENT_IMAGE, tag),
                pull_policy: PullPolicy::Never,
            },
        }
    }
}

/// Endpoints the benchmark client talks to, and the deployments behind them.
#[derive(Debug, Clone)]
pub struct ServiceTargets {
    pub lattice_url: String,
    pub zk_url: String,
    pub lattice_deployment: String,
    pub zk_deployment: String,
}

impl Default for ServiceTargets {
    fn default() -> Self {
        Self {
            lattice_url: "http://lattice-service:8000".to_string(),
            zk_url: "http://zk-service:8001".to_string(),
            lattice_deployment: "lattice-service".to_string(),
            zk_deployment: "zk-service".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Timeouts {
    pub kem: Duration,
    pub zk: Duration,
    pub concurrency: Duration,
    pub suite: Duration,
    pub rollout: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            kem: Duration::from_secs(300),
            zk: Duration::from_secs(600),
            concurrency: Duration::from_secs(600),
            suite: Duration::from_secs(1800),
            rollout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub image: ImageRef,
    pub namespace: String,
    pub repetitions: u32,
    pub kem_iterations: u32,
    pub zk_iterations: u32,
    pub kubectl: String,
    pub kube_context: Option<String>,
    pub results_root: PathBuf,
    pub suite_output_dir: PathBuf,
    pub services: ServiceTargets,
    /// Reused for every matrix run; see `lifecycle::JobSlot`.
    pub matrix_job_name: String,
    pub timeouts: Timeouts,
    pub backoff_limit: u32,
    pub ttl_after_finished: Duration,
    pub cooldown: Duration,
    pub stabilization: Duration,
    pub poll_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            image: ImageRef::resolve(None, "latest"),
            namespace: "pq-bench".to_string(),
            repetitions: 3,
            kem_iterations: 500,
            zk_iterations: 50,
            kubectl: "kubectl".to_string(),
            kube_context: None,
            results_root: PathBuf::from("results"),
            suite_output_dir: PathBuf::from("."),
            services: ServiceTargets::default(),
            matrix_job_name: "bench-client".to_string(),
            timeouts: Timeouts::default(),
            backoff_limit: 1,
            ttl_after_finished: Duration::from_secs(300),
            cooldown: Duration::from_secs(5),
            stabilization: Duration::from_secs(15),
            poll_interval: Duration::from_secs(2),
        }
    }
}

impl OrchestratorConfig {
    /// Resolve configuration from a key lookup, typically `std::env::var`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let tag = get("IMAGE_TAG").unwrap_or_else(|| "latest".to_string());
        let registry = get("REGISTRY");
        if registry.is_none() {
            warn!(
                image = %format!("{}:{}", BENCH_CLIENT_IMAGE, tag),
                "REGISTRY not set; using locally tagged image"
            );
        }
        config.image = ImageRef::resolve(registry.as_deref(), &tag);

        if let Some(ns) = get("NAMESPACE") {
            config.namespace = ns;
        }
        if let Some(raw) = get("REPETITIONS") {
            config.repetitions = parse_count("REPETITIONS", &raw)?;
        }
        if let Some(raw) = get("KEM_ITERATIONS") {
            config.kem_iterations = parse_count("KEM_ITERATIONS", &raw)?;
        }
        if let Some(raw) = get("ZK_ITERATIONS") {
            config.zk_iterations = parse_count("ZK_ITERATIONS", &raw)?;
        }
        if let Some(bin) = get("KUBECTL") {
            config.kubectl = bin;
        }
        config.kube_context = get("KUBE_CONTEXT");
        if let Some(dir) = get("RESULTS_DIR") {
            config.results_root = PathBuf::from(dir);
        }
        if let Some(url) = get("LATTICE_URL") {
            config.services.lattice_url = url;
        }
        if let Some(url) = get("ZK_URL") {
            config.services.zk_url = url;
        }
        Ok(config)
    }

    pub fn to_json(&self) -> Value {
        json!({
            "image": self.image.reference,
            "image_pull_policy": self.image.pull_policy.as_str(),
            "namespace": self.namespace,
            "repetitions": self.repetitions,
            "kem_iterations": self.kem_iterations,
            "zk_iterations": self.zk_iterations,
            "kube_context": self.kube_context,
            "lattice_url": self.services.lattice_url,
            "zk_url": self.services.zk_url,
            "matrix_job_name": self.matrix_job_name,
            "timeouts_secs": {
                "kem": self.timeouts.kem.as_secs(),
                "zk": self.timeouts.zk.as_secs(),
                "concurrency": self.timeouts.concurrency.as_secs(),
                "suite": self.timeouts.suite.as_secs(),
                "rollout": self.timeouts.rollout.as_secs(),
            },
            "backoff_limit": self.backoff_limit,
            "ttl_after_finished_secs": self.ttl_after_finished.as_secs(),
            "cooldown_secs": self.cooldown.as_secs_f64(),
        })
    }
}

fn parse_count(key: &'static str, raw: &str) -> Result<u32, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidValue {
        key,
        value: raw.to_string(),
        reason: reason.to_string(),
    };
    let n: u32 = raw
        .trim()
        .parse()
        .map_err(|e: std::num::ParseIntError| invalid(&e.to_string()))?;
    if n == 0 {
        return Err(invalid("must be at least 1"));
    }
    Ok(n)
}

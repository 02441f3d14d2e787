//! One-shot aggregate benchmark against both services at chosen replica counts.

use crate::cluster::{ClusterJobClient, WaitOutcome};
use crate::config::OrchestratorConfig;
use crate::fsutil::atomic_write_bytes;
use crate::job::job_name_for_label;
use crate::lifecycle::{JobSlot, JobTemplate};
use crate::sweep::suite_spec;
use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use std::thread;
use tracing::{info, warn};

const SUITE_JOB_PREFIX: &str = "bench-suite";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteRequest {
    pub label: String,
    pub lattice_replicas: u32,
    pub zk_replicas: u32,
    pub kem_iterations: u32,
    pub zk_iterations: u32,
}

impl SuiteRequest {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            lattice_replicas: 1,
            zk_replicas: 1,
            kem_iterations: 500,
            zk_iterations: 50,
        }
    }

    fn validate(&self) -> Result<()> {
        let label = self.label.trim();
        if label.is_empty() || label == "." || label == ".." {
            return Err(anyhow!("suite label must be a non-empty name"));
        }
        if self.label.contains(['/', '\\']) {
            return Err(anyhow!(
                "suite label '{}' must not contain path separators",
                self.label
            ));
        }
        for (what, n) in [
            ("lattice replicas", self.lattice_replicas),
            ("zk replicas", self.zk_replicas),
            ("kem iterations", self.kem_iterations),
            ("zk iterations", self.zk_iterations),
        ] {
            if n == 0 {
                return Err(anyhow!("{} must be at least 1", what));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SuiteReport {
    pub label: String,
    pub job_name: String,
    pub output_path: PathBuf,
    pub completed: bool,
    pub wait: WaitOutcome,
    pub output_bytes: usize,
}

pub struct ScaledSuiteRunner<'a, C: ClusterJobClient> {
    config: &'a OrchestratorConfig,
    client: &'a C,
}

impl<'a, C: ClusterJobClient> ScaledSuiteRunner<'a, C> {
    pub fn new(config: &'a OrchestratorConfig, client: &'a C) -> Self {
        Self { config, client }
    }

    pub fn output_path(&self, label: &str) -> PathBuf {
        self.config
            .suite_output_dir
            .join(format!("results-{}.json", label))
    }

    pub fn run(&self, request: &SuiteRequest) -> Result<SuiteReport> {
        request.validate()?;
        let services = &self.config.services;
        let job_name = job_name_for_label(SUITE_JOB_PREFIX, &request.label);
        let slot = JobSlot::new(
            self.client,
            job_name.clone(),
            JobTemplate::from_config(self.config),
        );
        let spec = suite_spec(
            services,
            &self.config.timeouts,
            request.kem_iterations,
            request.zk_iterations,
            &request.label,
        );
        let job = slot.prepare(spec.arguments.clone())?;

        for (deployment, replicas) in [
            (&services.lattice_deployment, request.lattice_replicas),
            (&services.zk_deployment, request.zk_replicas),
        ] {
            info!(deployment = %deployment, replicas, "scaling");
            self.client
                .scale_deployment(deployment, replicas)
                .with_context(|| format!("scaling {} to {} replicas", deployment, replicas))?;
        }
        for deployment in [&services.lattice_deployment, &services.zk_deployment] {
            self.client
                .await_rollout(deployment, self.config.timeouts.rollout)
                .with_context(|| {
                    format!("{} is not ready; suite '{}' not submitted", deployment, request.label)
                })?;
        }
        if !self.config.stabilization.is_zero() {
            info!(pause = ?self.config.stabilization, "letting services settle");
            thread::sleep(self.config.stabilization);
        }

        slot.vacate()
            .with_context(|| format!("deleting previous job '{}'", job_name))?
            .occupy(&job)
            .with_context(|| format!("creating suite job '{}'", job_name))?;
        info!(
            job = %job_name,
            label = %spec.label,
            category = spec.category.as_str(),
            "suite submitted"
        );

        let wait = self
            .client
            .await_completion(&job_name, spec.timeout)
            .with_context(|| format!("waiting on suite job '{}'", job_name))?;
        if !wait.is_completed() {
            warn!(job = %job_name, outcome = wait.as_str(), "suite did not complete; keeping partial output");
        }
        let output = self
            .client
            .fetch_output(&job_name)
            .with_context(|| format!("collecting output of '{}'", job_name))?;

        let output_path = self.output_path(&request.label);
        atomic_write_bytes(&output_path, &output)
            .with_context(|| format!("writing {}", output_path.display()))?;

        Ok(SuiteReport {
            label: request.label.clone(),
            job_name,
            output_path,
            completed: wait.is_completed(),
            wait,
            output_bytes: output.len(),
        })
    }
}

use crate::cluster::{ClusterJobClient, WaitOutcome};
use crate::config::OrchestratorConfig;
use crate::error::ClusterError;
use crate::job::JobSpec;
use chrono::Utc;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Delete(String),
    Create { name: String, args: Vec<String> },
    Await(String, Duration),
    Fetch(String),
    Scale(String, u32),
    Rollout(String),
}

/// In-memory scheduler that records every call and enforces name uniqueness.
#[derive(Default)]
pub struct MockCluster {
    pub calls: RefCell<Vec<Call>>,
    live: RefCell<BTreeSet<String>>,
    outputs: RefCell<BTreeMap<String, Vec<u8>>>,
    outcomes: RefCell<VecDeque<WaitOutcome>>,
    silent: bool,
    fail_delete: bool,
    fail_create_after: Option<usize>,
    creates: Cell<usize>,
    slow_rollouts: BTreeSet<String>,
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait outcomes handed out in order; `Completed` once exhausted.
    pub fn with_outcomes(self, outcomes: Vec<WaitOutcome>) -> Self {
        *self.outcomes.borrow_mut() = outcomes.into();
        self
    }

    /// Jobs produce no output at all.
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    pub fn failing_delete(mut self) -> Self {
        self.fail_delete = true;
        self
    }

    pub fn failing_create_after(mut self, successful: usize) -> Self {
        self.fail_create_after = Some(successful);
        self
    }

    pub fn slow_rollout(mut self, deployment: &str) -> Self {
        self.slow_rollouts.insert(deployment.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn live_jobs(&self) -> usize {
        self.live.borrow().len()
    }

    fn record(&self, call: Call) {
        self.calls.borrow_mut().push(call);
    }
}

fn transport(command: &str) -> ClusterError {
    ClusterError::Api {
        command: command.to_string(),
        status: "status 1".to_string(),
        stderr: "Unable to connect to the server".to_string(),
    }
}

impl ClusterJobClient for MockCluster {
    fn delete_job(&self, name: &str) -> Result<(), ClusterError> {
        self.record(Call::Delete(name.to_string()));
        if self.fail_delete {
            return Err(transport("kubectl delete job"));
        }
        self.live.borrow_mut().remove(name);
        Ok(())
    }

    fn create_job(&self, job: &JobSpec) -> Result<(), ClusterError> {
        self.record(Call::Create {
            name: job.name.clone(),
            args: job.args.clone(),
        });
        if let Some(limit) = self.fail_create_after {
            if self.creates.get() >= limit {
                return Err(transport("kubectl create -f -"));
            }
        }
        self.creates.set(self.creates.get() + 1);
        if !self.live.borrow_mut().insert(job.name.clone()) {
            return Err(ClusterError::AlreadyExists(job.name.clone()));
        }
        let label = job
            .args
            .iter()
            .position(|a| a == "--label")
            .and_then(|i| job.args.get(i + 1))
            .cloned()
            .unwrap_or_default();
        let output = if self.silent {
            Vec::new()
        } else {
            format!("{{\"label\":\"{}\"}}", label).into_bytes()
        };
        self.outputs.borrow_mut().insert(job.name.clone(), output);
        Ok(())
    }

    fn await_completion(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<WaitOutcome, ClusterError> {
        self.record(Call::Await(name.to_string(), timeout));
        Ok(self
            .outcomes
            .borrow_mut()
            .pop_front()
            .unwrap_or(WaitOutcome::Completed))
    }

    fn fetch_output(&self, name: &str) -> Result<Vec<u8>, ClusterError> {
        self.record(Call::Fetch(name.to_string()));
        Ok(self.outputs.borrow().get(name).cloned().unwrap_or_default())
    }

    fn scale_deployment(&self, name: &str, replicas: u32) -> Result<(), ClusterError> {
        self.record(Call::Scale(name.to_string(), replicas));
        Ok(())
    }

    fn await_rollout(&self, name: &str, timeout: Duration) -> Result<(), ClusterError> {
        self.record(Call::Rollout(name.to_string()));
        if self.slow_rollouts.contains(name) {
            return Err(ClusterError::RolloutTimeout {
                name: name.to_string(),
                timeout,
            });
        }
        Ok(())
    }
}

pub fn scratch_dir(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "pqbench_{}_test_{}_{}",
        tag,
        std::process::id(),
        Utc::now().timestamp_micros()
    ))
}

/// Default config with all pauses zeroed and output rooted under `root`.
pub fn fast_config(root: &std::path::Path) -> OrchestratorConfig {
    OrchestratorConfig {
        results_root: root.join("results"),
        suite_output_dir: root.to_path_buf(),
        cooldown: Duration::ZERO,
        stabilization: Duration::ZERO,
        poll_interval: Duration::ZERO,
        ..OrchestratorConfig::default()
    }
}

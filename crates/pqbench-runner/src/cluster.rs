//! Scheduler capability used by the lifecycle runner and the suite flow.

use crate::config::OrchestratorConfig;
use crate::error::ClusterError;
use crate::fsutil::shell_join;
use crate::job::JobSpec;
use serde_json::Value;
use std::io::Write;
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How a completion wait ended. Only transport faults are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Completed,
    /// The job exhausted its retry budget before the deadline.
    Failed,
    TimedOut,
}

impl WaitOutcome {
    pub fn is_completed(self) -> bool {
        self == WaitOutcome::Completed
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WaitOutcome::Completed => "completed",
            WaitOutcome::Failed => "failed",
            WaitOutcome::TimedOut => "timed_out",
        }
    }
}

pub trait ClusterJobClient {
    /// Remove the job if present. Absent is success.
    fn delete_job(&self, name: &str) -> Result<(), ClusterError>;

    /// Submit a new job. Fails with `AlreadyExists` if the name is still taken.
    fn create_job(&self, job: &JobSpec) -> Result<(), ClusterError>;

    /// Block until the job finishes or `timeout` elapses.
    fn await_completion(&self, name: &str, timeout: Duration)
        -> Result<WaitOutcome, ClusterError>;

    /// Whatever the job's container wrote so far; empty if nothing ran.
    fn fetch_output(&self, name: &str) -> Result<Vec<u8>, ClusterError>;

    fn scale_deployment(&self, name: &str, replicas: u32) -> Result<(), ClusterError>;

    /// Block until the deployment's rollout is ready, failing after `timeout`.
    fn await_rollout(&self, name: &str, timeout: Duration) -> Result<(), ClusterError>;
}

/// `ClusterJobClient` backed by the `kubectl` binary.
#[derive(Debug, Clone)]
pub struct KubectlClient {
    program: String,
    namespace: String,
    context: Option<String>,
    poll_interval: Duration,
}

impl KubectlClient {
    pub fn new(program: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            namespace: namespace.into(),
            context: None,
            poll_interval: Duration::from_secs(2),
        }
    }

    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            program: config.kubectl.clone(),
            namespace: config.namespace.clone(),
            context: config.kube_context.clone(),
            poll_interval: config.poll_interval,
        }
    }

    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.context = context;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn command_args(&self, args: &[&str]) -> Vec<String> {
        let mut out = Vec::with_capacity(args.len() + 4);
        if let Some(ctx) = &self.context {
            out.push("--context".to_string());
            out.push(ctx.clone());
        }
        out.push("--namespace".to_string());
        out.push(self.namespace.clone());
        out.extend(args.iter().map(|a| a.to_string()));
        out
    }

    fn run(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<Output, ClusterError> {
        let argv = self.command_args(args);
        let mut line = vec![self.program.clone()];
        line.extend(argv.iter().cloned());
        debug!(command = %shell_join(&line), "scheduler call");

        let mut cmd = Command::new(&self.program);
        cmd.args(&argv);
        cmd.stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        let spawn_err = |source: std::io::Error| ClusterError::Spawn {
            program: self.program.clone(),
            source,
        };
        let mut child = cmd.spawn().map_err(spawn_err)?;
        let fed = match (stdin, child.stdin.take()) {
            (Some(bytes), Some(mut pipe)) => pipe.write_all(bytes),
            _ => Ok(()),
        };
        // Reap the child before reporting a short write.
        let output = child.wait_with_output().map_err(spawn_err)?;
        fed.map_err(spawn_err)?;
        Ok(output)
    }

    fn run_checked(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<Vec<u8>, ClusterError> {
        let output = self.run(args, stdin)?;
        if output.status.success() {
            Ok(output.stdout)
        } else {
            Err(api_error(&self.program, args, &output))
        }
    }
}

impl ClusterJobClient for KubectlClient {
    fn delete_job(&self, name: &str) -> Result<(), ClusterError> {
        let output = self.run(
            &[
                "delete",
                "job",
                name,
                "--ignore-not-found=true",
                "--cascade=foreground",
                "--wait=true",
            ],
            None,
        )?;
        if output.status.success() || is_not_found(&output.stderr) {
            return Ok(());
        }
        Err(api_error(&self.program, &["delete", "job", name], &output))
    }

    fn create_job(&self, job: &JobSpec) -> Result<(), ClusterError> {
        let manifest = serde_json::to_vec(&job.manifest()).map_err(|e| ClusterError::Decode {
            name: job.name.clone(),
            reason: e.to_string(),
        })?;
        let output = self.run(&["create", "-f", "-"], Some(manifest.as_slice()))?;
        if output.status.success() {
            return Ok(());
        }
        if is_already_exists(&output.stderr) {
            return Err(ClusterError::AlreadyExists(job.name.clone()));
        }
        Err(api_error(&self.program, &["create", "-f", "-"], &output))
    }

    fn await_completion(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<WaitOutcome, ClusterError> {
        let deadline = Instant::now() + timeout;
        loop {
            let body = self.run_checked(&["get", "job", name, "-o", "json"], None)?;
            let status = parse_job_status(&body).map_err(|reason| ClusterError::Decode {
                name: name.to_string(),
                reason,
            })?;
            if let Some(outcome) = status {
                return Ok(outcome);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(WaitOutcome::TimedOut);
            }
            thread::sleep(self.poll_interval.min(deadline - now));
        }
    }

    fn fetch_output(&self, name: &str) -> Result<Vec<u8>, ClusterError> {
        let target = format!("job/{}", name);
        let output = self.run(&["logs", target.as_str(), "--tail=-1"], None)?;
        if output.status.success() {
            return Ok(output.stdout);
        }
        warn!(
            job = name,
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "no output available for job"
        );
        Ok(Vec::new())
    }

    fn scale_deployment(&self, name: &str, replicas: u32) -> Result<(), ClusterError> {
        let target = format!("deployment/{}", name);
        let replicas = format!("--replicas={}", replicas);
        self.run_checked(&["scale", target.as_str(), replicas.as_str()], None)?;
        Ok(())
    }

    fn await_rollout(&self, name: &str, timeout: Duration) -> Result<(), ClusterError> {
        let target = format!("deployment/{}", name);
        let limit = format!("--timeout={}s", timeout.as_secs().max(1));
        let args = ["rollout", "status", target.as_str(), limit.as_str()];
        let output = self.run(&args, None)?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("timed out") || stderr.contains("progress deadline") {
            return Err(ClusterError::RolloutTimeout {
                name: name.to_string(),
                timeout,
            });
        }
        Err(api_error(&self.program, &args, &output))
    }
}

/// Terminal state from a `get job -o json` body, or `None` while still running.
fn parse_job_status(body: &[u8]) -> Result<Option<WaitOutcome>, String> {
    let value: Value = serde_json::from_slice(body).map_err(|e| e.to_string())?;
    let conditions = value
        .pointer("/status/conditions")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    for cond in &conditions {
        let active = cond.get("status").and_then(|v| v.as_str()) == Some("True");
        if !active {
            continue;
        }
        match cond.get("type").and_then(|v| v.as_str()) {
            Some("Complete") => return Ok(Some(WaitOutcome::Completed)),
            Some("Failed") => return Ok(Some(WaitOutcome::Failed)),
            _ => {}
        }
    }
    Ok(None)
}

fn is_not_found(stderr: &[u8]) -> bool {
    let s = String::from_utf8_lossy(stderr);
    s.contains("NotFound") || s.contains("not found")
}

fn is_already_exists(stderr: &[u8]) -> bool {
    let s = String::from_utf8_lossy(stderr);
    s.contains("AlreadyExists") || s.contains("already exists")
}

fn api_error(program: &str, args: &[&str], output: &Output) -> ClusterError {
    let mut line = vec![program.to_string()];
    line.extend(args.iter().map(|a| a.to_string()));
    ClusterError::Api {
        command: shell_join(&line),
        status: output
            .status
            .code()
            .map(|c| format!("status {}", c))
            .unwrap_or_else(|| "signal".to_string()),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}

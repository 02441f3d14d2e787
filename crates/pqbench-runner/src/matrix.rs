//! Sequential execution of a full parameter sweep.
//!
//! Runs go one at a time, in generator order, through a single reused job
//! slot. Two drivers pointed at the same namespace will fight over that slot;
//! that is a usage error and is not detected here.

use crate::cluster::ClusterJobClient;
use crate::config::OrchestratorConfig;
use crate::fsutil::{atomic_write_json_pretty, ensure_dir};
use crate::lifecycle::{JobLifecycleRunner, JobSlot, JobTemplate, RunOutcome};
use crate::sink::ResultSink;
use crate::sweep::{generate, ExperimentSpec, ParameterMatrix};
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct MatrixReport {
    pub run_id: String,
    pub run_dir: PathBuf,
    pub plan_digest: String,
    pub total: usize,
    pub completed: usize,
    /// Labels of runs that timed out or failed; their output was still persisted.
    pub incomplete: Vec<String>,
}

fn run_control_path(run_dir: &Path) -> PathBuf {
    run_dir.join("run_control.json")
}

fn write_run_control(
    run_dir: &Path,
    run_id: &str,
    status: &str,
    active_label: Option<&str>,
    finished: usize,
    total: usize,
) -> Result<()> {
    let payload = json!({
        "schema_version": "run_control_v1",
        "run_id": run_id,
        "status": status,
        "active_label": active_label,
        "finished_runs": finished,
        "total_runs": total,
        "updated_at": Utc::now().to_rfc3339(),
    });
    atomic_write_json_pretty(&run_control_path(run_dir), &payload)
}

/// Marks the run `failed` unless explicitly completed, so an aborted sweep
/// leaves a truthful status next to its partial results.
struct RunControlGuard {
    run_dir: PathBuf,
    run_id: String,
    finished: usize,
    total: usize,
    done: bool,
}

impl RunControlGuard {
    fn new(run_dir: &Path, run_id: &str, total: usize) -> Self {
        Self {
            run_dir: run_dir.to_path_buf(),
            run_id: run_id.to_string(),
            finished: 0,
            total,
            done: false,
        }
    }

    fn progress(&mut self, active_label: Option<&str>, finished: usize) -> Result<()> {
        self.finished = finished;
        write_run_control(
            &self.run_dir,
            &self.run_id,
            "running",
            active_label,
            finished,
            self.total,
        )
    }

    fn complete(&mut self) -> Result<()> {
        write_run_control(
            &self.run_dir,
            &self.run_id,
            "completed",
            None,
            self.finished,
            self.total,
        )?;
        self.done = true;
        Ok(())
    }
}

impl Drop for RunControlGuard {
    fn drop(&mut self) {
        if !self.done {
            let _ = write_run_control(
                &self.run_dir,
                &self.run_id,
                "failed",
                None,
                self.finished,
                self.total,
            );
        }
    }
}

pub fn plan_digest(specs: &[ExperimentSpec]) -> Result<String> {
    let bytes = serde_json::to_vec(specs)?;
    Ok(format!("sha256:{}", hex::encode(Sha256::digest(&bytes))))
}

fn append_index(run_dir: &Path, outcome: &RunOutcome) -> Result<()> {
    let line = json!({
        "label": outcome.label,
        "category": outcome.category,
        "completed": outcome.completed,
        "wait_outcome": outcome.wait.as_str(),
        "output_bytes": outcome.raw_output.len(),
        "elapsed_ms": outcome.elapsed.as_millis() as u64,
    });
    let path = run_dir.join("run_index.jsonl");
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("opening {}", path.display()))?;
    writeln!(file, "{}", line).with_context(|| format!("appending to {}", path.display()))?;
    Ok(())
}

pub struct MatrixDriver<'a, C: ClusterJobClient> {
    config: &'a OrchestratorConfig,
    client: &'a C,
}

impl<'a, C: ClusterJobClient> MatrixDriver<'a, C> {
    pub fn new(config: &'a OrchestratorConfig, client: &'a C) -> Self {
        Self { config, client }
    }

    pub fn plan(&self, matrix: &ParameterMatrix) -> Result<Vec<ExperimentSpec>> {
        Ok(generate(
            matrix,
            &self.config.services,
            &self.config.timeouts,
        )?)
    }

    fn create_run_dir(&self) -> Result<(String, PathBuf)> {
        let run_id = format!("matrix-{}", Utc::now().format("%Y%m%d-%H%M%S"));
        ensure_dir(&self.config.results_root)?;
        let run_dir = self.config.results_root.join(&run_id);
        match fs::create_dir(&run_dir) {
            Ok(()) => Ok((run_id, run_dir)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(anyhow!(
                "run directory already exists: {} (another matrix run started this second?)",
                run_dir.display()
            )),
            Err(e) => Err(e).with_context(|| format!("creating {}", run_dir.display())),
        }
    }

    /// Execute every spec of `matrix` and persist each run's output.
    pub fn run(&self, matrix: &ParameterMatrix) -> Result<MatrixReport> {
        let specs = self.plan(matrix)?;
        let digest = plan_digest(&specs)?;
        let (run_id, run_dir) = self.create_run_dir()?;
        let total = specs.len();

        let manifest = json!({
            "schema_version": "matrix_manifest_v1",
            "run_id": run_id,
            "created_at": Utc::now().to_rfc3339(),
            "config": self.config.to_json(),
            "matrix": serde_json::to_value(matrix)?,
            "spec_count": total,
            "plan_digest": digest,
        });
        atomic_write_json_pretty(&run_dir.join("manifest.json"), &manifest)?;
        write_run_control(&run_dir, &run_id, "running", None, 0, total)?;
        let mut guard = RunControlGuard::new(&run_dir, &run_id, total);

        info!(run_id = %run_id, runs = total, dir = %run_dir.display(), "starting matrix");
        let slot = JobSlot::new(
            self.client,
            self.config.matrix_job_name.clone(),
            JobTemplate::from_config(self.config),
        );
        let mut runner = JobLifecycleRunner::new(slot, self.config.cooldown);
        let sink = ResultSink::new(&run_dir);
        let mut completed = 0;
        let mut incomplete = Vec::new();

        for (idx, spec) in specs.iter().enumerate() {
            let position = idx + 1;
            guard.progress(Some(spec.label.as_str()), idx)?;
            info!("[{}/{}] {}", position, total, spec.label);

            let aborted = || {
                format!(
                    "matrix run aborted at '{}' ({}/{}); partial results kept in {}",
                    spec.label,
                    position,
                    total,
                    run_dir.display()
                )
            };
            let outcome = runner.run(spec).with_context(aborted)?;
            sink.append(spec.category, &outcome.raw_output)
                .with_context(aborted)?;
            append_index(&run_dir, &outcome).with_context(aborted)?;

            if outcome.completed {
                completed += 1;
            } else {
                warn!(
                    label = %spec.label,
                    outcome = outcome.wait.as_str(),
                    bytes = outcome.raw_output.len(),
                    "persisted incomplete run"
                );
                incomplete.push(spec.label.clone());
            }
        }

        guard.progress(None, total)?;
        guard.complete()?;
        info!(run_id = %run_id, completed, incomplete = incomplete.len(), "matrix finished");

        Ok(MatrixReport {
            run_id,
            run_dir,
            plan_digest: digest,
            total,
            completed,
            incomplete,
        })
    }
}

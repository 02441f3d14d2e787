//! Per-run job lifecycle: delete, create, wait, collect.

use crate::cluster::{ClusterJobClient, WaitOutcome};
use crate::config::{ImageRef, OrchestratorConfig};
use crate::error::{ClusterError, JobSpecError};
use crate::job::JobSpec;
use crate::sweep::{Category, ExperimentSpec};
use anyhow::{anyhow, Context, Result};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecycleState {
    Idle,
    Deleting,
    Creating,
    Waiting,
    Collecting,
    Done,
}

/// Everything about a job descriptor except its name and arguments.
#[derive(Debug, Clone)]
pub struct JobTemplate {
    pub namespace: String,
    pub image: ImageRef,
    pub backoff_limit: u32,
    pub ttl_after_finished: Duration,
}

impl JobTemplate {
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            namespace: config.namespace.clone(),
            image: config.image.clone(),
            backoff_limit: config.backoff_limit,
            ttl_after_finished: config.ttl_after_finished,
        }
    }

    fn build(&self, name: &str, args: Vec<String>) -> Result<JobSpec, JobSpecError> {
        JobSpec::builder(name)
            .namespace(self.namespace.clone())
            .image(self.image.clone())
            .args(args)
            .backoff_limit(self.backoff_limit)
            .ttl_after_finished(self.ttl_after_finished)
            .build()
    }
}

/// A job name that at most one live scheduler job may hold.
///
/// The only way to create a job in the slot is through the [`VacantSlot`]
/// returned by [`JobSlot::vacate`], so every create is preceded by a delete.
/// Nothing guards against a second orchestrator using the same name in the
/// same namespace.
pub struct JobSlot<'c, C: ClusterJobClient> {
    client: &'c C,
    name: String,
    template: JobTemplate,
}

/// Proof that the slot's previous holder was deleted.
pub struct VacantSlot<'s, 'c, C: ClusterJobClient> {
    slot: &'s JobSlot<'c, C>,
}

impl<'c, C: ClusterJobClient> JobSlot<'c, C> {
    pub fn new(client: &'c C, name: impl Into<String>, template: JobTemplate) -> Self {
        Self {
            client,
            name: name.into(),
            template,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client(&self) -> &'c C {
        self.client
    }

    /// Build and validate the descriptor this slot would submit.
    pub fn prepare(&self, args: Vec<String>) -> Result<JobSpec, JobSpecError> {
        self.template.build(&self.name, args)
    }

    pub fn vacate(&self) -> Result<VacantSlot<'_, 'c, C>, ClusterError> {
        self.client.delete_job(&self.name)?;
        Ok(VacantSlot { slot: self })
    }
}

impl<'s, 'c, C: ClusterJobClient> VacantSlot<'s, 'c, C> {
    pub fn occupy(self, job: &JobSpec) -> Result<()> {
        if job.name != self.slot.name {
            return Err(anyhow!(
                "job '{}' does not belong to slot '{}'",
                job.name,
                self.slot.name
            ));
        }
        self.slot.client.create_job(job)?;
        Ok(())
    }
}

fn advance(state: &mut LifecycleState, next: LifecycleState, job: &str) {
    debug_assert!(next > *state, "{:?} -> {:?}", state, next);
    debug!(job, from = ?*state, to = ?next, "lifecycle");
    *state = next;
}

/// Result of one lifecycle cycle. Produced whether or not the job completed.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub label: String,
    pub category: Category,
    pub raw_output: Vec<u8>,
    pub completed: bool,
    pub wait: WaitOutcome,
    pub elapsed: Duration,
}

pub struct JobLifecycleRunner<'c, C: ClusterJobClient> {
    slot: JobSlot<'c, C>,
    cooldown: Duration,
    state: LifecycleState,
}

impl<'c, C: ClusterJobClient> JobLifecycleRunner<'c, C> {
    pub fn new(slot: JobSlot<'c, C>, cooldown: Duration) -> Self {
        Self {
            slot,
            cooldown,
            state: LifecycleState::Idle,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Run one spec to completion or timeout. Errors are scheduler or
    /// descriptor faults and should abort the enclosing flow.
    pub fn run(&mut self, spec: &ExperimentSpec) -> Result<RunOutcome> {
        self.state = LifecycleState::Idle;
        let started = Instant::now();
        let job = self
            .slot
            .prepare(spec.arguments.clone())
            .with_context(|| format!("invalid job for '{}'", spec.label))?;

        advance(&mut self.state, LifecycleState::Deleting, &self.slot.name);
        let vacant = self.slot.vacate().with_context(|| {
            format!(
                "deleting previous job '{}' before '{}'",
                self.slot.name(),
                spec.label
            )
        })?;

        advance(&mut self.state, LifecycleState::Creating, &self.slot.name);
        vacant
            .occupy(&job)
            .with_context(|| format!("creating job for '{}'", spec.label))?;

        advance(&mut self.state, LifecycleState::Waiting, &self.slot.name);
        let wait = self
            .slot
            .client()
            .await_completion(self.slot.name(), spec.timeout)
            .with_context(|| format!("waiting on job for '{}'", spec.label))?;
        if !wait.is_completed() {
            info!(
                label = %spec.label,
                outcome = wait.as_str(),
                timeout = ?spec.timeout,
                "run did not complete; collecting partial output"
            );
        }

        advance(&mut self.state, LifecycleState::Collecting, &self.slot.name);
        let raw_output = self
            .slot
            .client()
            .fetch_output(self.slot.name())
            .with_context(|| format!("collecting output for '{}'", spec.label))?;

        if !self.cooldown.is_zero() {
            thread::sleep(self.cooldown);
        }
        advance(&mut self.state, LifecycleState::Done, &self.slot.name);

        Ok(RunOutcome {
            label: spec.label.clone(),
            category: spec.category,
            raw_output,
            completed: wait.is_completed(),
            wait,
            elapsed: started.elapsed(),
        })
    }
}

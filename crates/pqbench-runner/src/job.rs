//! Typed batch-job descriptors for the benchmark client.

use crate::config::{ImageRef, PullPolicy};
use crate::error::JobSpecError;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::time::Duration;

pub const BENCH_MODES: [&str; 4] = ["kem", "zk-prove", "zk-verify", "suite"];

const VALUE_FLAGS: [&str; 13] = [
    "--url",
    "--param-set",
    "--operation",
    "--circuit-id",
    "--iterations",
    "--requests",
    "--concurrency",
    "--label",
    "--lattice-url",
    "--zk-url",
    "--kem-iterations",
    "--zk-iterations",
    "--output",
];

const CONTAINER_NAME: &str = "bench-client";
const MAX_NAME_LEN: usize = 63;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub name: String,
    pub namespace: String,
    pub image: String,
    pub pull_policy: PullPolicy,
    pub args: Vec<String>,
    pub backoff_limit: u32,
    pub ttl_after_finished: Duration,
}

impl JobSpec {
    pub fn builder(name: impl Into<String>) -> JobSpecBuilder {
        JobSpecBuilder {
            name: name.into(),
            ..JobSpecBuilder::default()
        }
    }

    /// The `batch/v1` Job object submitted to the scheduler.
    pub fn manifest(&self) -> Value {
        let labels = json!({
            "app.kubernetes.io/name": CONTAINER_NAME,
            "app.kubernetes.io/managed-by": "pqbench",
            "pqbench/job": self.name,
        });
        json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": {
                "name": self.name,
                "namespace": self.namespace,
                "labels": labels,
            },
            "spec": {
                "backoffLimit": self.backoff_limit,
                "ttlSecondsAfterFinished": self.ttl_after_finished.as_secs(),
                "template": {
                    "metadata": { "labels": labels },
                    "spec": {
                        "restartPolicy": "Never",
                        "containers": [{
                            "name": CONTAINER_NAME,
                            "image": self.image,
                            "imagePullPolicy": self.pull_policy.as_str(),
                            "args": self.args,
                        }]
                    }
                }
            }
        })
    }

    pub fn mode(&self) -> &str {
        &self.args[0]
    }
}

#[derive(Debug, Default)]
pub struct JobSpecBuilder {
    name: String,
    namespace: Option<String>,
    image: Option<ImageRef>,
    args: Vec<String>,
    backoff_limit: u32,
    ttl_after_finished: Option<Duration>,
}

impl JobSpecBuilder {
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn image(mut self, image: ImageRef) -> Self {
        self.image = Some(image);
        self
    }

    pub fn args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn backoff_limit(mut self, limit: u32) -> Self {
        self.backoff_limit = limit;
        self
    }

    pub fn ttl_after_finished(mut self, ttl: Duration) -> Self {
        self.ttl_after_finished = Some(ttl);
        self
    }

    pub fn build(self) -> Result<JobSpec, JobSpecError> {
        if !is_dns_label(&self.name) {
            return Err(JobSpecError::InvalidName {
                field: "job name",
                value: self.name,
            });
        }
        let namespace = self.namespace.ok_or(JobSpecError::Missing("namespace"))?;
        if !is_dns_label(&namespace) {
            return Err(JobSpecError::InvalidName {
                field: "namespace",
                value: namespace,
            });
        }
        let image = self.image.ok_or(JobSpecError::Missing("image"))?;
        if image.reference.trim().is_empty() {
            return Err(JobSpecError::Missing("image"));
        }
        validate_bench_args(&self.args)?;
        Ok(JobSpec {
            name: self.name,
            namespace,
            image: image.reference,
            pull_policy: image.pull_policy,
            args: self.args,
            backoff_limit: self.backoff_limit,
            ttl_after_finished: self
                .ttl_after_finished
                .ok_or(JobSpecError::Missing("ttl_after_finished"))?,
        })
    }
}

/// Check the token list against the benchmark client's argument contract.
pub fn validate_bench_args(args: &[String]) -> Result<(), JobSpecError> {
    let mode = args.first().ok_or(JobSpecError::Missing("args"))?;
    if !BENCH_MODES.contains(&mode.as_str()) {
        return Err(JobSpecError::UnknownMode(mode.clone()));
    }
    let mut rest = args[1..].iter();
    while let Some(token) = rest.next() {
        if !token.starts_with("--") {
            return Err(JobSpecError::StrayArgument(token.clone()));
        }
        if !VALUE_FLAGS.contains(&token.as_str()) {
            return Err(JobSpecError::UnknownFlag(token.clone()));
        }
        match rest.next() {
            Some(value) if !VALUE_FLAGS.contains(&value.as_str()) => {}
            _ => return Err(JobSpecError::MissingValue(token.clone())),
        }
    }
    Ok(())
}

pub fn is_dns_label(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= MAX_NAME_LEN
        && s.bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        && !s.starts_with('-')
        && !s.ends_with('-')
}

/// Derive a scheduler-safe job name from a free-form label.
///
/// Labels that needed rewriting or truncating get a short digest suffix so two
/// distinct labels never map to the same job.
pub fn job_name_for_label(prefix: &str, label: &str) -> String {
    let mut slug = String::with_capacity(label.len());
    for c in label.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            slug.push(c);
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-');
    let fits = prefix.len() + 1 + slug.len() <= MAX_NAME_LEN;
    let suffix = if slug == label && fits {
        String::new()
    } else {
        let digest = hex::encode(Sha256::digest(label.as_bytes()));
        format!("-{}", &digest[..8])
    };

    let budget = MAX_NAME_LEN.saturating_sub(prefix.len() + 1 + suffix.len());
    let slug: String = slug.chars().take(budget).collect();
    let slug = slug.trim_end_matches('-');
    let name = if slug.is_empty() {
        format!("{}{}", prefix, suffix)
    } else {
        format!("{}-{}{}", prefix, slug, suffix)
    };
    name.trim_end_matches('-').to_string()
}

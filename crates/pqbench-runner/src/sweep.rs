//! Parameter sweep expansion.
//!
//! Turns a declarative [`ParameterMatrix`] into the ordered list of
//! [`ExperimentSpec`]s the matrix driver executes. Expansion is pure: the same
//! matrix always yields the same list in the same order.

use crate::config::{OrchestratorConfig, ServiceTargets, Timeouts};
use crate::error::MatrixError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::Display;
use std::time::Duration;

/// Verification is cheap, so it runs this many times the proving iterations.
pub const VERIFY_ITERATION_MULTIPLIER: u32 = 5;

/// Which result file a run lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Kem,
    Zk,
    Concurrency,
    Suite,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Kem => "kem",
            Category::Zk => "zk",
            Category::Concurrency => "concurrency",
            Category::Suite => "suite",
        }
    }

    pub fn file_name(self) -> String {
        format!("{}.jsonl", self.as_str())
    }
}

/// One fully resolved benchmark-client invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExperimentSpec {
    pub label: String,
    pub category: Category,
    pub target_url: String,
    /// Tokens handed to the benchmark client verbatim; the first selects the mode.
    pub arguments: Vec<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParameterMatrix {
    pub param_sets: Vec<String>,
    pub operations: Vec<String>,
    pub circuits: Vec<String>,
    pub concurrency_levels: Vec<u32>,
    pub request_counts: Vec<u32>,
    pub concurrency_param_set: String,
    pub concurrency_iterations: u32,
    pub repetitions: u32,
    pub kem_iterations: u32,
    pub zk_iterations: u32,
}

impl Default for ParameterMatrix {
    fn default() -> Self {
        Self {
            param_sets: to_strings(&["ml_kem_512", "ml_kem_768", "ml_kem_1024"]),
            operations: to_strings(&["keygen", "encaps", "decaps", "full_handshake"]),
            circuits: to_strings(&["multiply", "cube_root"]),
            concurrency_levels: vec![1, 2, 4, 8],
            request_counts: vec![1, 10, 50],
            concurrency_param_set: "ml_kem_768".to_string(),
            concurrency_iterations: 100,
            repetitions: 3,
            kem_iterations: 500,
            zk_iterations: 50,
        }
    }
}

/// Partial matrix as written in a YAML file; absent keys keep the base value.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct MatrixOverrides {
    param_sets: Option<Vec<String>>,
    operations: Option<Vec<String>>,
    circuits: Option<Vec<String>>,
    concurrency_levels: Option<Vec<u32>>,
    request_counts: Option<Vec<u32>>,
    concurrency_param_set: Option<String>,
    concurrency_iterations: Option<u32>,
    repetitions: Option<u32>,
    kem_iterations: Option<u32>,
    zk_iterations: Option<u32>,
}

impl ParameterMatrix {
    /// Default dimensions with the repetition and iteration counts from config.
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            repetitions: config.repetitions,
            kem_iterations: config.kem_iterations,
            zk_iterations: config.zk_iterations,
            ..Self::default()
        }
    }

    pub fn with_yaml_overrides(mut self, raw: &str) -> Result<Self, MatrixError> {
        let o: MatrixOverrides = if raw.trim().is_empty() {
            MatrixOverrides::default()
        } else {
            serde_yaml::from_str(raw)?
        };
        if let Some(v) = o.param_sets {
            self.param_sets = v;
        }
        if let Some(v) = o.operations {
            self.operations = v;
        }
        if let Some(v) = o.circuits {
            self.circuits = v;
        }
        if let Some(v) = o.concurrency_levels {
            self.concurrency_levels = v;
        }
        if let Some(v) = o.request_counts {
            self.request_counts = v;
        }
        if let Some(v) = o.concurrency_param_set {
            self.concurrency_param_set = v;
        }
        if let Some(v) = o.concurrency_iterations {
            self.concurrency_iterations = v;
        }
        if let Some(v) = o.repetitions {
            self.repetitions = v;
        }
        if let Some(v) = o.kem_iterations {
            self.kem_iterations = v;
        }
        if let Some(v) = o.zk_iterations {
            self.zk_iterations = v;
        }
        Ok(self)
    }

    /// Closed-form size of the generated sweep.
    pub fn expected_len(&self) -> usize {
        let reps = self.repetitions as usize;
        self.param_sets.len() * self.operations.len() * reps
            + self.circuits.len() * 2 * reps
            + self.concurrency_levels.len() * self.request_counts.len()
    }

    /// Rejects matrices whose labels collide or whose runs would be degenerate.
    pub fn validate(&self) -> Result<(), MatrixError> {
        let verify_iterations = self.check_fields()?;
        let specs = expand(
            self,
            &ServiceTargets::default(),
            &Timeouts::default(),
            verify_iterations,
        );
        ensure_unique_labels(&specs)
    }

    /// Per-field checks; returns the verification iteration count.
    fn check_fields(&self) -> Result<u32, MatrixError> {
        if self.repetitions == 0 {
            return Err(MatrixError::Zero("repetitions"));
        }
        if self.kem_iterations == 0 {
            return Err(MatrixError::Zero("kem_iterations"));
        }
        if self.zk_iterations == 0 {
            return Err(MatrixError::Zero("zk_iterations"));
        }
        if self.concurrency_iterations == 0 {
            return Err(MatrixError::Zero("concurrency_iterations"));
        }
        if self.concurrency_levels.contains(&0) {
            return Err(MatrixError::Zero("concurrency level"));
        }
        if self.request_counts.contains(&0) {
            return Err(MatrixError::Zero("request count"));
        }
        ensure_distinct("param_sets", &self.param_sets)?;
        ensure_distinct("operations", &self.operations)?;
        ensure_distinct("circuits", &self.circuits)?;
        ensure_distinct("concurrency_levels", &self.concurrency_levels)?;
        ensure_distinct("request_counts", &self.request_counts)?;
        if self.expected_len() == 0 {
            return Err(MatrixError::EmptyPlan);
        }
        self.zk_iterations
            .checked_mul(VERIFY_ITERATION_MULTIPLIER)
            .ok_or(MatrixError::TooLarge {
                field: "zk_iterations",
                value: self.zk_iterations,
            })
    }
}

/// Expand the matrix in execution order: KEM block, ZK block, concurrency block.
pub fn generate(
    matrix: &ParameterMatrix,
    services: &ServiceTargets,
    timeouts: &Timeouts,
) -> Result<Vec<ExperimentSpec>, MatrixError> {
    let verify_iterations = matrix.check_fields()?;
    let specs = expand(matrix, services, timeouts, verify_iterations);
    ensure_unique_labels(&specs)?;
    Ok(specs)
}

fn expand(
    matrix: &ParameterMatrix,
    services: &ServiceTargets,
    timeouts: &Timeouts,
    verify_iterations: u32,
) -> Vec<ExperimentSpec> {
    let mut specs = Vec::with_capacity(matrix.expected_len());

    for param_set in &matrix.param_sets {
        for operation in &matrix.operations {
            for run in 1..=matrix.repetitions {
                let label = format!("kem-{}-{}-run{}", param_set, operation, run);
                let arguments = bench_args(
                    "kem",
                    &[
                        ("--url", services.lattice_url.clone()),
                        ("--param-set", param_set.clone()),
                        ("--operation", operation.clone()),
                        ("--iterations", matrix.kem_iterations.to_string()),
                        ("--label", label.clone()),
                    ],
                );
                specs.push(ExperimentSpec {
                    label,
                    category: Category::Kem,
                    target_url: services.lattice_url.clone(),
                    arguments,
                    timeout: timeouts.kem,
                });
            }
        }
    }

    for circuit in &matrix.circuits {
        for (mode, iterations) in [
            ("prove", matrix.zk_iterations),
            ("verify", verify_iterations),
        ] {
            for run in 1..=matrix.repetitions {
                let label = format!("zk-{}-{}-run{}", mode, circuit, run);
                let arguments = bench_args(
                    &format!("zk-{}", mode),
                    &[
                        ("--url", services.zk_url.clone()),
                        ("--circuit-id", circuit.clone()),
                        ("--iterations", iterations.to_string()),
                        ("--label", label.clone()),
                    ],
                );
                specs.push(ExperimentSpec {
                    label,
                    category: Category::Zk,
                    target_url: services.zk_url.clone(),
                    arguments,
                    timeout: timeouts.zk,
                });
            }
        }
    }

    let short_set = short_param_set(&matrix.concurrency_param_set);
    for concurrency in &matrix.concurrency_levels {
        for requests in &matrix.request_counts {
            let label = format!("kem-{}-c{}-r{}", short_set, concurrency, requests);
            let arguments = bench_args(
                "kem",
                &[
                    ("--url", services.lattice_url.clone()),
                    ("--param-set", matrix.concurrency_param_set.clone()),
                    ("--operation", "full_handshake".to_string()),
                    ("--iterations", matrix.concurrency_iterations.to_string()),
                    ("--requests", requests.to_string()),
                    ("--concurrency", concurrency.to_string()),
                    ("--label", label.clone()),
                ],
            );
            specs.push(ExperimentSpec {
                label,
                category: Category::Concurrency,
                target_url: services.lattice_url.clone(),
                arguments,
                timeout: timeouts.concurrency,
            });
        }
    }

    specs
}

/// Arguments for the aggregate suite mode, which targets both services at once.
pub fn suite_args(
    services: &ServiceTargets,
    kem_iterations: u32,
    zk_iterations: u32,
    label: &str,
) -> Vec<String> {
    bench_args(
        "suite",
        &[
            ("--lattice-url", services.lattice_url.clone()),
            ("--zk-url", services.zk_url.clone()),
            ("--kem-iterations", kem_iterations.to_string()),
            ("--zk-iterations", zk_iterations.to_string()),
            ("--label", label.to_string()),
        ],
    )
}

/// The one-shot suite run. Its output goes to a label-named file rather than a
/// category file, but it carries the `suite` category like any other spec.
pub fn suite_spec(
    services: &ServiceTargets,
    timeouts: &Timeouts,
    kem_iterations: u32,
    zk_iterations: u32,
    label: &str,
) -> ExperimentSpec {
    ExperimentSpec {
        label: label.to_string(),
        category: Category::Suite,
        target_url: services.lattice_url.clone(),
        arguments: suite_args(services, kem_iterations, zk_iterations, label),
        timeout: timeouts.suite,
    }
}

fn bench_args(mode: &str, flags: &[(&str, String)]) -> Vec<String> {
    let mut out = Vec::with_capacity(1 + flags.len() * 2);
    out.push(mode.to_string());
    for (flag, value) in flags {
        out.push(flag.to_string());
        out.push(value.clone());
    }
    out
}

/// `ml_kem_768` -> `768`; names without an underscore are used whole.
fn short_param_set(name: &str) -> &str {
    name.rsplit('_').next().unwrap_or(name)
}

fn ensure_distinct<T: Ord + Display>(
    dimension: &'static str,
    values: &[T],
) -> Result<(), MatrixError> {
    let mut seen = BTreeSet::new();
    for v in values {
        if !seen.insert(v) {
            return Err(MatrixError::DuplicateValue {
                dimension,
                value: v.to_string(),
            });
        }
    }
    Ok(())
}

/// Dimension values may contain `-`, so distinct tuples can still render to
/// the same label.
fn ensure_unique_labels(specs: &[ExperimentSpec]) -> Result<(), MatrixError> {
    let mut seen = BTreeSet::new();
    for spec in specs {
        if !seen.insert(spec.label.as_str()) {
            return Err(MatrixError::DuplicateLabel(spec.label.clone()));
        }
    }
    Ok(())
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn generate_default(matrix: &ParameterMatrix) -> Vec<ExperimentSpec> {
        generate(matrix, &ServiceTargets::default(), &Timeouts::default()).expect("valid matrix")
    }

    fn flag_value<'a>(spec: &'a ExperimentSpec, flag: &str) -> Option<&'a str> {
        spec.arguments
            .iter()
            .position(|a| a == flag)
            .and_then(|i| spec.arguments.get(i + 1))
            .map(|s| s.as_str())
    }

    #[test]
    fn default_matrix_matches_closed_form_count() {
        let matrix = ParameterMatrix::default();
        let specs = generate_default(&matrix);
        assert_eq!(specs.len(), 3 * 4 * 3 + 2 * 2 * 3 + 4 * 3);
        assert_eq!(specs.len(), matrix.expected_len());
        let kem = specs.iter().filter(|s| s.category == Category::Kem).count();
        assert_eq!(kem, 36);
    }

    #[test]
    fn closed_form_holds_across_repetition_counts() {
        for reps in 1..=6 {
            let matrix = ParameterMatrix {
                repetitions: reps,
                ..ParameterMatrix::default()
            };
            let specs = generate_default(&matrix);
            let reps = reps as usize;
            assert_eq!(specs.len(), 3 * 4 * reps + 2 * 2 * reps + 12);
        }
    }

    #[test]
    fn labels_are_unique_within_a_sweep() {
        let matrix = ParameterMatrix {
            repetitions: 4,
            ..ParameterMatrix::default()
        };
        let specs = generate_default(&matrix);
        let labels: HashSet<&str> = specs.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels.len(), specs.len());
    }

    #[test]
    fn verification_runs_five_times_the_proving_iterations() {
        let matrix = ParameterMatrix {
            zk_iterations: 50,
            ..ParameterMatrix::default()
        };
        let specs = generate_default(&matrix);
        for spec in specs.iter().filter(|s| s.arguments[0] == "zk-verify") {
            assert_eq!(flag_value(spec, "--iterations"), Some("250"), "{}", spec.label);
        }
        for spec in specs.iter().filter(|s| s.arguments[0] == "zk-prove") {
            assert_eq!(flag_value(spec, "--iterations"), Some("50"), "{}", spec.label);
        }
    }

    #[test]
    fn zk_block_emits_all_proving_runs_before_verification_per_circuit() {
        let matrix = ParameterMatrix {
            repetitions: 2,
            ..ParameterMatrix::default()
        };
        let labels: Vec<String> = generate_default(&matrix)
            .into_iter()
            .filter(|s| s.category == Category::Zk)
            .map(|s| s.label)
            .collect();
        assert_eq!(
            labels,
            vec![
                "zk-prove-multiply-run1",
                "zk-prove-multiply-run2",
                "zk-verify-multiply-run1",
                "zk-verify-multiply-run2",
                "zk-prove-cube_root-run1",
                "zk-prove-cube_root-run2",
                "zk-verify-cube_root-run1",
                "zk-verify-cube_root-run2",
            ]
        );
    }

    #[test]
    fn concurrency_block_is_a_fixed_twelve_run_grid() {
        let specs = generate_default(&ParameterMatrix::default());
        let conc: Vec<&ExperimentSpec> = specs
            .iter()
            .filter(|s| s.category == Category::Concurrency)
            .collect();
        assert_eq!(conc.len(), 12);
        assert_eq!(conc[0].label, "kem-768-c1-r1");
        assert_eq!(conc[1].label, "kem-768-c1-r10");
        assert_eq!(conc[11].label, "kem-768-c8-r50");
        for spec in conc {
            assert_eq!(flag_value(spec, "--operation"), Some("full_handshake"));
            assert_eq!(flag_value(spec, "--param-set"), Some("ml_kem_768"));
            assert_eq!(flag_value(spec, "--iterations"), Some("100"));
            assert!(flag_value(spec, "--requests").is_some());
            assert!(flag_value(spec, "--concurrency").is_some());
        }
    }

    #[test]
    fn blocks_run_in_kem_zk_concurrency_order() {
        let specs = generate_default(&ParameterMatrix::default());
        let order: Vec<Category> = specs.iter().map(|s| s.category).collect();
        let mut sorted = order.clone();
        sorted.sort();
        assert_eq!(order, sorted);
        assert_eq!(specs[0].label, "kem-ml_kem_512-keygen-run1");
        assert_eq!(specs[1].label, "kem-ml_kem_512-keygen-run2");
        assert_eq!(specs[3].label, "kem-ml_kem_512-encaps-run1");
    }

    #[test]
    fn single_configuration_yields_one_kem_spec() {
        let matrix = ParameterMatrix {
            param_sets: vec!["medium".to_string()],
            operations: vec!["full-handshake".to_string()],
            circuits: vec![],
            concurrency_levels: vec![],
            request_counts: vec![],
            repetitions: 1,
            ..ParameterMatrix::default()
        };
        let specs = generate_default(&matrix);
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].label, "kem-medium-full-handshake-run1");
        assert_eq!(specs[0].category, Category::Kem);
        assert_eq!(
            specs[0].arguments,
            vec![
                "kem",
                "--url",
                "http://lattice-service:8000",
                "--param-set",
                "medium",
                "--operation",
                "full-handshake",
                "--iterations",
                "500",
                "--label",
                "kem-medium-full-handshake-run1",
            ]
        );
    }

    #[test]
    fn generation_is_deterministic() {
        let matrix = ParameterMatrix::default();
        assert_eq!(generate_default(&matrix), generate_default(&matrix));
    }

    #[test]
    fn invalid_matrices_are_rejected() {
        let dup = ParameterMatrix {
            circuits: vec!["multiply".to_string(), "multiply".to_string()],
            ..ParameterMatrix::default()
        };
        assert!(matches!(
            dup.validate(),
            Err(MatrixError::DuplicateValue { dimension: "circuits", .. })
        ));

        let zero = ParameterMatrix {
            repetitions: 0,
            ..ParameterMatrix::default()
        };
        assert!(matches!(zero.validate(), Err(MatrixError::Zero("repetitions"))));

        let empty = ParameterMatrix {
            param_sets: vec![],
            circuits: vec![],
            concurrency_levels: vec![],
            ..ParameterMatrix::default()
        };
        assert!(matches!(empty.validate(), Err(MatrixError::EmptyPlan)));
    }

    #[test]
    fn hyphenated_values_that_render_the_same_label_are_rejected() {
        let matrix = ParameterMatrix {
            param_sets: to_strings(&["medium", "medium-full"]),
            operations: to_strings(&["full-handshake", "handshake"]),
            circuits: vec![],
            concurrency_levels: vec![],
            request_counts: vec![],
            repetitions: 1,
            ..ParameterMatrix::default()
        };
        let expected = MatrixError::DuplicateLabel("kem-medium-full-handshake-run1".to_string());
        assert_eq!(
            matrix.validate().expect_err("validate").to_string(),
            expected.to_string()
        );
        let err = generate(&matrix, &ServiceTargets::default(), &Timeouts::default())
            .expect_err("generate");
        assert!(matches!(err, MatrixError::DuplicateLabel(_)), "{}", err);
    }

    #[test]
    fn accepted_matrices_never_repeat_a_label() {
        let pool = ["a", "b", "a-b", "b-a", "a-b-a", "run1", "a-run1", "c1-r1", "768"];
        for (i, first) in pool.iter().enumerate() {
            for second in &pool[i + 1..] {
                for third in &pool {
                    let matrix = ParameterMatrix {
                        param_sets: to_strings(&[*first, *second]),
                        operations: to_strings(&[*third, "x-a"]),
                        circuits: to_strings(&[*first, *second]),
                        concurrency_param_set: format!("ml_kem_{}", third),
                        repetitions: 2,
                        ..ParameterMatrix::default()
                    };
                    let Ok(specs) =
                        generate(&matrix, &ServiceTargets::default(), &Timeouts::default())
                    else {
                        continue;
                    };
                    let labels: HashSet<&str> = specs.iter().map(|s| s.label.as_str()).collect();
                    assert_eq!(labels.len(), specs.len(), "{:?}", matrix);
                    assert!(matrix.validate().is_ok());
                }
            }
        }
    }

    #[test]
    fn verify_multiplier_overflow_is_a_validation_error() {
        let matrix = ParameterMatrix {
            zk_iterations: 900_000_000,
            ..ParameterMatrix::default()
        };
        assert!(matches!(
            matrix.validate(),
            Err(MatrixError::TooLarge { field: "zk_iterations", .. })
        ));
        assert!(generate(&matrix, &ServiceTargets::default(), &Timeouts::default()).is_err());

        let largest = ParameterMatrix {
            zk_iterations: u32::MAX / VERIFY_ITERATION_MULTIPLIER,
            ..ParameterMatrix::default()
        };
        let specs = generate_default(&largest);
        let verify = specs
            .iter()
            .find(|s| s.arguments[0] == "zk-verify")
            .expect("verify run");
        let expected = (largest.zk_iterations * VERIFY_ITERATION_MULTIPLIER).to_string();
        assert_eq!(flag_value(verify, "--iterations"), Some(expected.as_str()));
    }

    #[test]
    fn yaml_overrides_replace_only_named_fields() {
        let base = ParameterMatrix {
            repetitions: 7,
            ..ParameterMatrix::default()
        };
        let matrix = base
            .with_yaml_overrides("circuits: [multiply]\nrequest_counts: [1, 100]\n")
            .expect("overrides");
        assert_eq!(matrix.circuits, vec!["multiply".to_string()]);
        assert_eq!(matrix.request_counts, vec![1, 100]);
        assert_eq!(matrix.repetitions, 7);
        assert_eq!(matrix.param_sets.len(), 3);

        let err = ParameterMatrix::default()
            .with_yaml_overrides("repetitons: 2\n")
            .expect_err("typo must be rejected");
        assert!(matches!(err, MatrixError::Parse(_)));
    }

    #[test]
    fn suite_arguments_target_both_services() {
        let args = suite_args(&ServiceTargets::default(), 500, 50, "baseline");
        assert_eq!(args[0], "suite");
        for (flag, value) in [
            ("--lattice-url", "http://lattice-service:8000"),
            ("--zk-url", "http://zk-service:8001"),
            ("--kem-iterations", "500"),
            ("--zk-iterations", "50"),
        ] {
            assert!(
                args.windows(2).any(|w| w[0] == flag && w[1] == value),
                "{} missing",
                flag
            );
        }

        let timeouts = Timeouts::default();
        let spec = suite_spec(&ServiceTargets::default(), &timeouts, 500, 50, "baseline");
        assert_eq!(spec.category, Category::Suite);
        assert_eq!(spec.arguments, args);
        assert_eq!(spec.timeout, timeouts.suite);
        assert!(spec.timeout > timeouts.zk);
    }
}

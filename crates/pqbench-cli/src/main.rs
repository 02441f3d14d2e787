use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pqbench_runner::{
    KubectlClient, MatrixDriver, OrchestratorConfig, ParameterMatrix, ScaledSuiteRunner,
    SuiteRequest,
};
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "pqbench",
    version,
    about = "Benchmark orchestrator for the lattice and zk services"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full parameter sweep, one scheduler job at a time.
    Matrix {
        #[arg(long)]
        matrix: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Scale both services, then run the aggregate suite once.
    Suite {
        label: String,
        #[arg(default_value_t = 1)]
        lattice_replicas: u32,
        #[arg(default_value_t = 1)]
        zk_replicas: u32,
        #[arg(default_value_t = 500)]
        kem_iterations: u32,
        #[arg(default_value_t = 50)]
        zk_iterations: u32,
        #[arg(long)]
        json: bool,
    },
    /// Print the generated plan without touching the cluster.
    Describe {
        #[arg(long)]
        matrix: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let json_mode = command_json_mode(&cli.command);
    let result = run_command(cli.command);
    match result {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&json_error("command_failed", format!("{:#}", err), json!({})));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config() -> Result<OrchestratorConfig> {
    OrchestratorConfig::from_lookup(|key| std::env::var(key).ok())
        .context("invalid orchestrator configuration")
}

fn load_matrix(config: &OrchestratorConfig, path: Option<&Path>) -> Result<ParameterMatrix> {
    let matrix = ParameterMatrix::from_config(config);
    match path {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("reading matrix file {}", path.display()))?;
            matrix
                .with_yaml_overrides(&raw)
                .with_context(|| format!("parsing matrix file {}", path.display()))
        }
        None => Ok(matrix),
    }
}

fn run_command(command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Matrix { matrix, json } => {
            let config = load_config()?;
            let matrix = load_matrix(&config, matrix.as_deref())?;
            let client = KubectlClient::from_config(&config);
            let report = MatrixDriver::new(&config, &client).run(&matrix)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "matrix",
                    "run_id": report.run_id,
                    "run_dir": report.run_dir.display().to_string(),
                    "plan_digest": report.plan_digest,
                    "total": report.total,
                    "completed": report.completed,
                    "incomplete": report.incomplete,
                })));
            }
            println!("run_id: {}", report.run_id);
            println!("run_dir: {}", report.run_dir.display());
            println!("runs: {} completed / {} total", report.completed, report.total);
            for label in &report.incomplete {
                println!("incomplete: {}", label);
            }
            println!("results: {}", report.run_dir.display());
            println!("next: analyze the *.jsonl files in {}", report.run_dir.display());
        }
        Commands::Suite {
            label,
            lattice_replicas,
            zk_replicas,
            kem_iterations,
            zk_iterations,
            json,
        } => {
            let config = load_config()?;
            let client = KubectlClient::from_config(&config);
            let request = SuiteRequest {
                label,
                lattice_replicas,
                zk_replicas,
                kem_iterations,
                zk_iterations,
            };
            let report = ScaledSuiteRunner::new(&config, &client).run(&request)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "suite",
                    "label": report.label,
                    "job_name": report.job_name,
                    "lattice_replicas": request.lattice_replicas,
                    "zk_replicas": request.zk_replicas,
                    "completed": report.completed,
                    "wait_outcome": report.wait.as_str(),
                    "output_path": report.output_path.display().to_string(),
                    "output_bytes": report.output_bytes,
                })));
            }
            println!("label: {}", report.label);
            println!("job: {}", report.job_name);
            println!(
                "replicas: lattice={} zk={}",
                request.lattice_replicas, request.zk_replicas
            );
            println!("outcome: {}", report.wait.as_str());
            println!("results: {}", report.output_path.display());
            if !report.completed {
                println!(
                    "next: kubectl -n {} describe job {}",
                    config.namespace, report.job_name
                );
            }
        }
        Commands::Describe { matrix, json } => {
            let config = load_config()?;
            let matrix = load_matrix(&config, matrix.as_deref())?;
            let specs = pqbench_runner::generate(&matrix, &config.services, &config.timeouts)?;
            let digest = pqbench_runner::matrix::plan_digest(&specs)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "describe",
                    "config": config.to_json(),
                    "spec_count": specs.len(),
                    "plan_digest": digest,
                    "specs": specs,
                })));
            }
            println!("image: {}", config.image.reference);
            println!("namespace: {}", config.namespace);
            println!("spec_count: {}", specs.len());
            println!("plan_digest: {}", digest);
            for spec in &specs {
                println!(
                    "{} [{}] timeout={}s",
                    spec.label,
                    spec.category.as_str(),
                    spec.timeout.as_secs()
                );
            }
            println!("next: pqbench matrix");
        }
    }
    Ok(None)
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Matrix { json, .. }
        | Commands::Suite { json, .. }
        | Commands::Describe { json, .. } => *json,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn suite_positionals_fall_back_to_defaults() {
        let cli = Cli::try_parse_from(["pqbench", "suite", "baseline", "2"]).expect("parse");
        match cli.command {
            Commands::Suite {
                label,
                lattice_replicas,
                zk_replicas,
                kem_iterations,
                zk_iterations,
                json,
            } => {
                assert_eq!(label, "baseline");
                assert_eq!(lattice_replicas, 2);
                assert_eq!(zk_replicas, 1);
                assert_eq!(kem_iterations, 500);
                assert_eq!(zk_iterations, 50);
                assert!(!json);
            }
            _ => panic!("expected suite"),
        }
    }

    #[test]
    fn json_flag_is_detected_per_command() {
        let cli = Cli::try_parse_from(["pqbench", "describe", "--json"]).expect("parse");
        assert!(command_json_mode(&cli.command));
        let cli = Cli::try_parse_from(["pqbench", "matrix"]).expect("parse");
        assert!(!command_json_mode(&cli.command));
    }

    #[test]
    fn error_envelope_shape() {
        let v = json_error("command_failed", "boom".to_string(), json!({}));
        assert_eq!(v["ok"], false);
        assert_eq!(v["error"]["code"], "command_failed");
        assert_eq!(v["error"]["message"], "boom");
    }
}

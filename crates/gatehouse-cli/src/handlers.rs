//! Command handlers.

use crate::commands::{EventArgs, RunArgs};
use crate::config::{CliConfig, OutputFormat};
use crate::output::{self, ConsoleObserver};
use crate::plan;
use console::style;
use gatehouse_core::pipeline::PipelineDefinition;
use gatehouse_core::ports::JobRunner;
use gatehouse_core::run::RunResult;
use gatehouse_runner::{DryRunRunner, RunnerConfig, ShellRunner};
use gatehouse_scheduler::{DagBuilder, JobGraph, Scheduler};
use gatehouse_secrets::{EnvProvider, FileProvider, SecretManager};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

const TEMPLATE: &str = r#"name: my-release
description: Checks every change, publishes on release
gate: deploy

jobs:
  - name: quality
    run: echo "Running linters..."

  - name: download-test-data
    produces: [test-data]
    run: echo "sample" > "$GATEHOUSE_ARTIFACTS_OUT/test-data"

  - name: tests
    needs: download-test-data
    consumes: [test-data]
    matrix:
      platform: [ubuntu, macos]
      python: ["3.10", "3.11"]
    run: echo "Testing on $MATRIX_PLATFORM with Python $MATRIX_PYTHON"

  - name: deploy
    needs: [quality, tests]
    if: event.kind == 'release' && event.action == 'created'
    secrets:
      - name: PYPI_TOKEN
        required: false
    run: echo "Publishing..."
"#;

/// Write a starter pipeline.
pub async fn init(path: &Path, force: bool) -> CliResult<()> {
    if path.exists() && !force {
        println!("{} {} already exists", style("!").yellow(), path.display());
        return Ok(());
    }

    std::fs::write(path, TEMPLATE)?;
    println!("{} Created {}", style("✓").green(), path.display());
    Ok(())
}

/// Resolve the pipeline path from the argument or configuration.
pub fn pipeline_path(config: &CliConfig, path: Option<PathBuf>) -> PathBuf {
    path.unwrap_or_else(|| config.pipeline.clone())
}

pub fn load_pipeline(path: &Path) -> CliResult<PipelineDefinition> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    Ok(PipelineDefinition::from_yaml(&content)?)
}

fn compile(path: &Path) -> CliResult<JobGraph> {
    let definition = load_pipeline(path)?;
    Ok(DagBuilder::new().build(&definition)?)
}

/// Validate a pipeline file.
pub async fn validate(path: &Path) -> CliResult<()> {
    let graph = compile(path)?;

    println!(
        "{} Pipeline \"{}\" is valid",
        style("✓").green(),
        graph.name()
    );
    println!(
        "  Jobs: {}, nodes: {}",
        graph.jobs().len(),
        graph.node_count()
    );

    for job in graph.jobs() {
        let needs = job.spec.needs.join(", ");
        print!("    - {}", style(job.name()).bold());
        if job.nodes.len() > 1 {
            print!(" ({} variants)", job.nodes.len());
        }
        if !needs.is_empty() {
            print!(" needs {}", needs);
        }
        if let Some(condition) = &job.spec.condition {
            print!(" if {}", style(condition).dim());
        }
        println!();
    }

    let mut order: Vec<&str> = Vec::new();
    for &id in graph.topological_order() {
        let name = graph.job(graph.node(id).job).name();
        if !order.contains(&name) {
            order.push(name);
        }
    }
    println!("  Order: {}", order.join(" -> "));

    if let Some(gate) = graph.gate() {
        println!("  Gate: {}", graph.job(gate).name());
    }

    Ok(())
}

/// Print what an event would run.
pub async fn plan(path: &Path, event: &EventArgs, json: bool) -> CliResult<plan::Plan> {
    let graph = compile(path)?;
    let event = event.to_event()?;
    let planned = plan::plan(&graph, &event);

    if json {
        println!("{}", serde_json::to_string_pretty(&planned)?);
    } else {
        output::print_plan(&planned);
    }
    Ok(planned)
}

/// Run a pipeline. Returns the process exit code.
pub async fn run(config: &CliConfig, args: RunArgs) -> CliResult<u8> {
    let path = pipeline_path(config, args.path.clone());
    let definition = load_pipeline(&path)?;
    let event = args.event.to_event()?;
    let json = args.json || config.output_format == OutputFormat::Json;

    let mut printer = None;
    let runner: Arc<dyn JobRunner> = if args.dry_run {
        Arc::new(DryRunRunner)
    } else {
        let secrets_file = args.secrets_file.as_ref().or(config.secrets_file.as_ref());
        let secrets = secret_manager(secrets_file).await?;
        let runner_config = RunnerConfig {
            workspace: config.workspace.clone().unwrap_or_else(|| PathBuf::from(".")),
            timeout_seconds: args.timeout.or(config.timeout_seconds),
            ..Default::default()
        };
        let shell = ShellRunner::new(runner_config, Arc::new(secrets));
        if json {
            Arc::new(shell)
        } else {
            let (tx, rx) = mpsc::channel(256);
            printer = Some(output::spawn_printer(rx));
            Arc::new(shell.with_output(tx))
        }
    };

    let mut scheduler = Scheduler::new(runner);
    if let Some(max) = args.max_parallel.or(config.max_parallel) {
        scheduler = scheduler.with_max_parallel(max);
    }
    if !json {
        scheduler = scheduler.with_observer(Arc::new(ConsoleObserver));
        println!(
            "{} Running {} for {} {}{}",
            style("▶").cyan().bold(),
            style(&definition.name).bold(),
            style(event.kind).bold(),
            style(&event.git_ref).dim(),
            if args.dry_run { " (dry run)" } else { "" }
        );
    }

    info!(pipeline = %definition.name, dry_run = args.dry_run, "Starting pipeline");
    let result = scheduler.run(&definition, event).await;

    // Dropping the scheduler drops the runner and closes the output channel
    drop(scheduler);
    if let Some(printer) = printer {
        let _ = printer.await;
    }
    let result = result?;

    report(&result, json)?;
    Ok(exit_code(&result))
}

fn report(result: &RunResult, json: bool) -> CliResult<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
    } else {
        output::print_summary(result);
    }
    Ok(())
}

pub fn exit_code(result: &RunResult) -> u8 {
    if result.exit_code() == 0 { 0 } else { 1 }
}

async fn secret_manager(secrets_file: Option<&PathBuf>) -> CliResult<SecretManager> {
    let mut manager = SecretManager::default();
    manager.register_provider("env", Arc::new(EnvProvider::default()));
    if let Some(path) = secrets_file {
        let provider = FileProvider::load_from_file(path).await?;
        manager.register_provider("file", Arc::new(provider));
    }
    Ok(manager)
}

/// Print the pipeline file's JSON schema.
pub fn schema() -> CliResult<()> {
    let schema = schemars::schema_for!(PipelineDefinition);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

/// Show current configuration.
pub fn show_config(config: &CliConfig) -> CliResult<()> {
    let path = CliConfig::config_path()?;
    println!("{} {}", style("#").dim(), style(path.display()).dim());
    print!("{}", serde_yaml::to_string(config)?);
    Ok(())
}

/// Set a configuration value.
pub fn set_config(key: &str, value: &str) -> CliResult<()> {
    let mut config = CliConfig::load()?;
    config.set(key, value)?;
    config.save()?;

    println!("{} Set {} = {}", style("✓").green(), key, value);
    Ok(())
}

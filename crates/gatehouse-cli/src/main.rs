//! Gatehouse CLI entrypoint.

use clap::Parser;
use console::style;
use std::process::ExitCode;
use tracing::warn;

mod commands;
mod config;
mod handlers;
mod logging;
mod output;
mod plan;


use commands::{Commands, ConfigCommands};
use config::{CliConfig, LogFormat};

/// Exit code for invalid pipelines and other fatal errors.
const EXIT_FATAL: u8 = 2;

#[derive(Parser)]
#[command(name = "gatehouse")]
#[command(author, version, about = "Release gating pipeline runner", long_about = None)]
struct Cli {
    /// Log output format
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let (config, load_error) = match CliConfig::load() {
        Ok(config) => (config, None),
        Err(e) => (CliConfig::default(), Some(e)),
    };
    logging::init(cli.log_format.unwrap_or(config.log_format));
    if let Some(e) = load_error {
        warn!(error = %e, "Falling back to default configuration");
    }

    match dispatch(cli.command, &config).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{} {}", style("✗").red().bold(), e);
            ExitCode::from(EXIT_FATAL)
        }
    }
}

async fn dispatch(command: Commands, config: &CliConfig) -> Result<u8, Box<dyn std::error::Error>> {
    match command {
        Commands::Init { path, force } => handlers::init(&path, force).await?,
        Commands::Validate { path } => {
            handlers::validate(&handlers::pipeline_path(config, path)).await?
        }
        Commands::Plan { path, event, json } => {
            handlers::plan(&handlers::pipeline_path(config, path), &event, json).await?;
        }
        Commands::Run(args) => return handlers::run(config, args).await,
        Commands::Schema => handlers::schema()?,
        Commands::Config { command } => match command {
            ConfigCommands::Show => handlers::show_config(config)?,
            ConfigCommands::Set { key, value } => handlers::set_config(&key, &value)?,
        },
    }

    Ok(0)
}

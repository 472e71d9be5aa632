//! CLI command definitions.

use clap::{Args, Subcommand};
use gatehouse_core::event::{Event, EventKind};
use std::path::{Path, PathBuf};

#[derive(Subcommand)]
pub enum Commands {
    /// Write a starter pipeline file
    Init {
        /// Path of the file to create
        #[arg(default_value = "gatehouse.yaml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Validate a pipeline file
    Validate {
        /// Path to pipeline file
        path: Option<PathBuf>,
    },

    /// Show which nodes an event would run, without running them
    Plan {
        /// Path to pipeline file
        path: Option<PathBuf>,

        #[command(flatten)]
        event: EventArgs,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a pipeline for an event
    Run(RunArgs),

    /// Print the JSON schema of the pipeline file
    Schema,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Path to pipeline file
    pub path: Option<PathBuf>,

    #[command(flatten)]
    pub event: EventArgs,

    /// Walk the pipeline without executing commands
    #[arg(long)]
    pub dry_run: bool,

    /// YAML or JSON file of secrets, exposed through the `file` provider
    #[arg(long, value_name = "FILE")]
    pub secrets_file: Option<PathBuf>,

    /// Print the run result as JSON
    #[arg(long)]
    pub json: bool,

    /// Maximum number of nodes running at once
    #[arg(long, value_name = "N")]
    pub max_parallel: Option<usize>,

    /// Per-command timeout in seconds
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<u64>,
}

/// The triggering event, from flags or from a file.
#[derive(Args, Debug, Clone, Default)]
pub struct EventArgs {
    /// Event kind (push, release, repository_dispatch, manual, schedule)
    #[arg(long = "event", value_name = "KIND")]
    pub kind: Option<EventKind>,

    /// Git ref the event points at
    #[arg(long = "ref", value_name = "REF")]
    pub git_ref: Option<String>,

    /// Event action, e.g. `created` for releases
    #[arg(long)]
    pub action: Option<String>,

    /// Repository dispatch type
    #[arg(long, value_name = "TYPE")]
    pub dispatch_type: Option<String>,

    /// Read the event from a JSON or YAML file
    #[arg(
        long,
        value_name = "FILE",
        conflicts_with_all = ["kind", "git_ref", "action", "dispatch_type"]
    )]
    pub event_file: Option<PathBuf>,
}

pub const DEFAULT_REF: &str = "refs/heads/main";

impl EventArgs {
    pub fn to_event(&self) -> Result<Event, Box<dyn std::error::Error>> {
        if let Some(path) = &self.event_file {
            return load_event(path);
        }

        let mut event = Event::new(
            self.kind.unwrap_or(EventKind::Push),
            self.git_ref.as_deref().unwrap_or(DEFAULT_REF),
        );
        event.action = self.action.clone();
        event.dispatch_type = self.dispatch_type.clone();
        Ok(event)
    }
}

fn load_event(path: &Path) -> Result<Event, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read event file {}: {}", path.display(), e))?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    if is_json {
        Ok(serde_json::from_str(&content)?)
    } else {
        Ok(serde_yaml::from_str(&content)?)
    }
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Set configuration value
    Set {
        /// Key
        key: String,

        /// Value
        value: String,
    },
}

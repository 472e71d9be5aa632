//! CLI configuration management.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// CLI configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Pipeline file used when a command gets no path.
    pub pipeline: PathBuf,
    /// Directory job commands run in.
    pub workspace: Option<PathBuf>,
    pub output_format: OutputFormat,
    pub log_format: LogFormat,
    pub secrets_file: Option<PathBuf>,
    pub timeout_seconds: Option<u64>,
    pub max_parallel: Option<usize>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            pipeline: PathBuf::from("gatehouse.yaml"),
            workspace: None,
            output_format: OutputFormat::default(),
            log_format: LogFormat::default(),
            secrets_file: None,
            timeout_seconds: Some(3600),
            max_parallel: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl CliConfig {
    /// Load configuration from the user config file.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from `path`. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&content)
            .map_err(|e| format!("Invalid config file {}: {}", path.display(), e).into())
    }

    /// Save configuration to file.
    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the configuration file path.
    pub fn config_path() -> Result<PathBuf, Box<dyn std::error::Error>> {
        let dirs = directories::ProjectDirs::from("dev", "gatehouse", "gatehouse")
            .ok_or("Could not determine config directory")?;
        Ok(dirs.config_dir().join("config.yaml"))
    }

    /// Set a configuration value. `none` clears optional keys.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), String> {
        let cleared = value.is_empty() || value == "none";
        match key {
            "pipeline" => self.pipeline = PathBuf::from(value),
            "workspace" => self.workspace = (!cleared).then(|| PathBuf::from(value)),
            "secrets_file" => self.secrets_file = (!cleared).then(|| PathBuf::from(value)),
            "output_format" => {
                self.output_format = match value {
                    "text" => OutputFormat::Text,
                    "json" => OutputFormat::Json,
                    _ => return Err(format!("Invalid output format: {}", value)),
                };
            }
            "log_format" => {
                self.log_format = match value {
                    "pretty" => LogFormat::Pretty,
                    "json" => LogFormat::Json,
                    _ => return Err(format!("Invalid log format: {}", value)),
                };
            }
            "timeout_seconds" => self.timeout_seconds = parse_optional(key, value)?,
            "max_parallel" => {
                self.max_parallel = parse_optional(key, value)?;
                if self.max_parallel == Some(0) {
                    return Err("max_parallel must be at least 1".to_string());
                }
            }
            _ => return Err(format!("Unknown config key: {}", key)),
        }
        Ok(())
    }
}

fn parse_optional<T: std::str::FromStr>(key: &str, value: &str) -> Result<Option<T>, String> {
    if value.is_empty() || value == "none" {
        return Ok(None);
    }
    value
        .parse()
        .map(Some)
        .map_err(|_| format!("Invalid value for {}: {}", key, value))
}

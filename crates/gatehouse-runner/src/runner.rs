//! Shared runner types.

use gatehouse_core::pipeline::NodeKey;
use std::path::PathBuf;

/// One line of job output, already masked.
#[derive(Debug, Clone)]
pub struct OutputLine {
    pub node: NodeKey,
    pub stream: OutputStream,
    pub content: String,
    pub line_number: u32,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Configuration for job execution.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Directory commands run in.
    pub workspace: PathBuf,
    pub timeout_seconds: Option<u64>,
}

/// Host variables a job sees. Everything else in the parent environment,
/// credentials included, stays out unless the job declares it as a secret.
pub const PASS_THROUGH_ENV: &[&str] = &["PATH", "HOME", "LANG", "LC_ALL", "TMPDIR", "TERM"];

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workspace: PathBuf::from("."),
            timeout_seconds: Some(3600), // 1 hour default
        }
    }
}

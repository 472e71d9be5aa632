//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the orchestration core and
//! the external job runner pool.

use crate::Result;
use crate::ids::{NodeId, RunId};
use crate::pipeline::{NodeKey, SecretReference};
use crate::run::NodeState;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;

/// Immutable artifact handed from a producer to its dependents.
#[derive(Clone, PartialEq, Eq)]
pub struct Artifact {
    pub key: String,
    pub payload: Vec<u8>,
    pub producer: NodeKey,
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifact")
            .field("key", &self.key)
            .field("size", &self.payload.len())
            .field("producer", &self.producer)
            .finish()
    }
}

/// Everything a runner needs to execute one node.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub run_id: RunId,
    pub node_id: NodeId,
    pub node: NodeKey,
    pub command: Option<String>,
    pub env: HashMap<String, String>,
    /// Artifacts this job consumes, fetched from the exchange.
    pub artifacts: Vec<Artifact>,
    /// Keys this job must publish on success.
    pub produces: Vec<String>,
    /// Credential references; resolved only by the runner.
    pub secrets: Vec<SecretReference>,
}

/// Terminal status a runner reports for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Succeeded,
    Failed,
}

impl From<JobStatus> for NodeState {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Succeeded => NodeState::Succeeded,
            JobStatus::Failed => NodeState::Failed,
        }
    }
}

/// What a runner hands back after executing a node.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub status: JobStatus,
    /// Published artifacts as `(key, payload)`.
    pub artifacts: Vec<(String, Vec<u8>)>,
    pub message: Option<String>,
    pub duration_ms: Option<u64>,
}

impl JobOutcome {
    pub fn succeeded() -> Self {
        Self {
            status: JobStatus::Succeeded,
            artifacts: Vec::new(),
            message: None,
            duration_ms: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            artifacts: Vec::new(),
            message: Some(message.into()),
            duration_ms: None,
        }
    }

    pub fn with_artifact(mut self, key: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        self.artifacts.push((key.into(), payload.into()));
        self
    }
}

/// External runner pool executing job nodes.
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Execute a node. An `Err` is recorded as a failed node.
    async fn run(&self, request: JobRequest) -> Result<JobOutcome>;

    /// Runner name for logging.
    fn name(&self) -> &str;
}

/// Receives node lifecycle notifications during a run.
pub trait RunObserver: Send + Sync {
    fn node_started(&self, _node: &NodeKey) {}

    fn node_finished(&self, _node: &NodeKey, _state: NodeState, _message: Option<&str>) {}
}

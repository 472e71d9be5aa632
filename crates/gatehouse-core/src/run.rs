//! Run and execution result types.

use crate::event::Event;
use crate::ids::{NodeId, RunId};
use crate::pipeline::NodeKey;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a job node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Pending,
    Blocked,
    Ready,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl NodeState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NodeState::Succeeded | NodeState::Failed | NodeState::Skipped
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, NodeState::Succeeded)
    }
}

/// Why a node never ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// The job's condition was false for this event.
    ConditionFalse,
    /// A node of a dependency job failed.
    UpstreamFailed { dependency: String },
    /// A node of a dependency job was skipped.
    UpstreamSkipped { dependency: String },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::ConditionFalse => write!(f, "condition not met"),
            SkipReason::UpstreamFailed { dependency } => {
                write!(f, "dependency '{}' failed", dependency)
            }
            SkipReason::UpstreamSkipped { dependency } => {
                write!(f, "dependency '{}' was skipped", dependency)
            }
        }
    }
}

/// Published artifact as it appears in a report. Never carries the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ArtifactSummary {
    pub key: String,
    pub producer: NodeKey,
    pub size_bytes: u64,
    pub sha256: String,
}

/// Terminal report for one node.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NodeReport {
    pub id: NodeId,
    pub node: NodeKey,
    pub state: NodeState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Verdict for the terminal deploy-class job.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GateReport {
    pub job: String,
    /// Job was eligible and every dependency node succeeded.
    pub open: bool,
    pub states: Vec<NodeState>,
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunResult {
    pub run_id: RunId,
    pub pipeline: String,
    pub event: Event,
    pub nodes: Vec<NodeReport>,
    pub artifacts: Vec<ArtifactSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate: Option<GateReport>,
    pub all_required_passed: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl RunResult {
    /// Process exit code: 0 when every required job passed.
    pub fn exit_code(&self) -> i32 {
        if self.all_required_passed { 0 } else { 1 }
    }

    pub fn count(&self, state: NodeState) -> usize {
        self.nodes.iter().filter(|n| n.state == state).count()
    }

    pub fn node(&self, key: &NodeKey) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| &n.node == key)
    }

    /// All reports belonging to one job, in expansion order.
    pub fn job(&self, job: &str) -> Vec<&NodeReport> {
        self.nodes.iter().filter(|n| n.node.job == job).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(NodeState::Succeeded.is_terminal());
        assert!(NodeState::Failed.is_terminal());
        assert!(NodeState::Skipped.is_terminal());
        assert!(!NodeState::Blocked.is_terminal());
        assert!(!NodeState::Running.is_terminal());
        assert!(!NodeState::Skipped.is_success());
    }

    #[test]
    fn test_skip_reason_serializes_tagged() {
        let reason = SkipReason::UpstreamFailed {
            dependency: "download-test-data".to_string(),
        };
        let json = serde_json::to_value(&reason).unwrap();
        assert_eq!(json["reason"], "upstream_failed");
        assert_eq!(json["dependency"], "download-test-data");
    }
}

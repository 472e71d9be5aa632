//! Aggregate success policy.
//!
//! Pure functions over the node-state vector of a run. A job's gate is open
//! when every node of every job it needs has succeeded; the terminal deploy
//! job is gated the same way as any other job.

use crate::dag::JobGraph;
use gatehouse_core::run::{NodeState, SkipReason};

/// Scheduling verdict for the nodes of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Every dependency node succeeded.
    Ready,
    /// Some dependency node has not reached a terminal state.
    Waiting,
    /// A dependency node failed or was skipped; the job can never run.
    Skip(SkipReason),
}

/// Compute readiness of `job` from the current node states.
///
/// A failed or skipped dependency node decides the verdict immediately,
/// even while sibling variants are still running.
pub fn readiness(graph: &JobGraph, states: &[NodeState], job: usize) -> Readiness {
    let mut waiting = false;

    for &dep in &graph.job(job).dependencies {
        let dependency = graph.job(dep).name().to_string();
        for node in &graph.job(dep).nodes {
            match states[node.index()] {
                NodeState::Succeeded => {}
                NodeState::Failed => {
                    return Readiness::Skip(SkipReason::UpstreamFailed { dependency });
                }
                NodeState::Skipped => {
                    return Readiness::Skip(SkipReason::UpstreamSkipped { dependency });
                }
                NodeState::Pending | NodeState::Blocked | NodeState::Ready | NodeState::Running => {
                    waiting = true;
                }
            }
        }
    }

    if waiting {
        Readiness::Waiting
    } else {
        Readiness::Ready
    }
}

/// Whether every dependency node of `job`, across all variants, succeeded.
pub fn is_gate_open(graph: &JobGraph, states: &[NodeState], job: usize) -> bool {
    graph.job(job).dependencies.iter().all(|&dep| {
        graph
            .job(dep)
            .nodes
            .iter()
            .all(|node| states[node.index()] == NodeState::Succeeded)
    })
}

/// Whether every node of `job` succeeded.
pub fn job_succeeded(graph: &JobGraph, states: &[NodeState], job: usize) -> bool {
    graph
        .job(job)
        .nodes
        .iter()
        .all(|node| states[node.index()] == NodeState::Succeeded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::DagBuilder;
    use gatehouse_core::pipeline::{JobSpec, PipelineDefinition};
    use serde_json::json;

    fn graph() -> JobGraph {
        DagBuilder::new()
            .build(&PipelineDefinition {
                name: "test".to_string(),
                description: None,
                gate: Some("deploy".to_string()),
                jobs: vec![
                    JobSpec::new("quality"),
                    JobSpec::new("tests").axis("os", vec![json!("linux"), json!("macos")]),
                    JobSpec::new("deploy").needs(&["quality", "tests"]),
                ],
            })
            .unwrap()
    }

    #[test]
    fn test_gate_opens_only_when_all_variants_succeed() {
        let graph = graph();
        let deploy = graph.job_by_name("deploy").unwrap();
        let mut states = vec![NodeState::Succeeded, NodeState::Succeeded, NodeState::Running, NodeState::Blocked];

        assert!(!is_gate_open(&graph, &states, deploy));
        assert_eq!(readiness(&graph, &states, deploy), Readiness::Waiting);

        // Late-finishing sibling variant flips the gate
        states[2] = NodeState::Succeeded;
        assert!(is_gate_open(&graph, &states, deploy));
        assert_eq!(readiness(&graph, &states, deploy), Readiness::Ready);
    }

    #[test]
    fn test_single_failed_variant_closes_gate() {
        let graph = graph();
        let deploy = graph.job_by_name("deploy").unwrap();
        let states = vec![NodeState::Succeeded, NodeState::Succeeded, NodeState::Failed, NodeState::Blocked];

        assert!(!is_gate_open(&graph, &states, deploy));
        assert_eq!(
            readiness(&graph, &states, deploy),
            Readiness::Skip(SkipReason::UpstreamFailed {
                dependency: "tests".to_string()
            })
        );
    }

    #[test]
    fn test_failure_decides_before_siblings_finish() {
        let graph = graph();
        let deploy = graph.job_by_name("deploy").unwrap();
        let states = vec![NodeState::Skipped, NodeState::Running, NodeState::Running, NodeState::Blocked];

        assert_eq!(
            readiness(&graph, &states, deploy),
            Readiness::Skip(SkipReason::UpstreamSkipped {
                dependency: "quality".to_string()
            })
        );
    }

    #[test]
    fn test_root_job_gate_always_open() {
        let graph = graph();
        let states = vec![NodeState::Pending; 4];
        let quality = graph.job_by_name("quality").unwrap();
        assert!(is_gate_open(&graph, &states, quality));
        assert_eq!(readiness(&graph, &states, quality), Readiness::Ready);
        assert!(!job_succeeded(&graph, &states, quality));
    }
}

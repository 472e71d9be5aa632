//! Static prediction of what a run would do for an event, assuming every
//! dispatched node succeeds.

use gatehouse_core::event::Event;
use gatehouse_core::pipeline::NodeKey;
use gatehouse_scheduler::JobGraph;
use gatehouse_scheduler::condition::eligible;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Run,
    SkipCondition,
    SkipUpstream { dependency: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedNode {
    pub node: NodeKey,
    #[serde(flatten)]
    pub verdict: Verdict,
}

#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub pipeline: String,
    pub event: Event,
    pub nodes: Vec<PlannedNode>,
    /// Gate job and whether it would run.
    pub gate: Option<(String, bool)>,
}

pub fn plan(graph: &JobGraph, event: &Event) -> Plan {
    let mut verdicts: Vec<Option<Verdict>> = vec![None; graph.jobs().len()];

    for &id in graph.topological_order() {
        let job = graph.node(id).job;
        if verdicts[job].is_some() {
            continue;
        }
        let compiled = graph.job(job);
        let verdict = if !eligible(compiled.condition.as_ref(), event) {
            Verdict::SkipCondition
        } else {
            compiled
                .dependencies
                .iter()
                .find(|&&dep| verdicts[dep] != Some(Verdict::Run))
                .map(|&dep| Verdict::SkipUpstream {
                    dependency: graph.job(dep).name().to_string(),
                })
                .unwrap_or(Verdict::Run)
        };
        verdicts[job] = Some(verdict);
    }

    let nodes = graph
        .topological_order()
        .iter()
        .map(|&id| {
            let node = graph.node(id);
            PlannedNode {
                node: node.key.clone(),
                verdict: verdicts[node.job].clone().unwrap_or(Verdict::Run),
            }
        })
        .collect();

    let gate = graph.gate().map(|job| {
        (
            graph.job(job).name().to_string(),
            verdicts[job] == Some(Verdict::Run),
        )
    });

    Plan {
        pipeline: graph.name().to_string(),
        event: event.clone(),
        nodes,
        gate,
    }
}

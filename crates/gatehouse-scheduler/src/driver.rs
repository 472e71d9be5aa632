//! Execution driver: the state machine behind a run.
//!
//! The driver never executes anything itself. It hands out [`JobRequest`]s
//! for nodes that became ready and takes back one [`JobOutcome`] at a time.
//! Each recorded outcome updates a single node and re-evaluates only that
//! node's direct dependents; skips propagate transitively from there.
//!
//! A node handed out as a request stays `Ready` until the caller reports it
//! started with [`ExecutionDriver::begin`]; only then is it `Running`.

use crate::artifacts::ArtifactExchange;
use crate::condition::eligible;
use crate::dag::JobGraph;
use crate::policy::{self, Readiness};
use chrono::{DateTime, Utc};
use gatehouse_core::event::Event;
use gatehouse_core::ids::{NodeId, RunId};
use gatehouse_core::ports::{JobOutcome, JobRequest, JobStatus};
use gatehouse_core::run::{GateReport, NodeReport, NodeState, RunResult, SkipReason};
use gatehouse_core::{Error, Result};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-node bookkeeping beyond the state itself.
#[derive(Debug, Clone, Default)]
struct NodeRecord {
    skip_reason: Option<SkipReason>,
    message: Option<String>,
    duration_ms: Option<u64>,
}

/// What a single state change caused.
#[derive(Debug, Default)]
pub struct Transition {
    /// Requests for nodes that became ready.
    pub ready: Vec<JobRequest>,
    /// Nodes skipped as a consequence, in the order they were settled.
    pub skipped: Vec<NodeId>,
}

pub struct ExecutionDriver {
    run_id: RunId,
    graph: Arc<JobGraph>,
    event: Event,
    eligible: Vec<bool>,
    states: Vec<NodeState>,
    records: Vec<NodeRecord>,
    artifacts: ArtifactExchange,
    running: usize,
    started: bool,
    started_at: DateTime<Utc>,
}

impl ExecutionDriver {
    /// Create a driver for one run. Conditions are evaluated here, once per
    /// job, against the event snapshot.
    pub fn new(graph: Arc<JobGraph>, event: Event) -> Self {
        let eligible: Vec<bool> = graph
            .jobs()
            .iter()
            .map(|job| {
                let ok = eligible(job.condition.as_ref(), &event);
                debug!(job = %job.name(), eligible = ok, "Evaluated job condition");
                ok
            })
            .collect();

        let node_count = graph.node_count();
        Self {
            run_id: RunId::new(),
            artifacts: ArtifactExchange::for_graph(&graph),
            graph,
            event,
            eligible,
            states: vec![NodeState::Pending; node_count],
            records: vec![NodeRecord::default(); node_count],
            running: 0,
            started: false,
            started_at: Utc::now(),
        }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn graph(&self) -> &JobGraph {
        &self.graph
    }

    pub fn state(&self, id: NodeId) -> NodeState {
        self.states[id.index()]
    }

    /// Runner message or downgrade reason recorded for a node.
    pub fn message(&self, id: NodeId) -> Option<&str> {
        self.records[id.index()].message.as_deref()
    }

    /// No node is pending, blocked, ready or running.
    pub fn is_finished(&self) -> bool {
        self.states.iter().all(NodeState::is_terminal)
    }

    /// Nodes begun and not yet recorded.
    pub fn running(&self) -> usize {
        self.running
    }

    /// Gate of a job by name: every dependency node succeeded.
    pub fn gate_open(&self, job: &str) -> Option<bool> {
        self.graph
            .job_by_name(job)
            .map(|idx| policy::is_gate_open(&self.graph, &self.states, idx))
    }

    /// Settle every node and dispatch the initial ready set.
    pub fn start(&mut self) -> Result<Transition> {
        if self.started {
            return Err(Error::InvariantViolation(format!(
                "run {} started twice",
                self.run_id
            )));
        }
        self.started = true;

        info!(
            run_id = %self.run_id,
            pipeline = %self.graph.name(),
            event = %self.event.kind,
            git_ref = %self.event.git_ref,
            nodes = self.graph.node_count(),
            "Starting run"
        );

        let order: Vec<NodeId> = self.graph.topological_order().to_vec();
        let mut ready = Vec::new();
        let mut skipped = Vec::new();
        for id in order {
            match self.settle(id) {
                NodeState::Ready => ready.push(id),
                NodeState::Skipped => skipped.push(id),
                _ => {}
            }
        }
        ready.sort();

        Ok(Transition {
            ready: self.dispatch(ready)?,
            skipped,
        })
    }

    /// Mark a dispatched node as handed to the runner.
    pub fn begin(&mut self, id: NodeId) -> Result<()> {
        let current = self.state(id);
        if current != NodeState::Ready {
            return Err(Error::InvariantViolation(format!(
                "{} started in state {:?}",
                self.graph.node(id).key,
                current
            )));
        }
        self.states[id.index()] = NodeState::Running;
        self.running += 1;
        debug!(node = %self.graph.node(id).key, "Node started");
        Ok(())
    }

    /// Record the terminal status of a running node and return what it
    /// caused: newly ready requests and newly skipped nodes.
    pub fn record(&mut self, id: NodeId, outcome: JobOutcome) -> Result<Transition> {
        let current = self.state(id);
        if current != NodeState::Running {
            return Err(Error::InvariantViolation(format!(
                "outcome reported for {} in state {:?}",
                self.graph.node(id).key,
                current
            )));
        }

        let node = self.graph.node(id).key.clone();
        let mut state = NodeState::from(outcome.status);
        let mut message = outcome.message;

        if outcome.status == JobStatus::Succeeded {
            match self.check_outputs(id, &outcome.artifacts) {
                Ok(()) => {
                    for (key, payload) in outcome.artifacts {
                        self.artifacts.publish(&key, payload, &node)?;
                    }
                }
                Err(problem) => {
                    warn!(node = %node, problem = %problem, "Node reported success with invalid artifacts");
                    state = NodeState::Failed;
                    message = Some(problem);
                }
            }
        }

        self.states[id.index()] = state;
        self.running -= 1;
        self.records[id.index()].message = message;
        self.records[id.index()].duration_ms = outcome.duration_ms;

        match state {
            NodeState::Succeeded => info!(node = %node, "Node succeeded"),
            _ => warn!(node = %node, "Node failed"),
        }

        let (ready, skipped) = self.propagate(id);
        Ok(Transition {
            ready: self.dispatch(ready)?,
            skipped,
        })
    }

    /// Build the final report. Fails if any node is still in flight.
    pub fn finish(mut self) -> Result<RunResult> {
        if !self.is_finished() {
            return Err(Error::InvariantViolation(format!(
                "run {} finished with unsettled nodes",
                self.run_id
            )));
        }

        let nodes: Vec<NodeReport> = self
            .graph
            .nodes()
            .map(|node| {
                let record = &self.records[node.id.index()];
                NodeReport {
                    id: node.id,
                    node: node.key.clone(),
                    state: self.states[node.id.index()],
                    skip_reason: record.skip_reason.clone(),
                    message: record.message.clone(),
                    duration_ms: record.duration_ms,
                }
            })
            .collect();

        let gate = self.graph.gate().map(|job| GateReport {
            job: self.graph.job(job).name().to_string(),
            open: self.eligible[job] && policy::is_gate_open(&self.graph, &self.states, job),
            states: self
                .graph
                .job(job)
                .nodes
                .iter()
                .map(|n| self.states[n.index()])
                .collect(),
        });

        let all_required_passed = match (&gate, self.graph.gate()) {
            (Some(report), Some(job)) => {
                report.open && policy::job_succeeded(&self.graph, &self.states, job)
            }
            _ => self.states.iter().all(NodeState::is_success),
        };

        let artifacts = self.artifacts.summaries();
        self.artifacts.clear();

        let completed_at = Utc::now();
        let result = RunResult {
            run_id: self.run_id,
            pipeline: self.graph.name().to_string(),
            event: self.event,
            nodes,
            artifacts,
            gate,
            all_required_passed,
            started_at: self.started_at,
            completed_at,
            duration_ms: (completed_at - self.started_at).num_milliseconds().max(0) as u64,
        };

        info!(
            run_id = %result.run_id,
            succeeded = result.count(NodeState::Succeeded),
            failed = result.count(NodeState::Failed),
            skipped = result.count(NodeState::Skipped),
            passed = result.all_required_passed,
            "Run finished"
        );

        Ok(result)
    }

    /// Move a pending or blocked node to the state its condition and
    /// dependencies allow. Returns the resulting state.
    fn settle(&mut self, id: NodeId) -> NodeState {
        let current = self.state(id);
        if !matches!(current, NodeState::Pending | NodeState::Blocked) {
            return current;
        }

        let job = self.graph.node(id).job;
        let next = if !self.eligible[job] {
            self.records[id.index()].skip_reason = Some(SkipReason::ConditionFalse);
            NodeState::Skipped
        } else {
            match policy::readiness(&self.graph, &self.states, job) {
                Readiness::Ready => NodeState::Ready,
                Readiness::Waiting => NodeState::Blocked,
                Readiness::Skip(reason) => {
                    self.records[id.index()].skip_reason = Some(reason);
                    NodeState::Skipped
                }
            }
        };

        if next == NodeState::Skipped {
            info!(
                node = %self.graph.node(id).key,
                reason = ?self.records[id.index()].skip_reason,
                "Node skipped"
            );
        }
        self.states[id.index()] = next;
        next
    }

    /// Re-check the dependents of a node that just reached a terminal
    /// state, following skips transitively.
    fn propagate(&mut self, from: NodeId) -> (Vec<NodeId>, Vec<NodeId>) {
        let mut ready = Vec::new();
        let mut skipped = Vec::new();
        let mut worklist: BTreeSet<NodeId> = self.graph.dependents(from).into_iter().collect();

        while let Some(id) = worklist.pop_first() {
            if self.state(id) != NodeState::Blocked {
                continue;
            }
            match self.settle(id) {
                NodeState::Ready => ready.push(id),
                NodeState::Skipped => {
                    skipped.push(id);
                    worklist.extend(self.graph.dependents(id));
                }
                _ => {}
            }
        }

        (ready, skipped)
    }

    /// Build runner requests for ready nodes.
    fn dispatch(&self, ready: Vec<NodeId>) -> Result<Vec<JobRequest>> {
        let mut requests = Vec::with_capacity(ready.len());

        for id in ready {
            let node = self.graph.node(id);
            let spec = &self.graph.job(node.job).spec;

            let mut artifacts = Vec::with_capacity(spec.consumes.len());
            for key in &spec.consumes {
                let artifact = self
                    .artifacts
                    .fetch(key, &node.key)
                    .map_err(|e| Error::InvariantViolation(e.to_string()))?;
                artifacts.push(artifact.clone());
            }

            requests.push(JobRequest {
                run_id: self.run_id,
                node_id: id,
                node: node.key.clone(),
                command: spec.run.clone(),
                env: spec.env.clone(),
                artifacts,
                produces: spec.produces.clone(),
                secrets: spec.secrets.clone(),
            });
            debug!(node = %node.key, "Node dispatched");
        }

        Ok(requests)
    }

    /// A successful node must publish exactly the keys it declares.
    fn check_outputs(
        &self,
        id: NodeId,
        artifacts: &[(String, Vec<u8>)],
    ) -> std::result::Result<(), String> {
        let spec = &self.graph.job(self.graph.node(id).job).spec;

        let mut seen = BTreeSet::new();
        for (key, _) in artifacts {
            if !spec.produces.contains(key) {
                return Err(format!("published undeclared artifact '{}'", key));
            }
            if !seen.insert(key.as_str()) {
                return Err(format!("published artifact '{}' twice", key));
            }
        }

        match spec.produces.iter().find(|key| !seen.contains(key.as_str())) {
            Some(missing) => Err(format!("did not publish declared artifact '{}'", missing)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::DagBuilder;
    use gatehouse_core::event::EventKind;
    use gatehouse_core::pipeline::{JobSpec, PipelineDefinition};
    use serde_json::json;

    fn build(gate: Option<&str>, jobs: Vec<JobSpec>) -> Arc<JobGraph> {
        Arc::new(
            DagBuilder::new()
                .build(&PipelineDefinition {
                    name: "release".to_string(),
                    description: None,
                    gate: gate.map(str::to_string),
                    jobs,
                })
                .unwrap(),
        )
    }

    fn push_main() -> Event {
        Event::new(EventKind::Push, "refs/heads/main")
    }

    fn names(requests: &[JobRequest]) -> Vec<String> {
        requests.iter().map(|r| r.node.to_string()).collect()
    }

    /// Start every request the transition handed out, as a runner would.
    fn launch(driver: &mut ExecutionDriver, transition: Transition) -> Vec<JobRequest> {
        for request in &transition.ready {
            driver.begin(request.node_id).unwrap();
        }
        transition.ready
    }

    fn start(driver: &mut ExecutionDriver) -> Vec<JobRequest> {
        let transition = driver.start().unwrap();
        launch(driver, transition)
    }

    fn record(driver: &mut ExecutionDriver, id: NodeId, outcome: JobOutcome) -> Vec<JobRequest> {
        let transition = driver.record(id, outcome).unwrap();
        launch(driver, transition)
    }

    #[test]
    fn test_linear_run_succeeds() {
        let graph = build(
            Some("deploy"),
            vec![
                JobSpec::new("build"),
                JobSpec::new("test").needs(&["build"]),
                JobSpec::new("deploy").needs(&["test"]),
            ],
        );
        let mut driver = ExecutionDriver::new(graph, push_main());

        let first = start(&mut driver);
        assert_eq!(names(&first), vec!["build"]);
        assert_eq!(driver.state(NodeId::new(1)), NodeState::Blocked);

        let second = record(&mut driver, first[0].node_id, JobOutcome::succeeded());
        assert_eq!(names(&second), vec!["test"]);
        let third = record(&mut driver, second[0].node_id, JobOutcome::succeeded());
        assert_eq!(names(&third), vec!["deploy"]);
        assert_eq!(driver.gate_open("deploy"), Some(true));
        assert!(record(&mut driver, third[0].node_id, JobOutcome::succeeded()).is_empty());

        assert!(driver.is_finished());
        let result = driver.finish().unwrap();
        assert!(result.all_required_passed);
        assert_eq!(result.exit_code(), 0);
        assert!(result.gate.unwrap().open);
    }

    #[test]
    fn test_condition_false_skips_dependents() {
        let graph = build(
            None,
            vec![
                JobSpec::new("docs").when("event.kind == 'release'"),
                JobSpec::new("publish-docs").needs(&["docs"]),
                JobSpec::new("lint"),
            ],
        );
        let mut driver = ExecutionDriver::new(graph, push_main());

        let transition = driver.start().unwrap();
        assert_eq!(names(&transition.ready), vec!["lint"]);
        let mut skipped = transition.skipped.clone();
        skipped.sort();
        assert_eq!(skipped, vec![NodeId::new(0), NodeId::new(1)]);
        assert_eq!(driver.state(NodeId::new(0)), NodeState::Skipped);
        assert_eq!(driver.state(NodeId::new(1)), NodeState::Skipped);

        let requests = launch(&mut driver, transition);
        record(&mut driver, requests[0].node_id, JobOutcome::succeeded());
        let result = driver.finish().unwrap();
        assert_eq!(
            result.nodes[1].skip_reason,
            Some(SkipReason::UpstreamSkipped {
                dependency: "docs".to_string()
            })
        );
        assert!(!result.all_required_passed);
    }

    #[test]
    fn test_failed_variant_skips_dependents_transitively() {
        let graph = build(
            Some("deploy"),
            vec![
                JobSpec::new("tests").axis("os", vec![json!("linux"), json!("macos")]),
                JobSpec::new("package").needs(&["tests"]),
                JobSpec::new("deploy").needs(&["package"]),
            ],
        );
        let mut driver = ExecutionDriver::new(graph, push_main());
        let requests = start(&mut driver);
        assert_eq!(requests.len(), 2);

        let transition = driver
            .record(requests[0].node_id, JobOutcome::failed("exit code 1"))
            .unwrap();
        assert!(transition.ready.is_empty());
        // Skip is decided while the sibling variant is still running
        assert_eq!(transition.skipped, vec![NodeId::new(2), NodeId::new(3)]);
        assert_eq!(driver.state(NodeId::new(2)), NodeState::Skipped);
        assert_eq!(driver.state(NodeId::new(3)), NodeState::Skipped);
        assert!(!driver.is_finished());

        let transition = driver.record(requests[1].node_id, JobOutcome::succeeded()).unwrap();
        assert!(transition.ready.is_empty());
        assert!(transition.skipped.is_empty());

        let result = driver.finish().unwrap();
        assert!(!result.all_required_passed);
        assert_eq!(result.nodes[0].message.as_deref(), Some("exit code 1"));
        let gate = result.gate.unwrap();
        assert!(!gate.open);
        assert_eq!(gate.states, vec![NodeState::Skipped]);
    }

    #[test]
    fn test_artifacts_flow_to_consumers() {
        let graph = build(
            None,
            vec![
                JobSpec::new("download").produces(&["data"]),
                JobSpec::new("tests").needs(&["download"]).consumes(&["data"]),
            ],
        );
        let mut driver = ExecutionDriver::new(graph, push_main());
        let requests = start(&mut driver);
        assert_eq!(requests[0].produces, vec!["data"]);

        let next = record(
            &mut driver,
            requests[0].node_id,
            JobOutcome::succeeded().with_artifact("data", b"payload".to_vec()),
        );
        assert_eq!(next[0].artifacts.len(), 1);
        assert_eq!(next[0].artifacts[0].payload, b"payload");

        record(&mut driver, next[0].node_id, JobOutcome::succeeded());
        let result = driver.finish().unwrap();
        assert_eq!(result.artifacts.len(), 1);
        assert_eq!(result.artifacts[0].producer.job, "download");
    }

    #[test]
    fn test_success_without_declared_artifact_fails_node() {
        let graph = build(
            None,
            vec![
                JobSpec::new("download").produces(&["data"]),
                JobSpec::new("tests").needs(&["download"]).consumes(&["data"]),
            ],
        );
        let mut driver = ExecutionDriver::new(graph, push_main());
        let requests = start(&mut driver);

        let next = record(&mut driver, requests[0].node_id, JobOutcome::succeeded());
        assert!(next.is_empty());
        assert_eq!(driver.state(NodeId::new(0)), NodeState::Failed);
        assert_eq!(driver.state(NodeId::new(1)), NodeState::Skipped);
    }

    #[test]
    fn test_undeclared_artifact_fails_node() {
        let graph = build(None, vec![JobSpec::new("build")]);
        let mut driver = ExecutionDriver::new(graph, push_main());
        let requests = start(&mut driver);

        record(
            &mut driver,
            requests[0].node_id,
            JobOutcome::succeeded().with_artifact("wheel", vec![1]),
        );
        let result = driver.finish().unwrap();
        assert_eq!(result.nodes[0].state, NodeState::Failed);
        assert!(result.nodes[0].message.as_deref().unwrap().contains("undeclared"));
    }

    #[test]
    fn test_outcome_for_idle_node_is_invariant_violation() {
        let graph = build(None, vec![JobSpec::new("a"), JobSpec::new("b").needs(&["a"])]);
        let mut driver = ExecutionDriver::new(graph, push_main());
        start(&mut driver);

        let err = driver.record(NodeId::new(1), JobOutcome::succeeded()).unwrap_err();
        assert!(matches!(err, Error::InvariantViolation(_)));
        assert!(matches!(driver.begin(NodeId::new(1)), Err(Error::InvariantViolation(_))));
        assert!(matches!(driver.start(), Err(Error::InvariantViolation(_))));
    }

    #[test]
    fn test_dispatched_node_is_running_only_once_begun() {
        let graph = build(None, vec![JobSpec::new("a"), JobSpec::new("b")]);
        let mut driver = ExecutionDriver::new(graph, push_main());

        let requests = driver.start().unwrap().ready;
        assert_eq!(requests.len(), 2);
        assert_eq!(driver.running(), 0);
        assert_eq!(driver.state(requests[1].node_id), NodeState::Ready);

        // A queued request cannot report an outcome before it starts
        let err = driver
            .record(requests[1].node_id, JobOutcome::succeeded())
            .unwrap_err();
        assert!(matches!(err, Error::InvariantViolation(_)));

        driver.begin(requests[0].node_id).unwrap();
        assert_eq!(driver.running(), 1);
        assert_eq!(driver.state(requests[1].node_id), NodeState::Ready);
        assert!(driver.finish().is_err());
    }
}

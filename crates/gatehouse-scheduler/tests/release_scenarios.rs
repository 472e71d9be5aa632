//! End-to-end runs of release pipelines against a scripted runner.

use async_trait::async_trait;
use gatehouse_core::event::{Event, EventKind};
use gatehouse_core::pipeline::{NodeKey, PipelineDefinition};
use gatehouse_core::ports::{JobOutcome, JobRequest, JobRunner, RunObserver};
use gatehouse_core::run::{NodeState, SkipReason};
use gatehouse_core::Result;
use gatehouse_scheduler::Scheduler;
use pretty_assertions::assert_eq;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const RELEASE_PIPELINE: &str = r#"
name: release
gate: deploy
jobs:
  - name: quality
    if: event.kind == 'push' || event.kind == 'release'
  - name: download-test-data
    produces: [test-data]
  - name: short-tests
    needs: download-test-data
    consumes: [test-data]
    matrix:
      platform: [ubuntu, macos, windows]
      version: ["3.8", "3.9", "3.10"]
  - name: deploy
    needs: [quality, short-tests]
    if: event.kind == 'release' && event.action == 'created'
"#;

/// Runner that fails selected jobs and publishes every declared artifact.
#[derive(Default)]
struct ScriptedRunner {
    failing: HashSet<String>,
    slow: HashSet<String>,
    started: Mutex<Vec<String>>,
    received: Mutex<Vec<(String, Vec<String>)>>,
}

impl ScriptedRunner {
    fn failing(jobs: &[&str]) -> Self {
        Self {
            failing: jobs.iter().map(|j| j.to_string()).collect(),
            ..Default::default()
        }
    }

    fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobRunner for ScriptedRunner {
    async fn run(&self, request: JobRequest) -> Result<JobOutcome> {
        self.started.lock().unwrap().push(request.node.to_string());
        self.received.lock().unwrap().push((
            request.node.job.clone(),
            request.artifacts.iter().map(|a| a.key.clone()).collect(),
        ));

        if self.slow.contains(&request.node.job) {
            tokio::time::sleep(Duration::from_millis(30)).await;
        }
        if self.failing.contains(&request.node.job) {
            return Ok(JobOutcome::failed("exit code 1"));
        }

        let mut outcome = JobOutcome::succeeded();
        for key in &request.produces {
            outcome = outcome.with_artifact(key.clone(), format!("{} output", request.node.job));
        }
        Ok(outcome)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[derive(Default)]
struct RecordingObserver {
    events: Mutex<Vec<(String, Option<NodeState>)>>,
}

impl RunObserver for RecordingObserver {
    fn node_started(&self, node: &NodeKey) {
        self.events.lock().unwrap().push((node.to_string(), None));
    }

    fn node_finished(&self, node: &NodeKey, state: NodeState, _message: Option<&str>) {
        self.events.lock().unwrap().push((node.to_string(), Some(state)));
    }
}

fn pipeline() -> PipelineDefinition {
    PipelineDefinition::from_yaml(RELEASE_PIPELINE).unwrap()
}

fn release_created() -> Event {
    Event::new(EventKind::Release, "refs/tags/v1.0.0").with_action("created")
}

#[tokio::test]
async fn test_push_runs_checks_but_skips_deploy() {
    let runner = Arc::new(ScriptedRunner::default());
    let scheduler = Scheduler::new(runner.clone());

    let result = scheduler
        .run(&pipeline(), Event::new(EventKind::Push, "main"))
        .await
        .unwrap();

    assert_eq!(result.count(NodeState::Succeeded), 11);
    let deploy = result.job("deploy");
    assert_eq!(deploy.len(), 1);
    assert_eq!(deploy[0].state, NodeState::Skipped);
    assert_eq!(deploy[0].skip_reason, Some(SkipReason::ConditionFalse));
    assert!(!runner.started().contains(&"deploy".to_string()));

    let gate = result.gate.as_ref().unwrap();
    assert!(!gate.open);
    assert!(!result.all_required_passed);
    assert_eq!(result.exit_code(), 1);
}

#[tokio::test]
async fn test_release_deploys_after_all_variants() {
    let runner = Arc::new(ScriptedRunner::default());
    let scheduler = Scheduler::new(runner.clone());

    let result = scheduler.run(&pipeline(), release_created()).await.unwrap();

    assert_eq!(result.count(NodeState::Succeeded), 12);
    assert!(result.all_required_passed);
    assert_eq!(result.exit_code(), 0);

    let started = runner.started();
    let deploy_at = started.iter().position(|n| n == "deploy").unwrap();
    assert_eq!(deploy_at, started.len() - 1);

    assert_eq!(result.artifacts.len(), 1);
    assert_eq!(result.artifacts[0].key, "test-data");

    let received = runner.received.lock().unwrap();
    assert!(
        received
            .iter()
            .filter(|(job, _)| job == "short-tests")
            .all(|(_, keys)| keys == &vec!["test-data".to_string()])
    );
}

#[tokio::test]
async fn test_failed_download_skips_every_variant() {
    let runner = Arc::new(ScriptedRunner::failing(&["download-test-data"]));
    let scheduler = Scheduler::new(runner.clone());

    let result = scheduler.run(&pipeline(), release_created()).await.unwrap();

    let variants = result.job("short-tests");
    assert_eq!(variants.len(), 9);
    for variant in &variants {
        assert_eq!(variant.state, NodeState::Skipped);
        assert_eq!(
            variant.skip_reason,
            Some(SkipReason::UpstreamFailed {
                dependency: "download-test-data".to_string()
            })
        );
    }
    assert!(runner.started().iter().all(|n| !n.starts_with("short-tests")));

    assert_eq!(result.job("deploy")[0].state, NodeState::Skipped);
    assert_eq!(result.job("quality")[0].state, NodeState::Succeeded);
    assert_eq!(result.exit_code(), 1);
}

#[tokio::test]
async fn test_failed_sibling_dependency_closes_gate() {
    let runner = Arc::new(ScriptedRunner {
        failing: HashSet::from(["quality".to_string()]),
        slow: HashSet::from(["short-tests".to_string()]),
        ..Default::default()
    });
    let scheduler = Scheduler::new(runner.clone());

    let result = scheduler.run(&pipeline(), release_created()).await.unwrap();

    // Variants still running when quality failed finish normally
    assert_eq!(result.job("short-tests").len(), 9);
    assert!(
        result
            .job("short-tests")
            .iter()
            .all(|n| n.state == NodeState::Succeeded)
    );
    assert_eq!(result.job("deploy")[0].state, NodeState::Skipped);
    assert_eq!(result.gate.unwrap().states, vec![NodeState::Skipped]);
    assert!(!result.all_required_passed);
}

#[tokio::test]
async fn test_observer_sees_every_node_once() {
    let runner = Arc::new(ScriptedRunner::failing(&["download-test-data"]));
    let observer = Arc::new(RecordingObserver::default());
    let scheduler = Scheduler::new(runner).with_observer(observer.clone());

    let result = scheduler.run(&pipeline(), release_created()).await.unwrap();

    let events = observer.events.lock().unwrap();
    let finished: Vec<&String> = events
        .iter()
        .filter(|(_, state)| state.is_some())
        .map(|(node, _)| node)
        .collect();
    assert_eq!(finished.len(), result.nodes.len());
    let unique: HashSet<&String> = finished.iter().copied().collect();
    assert_eq!(unique.len(), result.nodes.len());

    let started = events.iter().filter(|(_, state)| state.is_none()).count();
    assert_eq!(started, 2);

    // Nine short-tests variants plus deploy, each reported as it was skipped
    let skipped = events
        .iter()
        .filter(|(_, state)| *state == Some(NodeState::Skipped))
        .count();
    assert_eq!(skipped, 10);
    assert_eq!(skipped, result.count(NodeState::Skipped));
}

#[tokio::test]
async fn test_no_gate_requires_every_node() {
    let mut definition = pipeline();
    definition.gate = None;
    let scheduler = Scheduler::new(Arc::new(ScriptedRunner::default()));

    let result = scheduler
        .run(&definition, Event::new(EventKind::Push, "main"))
        .await
        .unwrap();

    assert!(result.gate.is_none());
    assert!(!result.all_required_passed);

    let result = scheduler.run(&definition, release_created()).await.unwrap();
    assert!(result.all_required_passed);
}

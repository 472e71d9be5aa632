//! Async run loop.
//!
//! Feeds [`ExecutionDriver`] requests to a [`JobRunner`] through a
//! `JoinSet` and hands completions back one at a time, so the driver stays
//! the only owner of run state.

use crate::dag::{DagBuilder, JobGraph};
use crate::driver::{ExecutionDriver, Transition};
use futures::FutureExt;
use gatehouse_core::event::Event;
use gatehouse_core::ids::NodeId;
use gatehouse_core::pipeline::{NodeKey, PipelineDefinition};
use gatehouse_core::ports::{JobOutcome, JobRequest, JobRunner, RunObserver};
use gatehouse_core::run::{NodeState, RunResult};
use gatehouse_core::{Error, Result};
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, info_span, warn};

pub struct Scheduler {
    runner: Arc<dyn JobRunner>,
    observer: Option<Arc<dyn RunObserver>>,
    dag_builder: DagBuilder,
    /// Upper bound on concurrently running nodes. `None` runs every ready
    /// node at once.
    max_parallel: Option<usize>,
}

impl Scheduler {
    pub fn new(runner: Arc<dyn JobRunner>) -> Self {
        Self {
            runner,
            observer: None,
            dag_builder: DagBuilder::new(),
            max_parallel: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = Some(max_parallel.max(1));
        self
    }

    /// Validate a definition and compile it into a graph.
    pub fn plan(&self, pipeline: &PipelineDefinition) -> Result<JobGraph> {
        Ok(self.dag_builder.build(pipeline)?)
    }

    /// Validate and run a pipeline for one event.
    pub async fn run(&self, pipeline: &PipelineDefinition, event: Event) -> Result<RunResult> {
        let graph = Arc::new(self.plan(pipeline)?);
        self.run_graph(graph, event).await
    }

    /// Run an already compiled graph.
    pub async fn run_graph(&self, graph: Arc<JobGraph>, event: Event) -> Result<RunResult> {
        let mut driver = ExecutionDriver::new(graph, event);
        let span = info_span!("run", run_id = %driver.run_id(), pipeline = %driver.graph().name());

        async move {
            let mut queue: VecDeque<JobRequest> = VecDeque::new();
            let initial = driver.start()?;
            self.announce_skips(&driver, &initial);
            queue.extend(initial.ready);

            let mut join_set = JoinSet::new();
            loop {
                while self.has_capacity(driver.running()) {
                    let Some(request) = queue.pop_front() else {
                        break;
                    };
                    driver.begin(request.node_id)?;
                    self.spawn(&mut join_set, request);
                }

                let Some(joined) = join_set.join_next().await else {
                    break;
                };
                let (node_id, node, outcome) =
                    joined.map_err(|e| Error::Internal(format!("Job task aborted: {}", e)))?;

                let transition = driver.record(node_id, outcome)?;

                if let Some(observer) = &self.observer {
                    observer.node_finished(&node, driver.state(node_id), driver.message(node_id));
                }
                self.announce_skips(&driver, &transition);
                queue.extend(transition.ready);
            }

            if !queue.is_empty() {
                return Err(Error::InvariantViolation(format!(
                    "{} dispatched nodes were never started",
                    queue.len()
                )));
            }

            driver.finish()
        }
        .instrument(span)
        .await
    }

    fn has_capacity(&self, running: usize) -> bool {
        self.max_parallel.is_none_or(|max| running < max)
    }

    fn spawn(
        &self,
        join_set: &mut JoinSet<(NodeId, NodeKey, JobOutcome)>,
        request: JobRequest,
    ) {
        if let Some(observer) = &self.observer {
            observer.node_started(&request.node);
        }

        let runner = self.runner.clone();
        let node_id = request.node_id;
        let node = request.node.clone();
        let span = info_span!("node", node = %node, runner = %runner.name());

        join_set.spawn(
            async move {
                debug!("Executing node");
                let started = Instant::now();
                let mut outcome = match AssertUnwindSafe(runner.run(request)).catch_unwind().await {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(e)) => {
                        warn!(error = %e, "Runner failed");
                        JobOutcome::failed(e.to_string())
                    }
                    Err(_) => {
                        warn!("Runner panicked");
                        JobOutcome::failed("runner panicked")
                    }
                };
                if outcome.duration_ms.is_none() {
                    outcome.duration_ms = Some(started.elapsed().as_millis() as u64);
                }
                (node_id, node, outcome)
            }
            .instrument(span),
        );
    }

    fn announce_skips(&self, driver: &ExecutionDriver, transition: &Transition) {
        let Some(observer) = &self.observer else {
            return;
        };
        for &id in &transition.skipped {
            observer.node_finished(&driver.graph().node(id).key, NodeState::Skipped, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gatehouse_core::event::EventKind;
    use gatehouse_core::pipeline::JobSpec;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Tracks peak concurrency.
    #[derive(Default)]
    struct CountingRunner {
        active: AtomicUsize,
        peak: AtomicUsize,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl JobRunner for CountingRunner {
        async fn run(&self, request: JobRequest) -> Result<JobOutcome> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(request.node.to_string());
            Ok(JobOutcome::succeeded())
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    struct PanickingRunner;

    #[async_trait]
    impl JobRunner for PanickingRunner {
        async fn run(&self, _request: JobRequest) -> Result<JobOutcome> {
            panic!("boom");
        }

        fn name(&self) -> &str {
            "panicking"
        }
    }

    fn pipeline(jobs: Vec<JobSpec>) -> PipelineDefinition {
        PipelineDefinition {
            name: "ci".to_string(),
            description: None,
            gate: None,
            jobs,
        }
    }

    fn push() -> Event {
        Event::new(EventKind::Push, "refs/heads/main")
    }

    #[tokio::test]
    async fn test_max_parallel_bounds_concurrency() {
        let runner = Arc::new(CountingRunner::default());
        let scheduler = Scheduler::new(runner.clone()).with_max_parallel(2);
        let jobs = (0..6).map(|i| JobSpec::new(format!("job-{}", i))).collect();

        let result = scheduler.run(&pipeline(jobs), push()).await.unwrap();

        assert!(result.all_required_passed);
        assert_eq!(runner.seen.lock().unwrap().len(), 6);
        assert!(runner.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_independent_jobs_run_concurrently() {
        let runner = Arc::new(CountingRunner::default());
        let scheduler = Scheduler::new(runner.clone());
        let jobs = (0..4).map(|i| JobSpec::new(format!("job-{}", i))).collect();

        scheduler.run(&pipeline(jobs), push()).await.unwrap();
        assert!(runner.peak.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn test_panicking_runner_fails_node() {
        let scheduler = Scheduler::new(Arc::new(PanickingRunner));
        let result = scheduler
            .run(
                &pipeline(vec![JobSpec::new("a"), JobSpec::new("b").needs(&["a"])]),
                push(),
            )
            .await
            .unwrap();

        assert_eq!(result.nodes[0].state, NodeState::Failed);
        assert_eq!(result.nodes[0].message.as_deref(), Some("runner panicked"));
        assert_eq!(result.nodes[1].state, NodeState::Skipped);
        assert_eq!(result.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_invalid_pipeline_is_rejected_before_running() {
        let runner = Arc::new(CountingRunner::default());
        let scheduler = Scheduler::new(runner.clone());
        let err = scheduler
            .run(&pipeline(vec![JobSpec::new("a").needs(&["missing"])]), push())
            .await
            .unwrap_err();

        assert!(err.is_config());
        assert!(runner.seen.lock().unwrap().is_empty());
    }
}

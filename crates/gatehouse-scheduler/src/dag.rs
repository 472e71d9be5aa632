//! DAG construction and static validation for pipeline jobs.
//!
//! Every job is expanded into one node per matrix variant (a job without a
//! matrix is a matrix of one). Nodes live in a petgraph arena and are
//! addressed by [`NodeId`]; dependency edges run from every variant of a
//! dependency to every variant of the dependent job.

use crate::condition::{Condition, ConditionError};
use crate::matrix::{MatrixError, MatrixExpander};
use gatehouse_core::ConfigError;
use gatehouse_core::ids::NodeId;
use gatehouse_core::pipeline::{JobSpec, NodeKey, PipelineDefinition};
use petgraph::Direction;
use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;
use tracing::debug;

/// A job after validation: parsed condition and resolved dependencies.
#[derive(Debug, Clone)]
pub struct CompiledJob {
    pub spec: JobSpec,
    pub condition: Option<Condition>,
    /// Indices of the jobs this job needs.
    pub dependencies: Vec<usize>,
    /// Nodes this job expanded into, in matrix order.
    pub nodes: Vec<NodeId>,
}

impl CompiledJob {
    pub fn name(&self) -> &str {
        &self.spec.name
    }
}

/// One concrete, schedulable unit.
#[derive(Debug, Clone)]
pub struct JobNode {
    pub id: NodeId,
    pub key: NodeKey,
    /// Index of the owning job.
    pub job: usize,
}

/// Directed acyclic graph of job nodes.
#[derive(Debug)]
pub struct JobGraph {
    name: String,
    jobs: Vec<CompiledJob>,
    graph: DiGraph<JobNode, ()>,
    job_index: HashMap<String, usize>,
    producers: HashMap<String, usize>,
    gate: Option<usize>,
    order: Vec<NodeId>,
}

impl JobGraph {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn jobs(&self) -> &[CompiledJob] {
        &self.jobs
    }

    pub fn job(&self, index: usize) -> &CompiledJob {
        &self.jobs[index]
    }

    pub fn job_by_name(&self, name: &str) -> Option<usize> {
        self.job_index.get(name).copied()
    }

    /// Job index of the terminal deploy-class job, if configured.
    pub fn gate(&self) -> Option<usize> {
        self.gate
    }

    /// Every declared artifact key with the job producing it.
    pub fn producers(&self) -> impl Iterator<Item = (&str, usize)> {
        self.producers.iter().map(|(key, &job)| (key.as_str(), job))
    }

    pub fn node(&self, id: NodeId) -> &JobNode {
        &self.graph[NodeIndex::new(id.index())]
    }

    pub fn nodes(&self) -> impl Iterator<Item = &JobNode> {
        self.graph.node_weights()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Nodes that directly depend on `id`.
    pub fn dependents(&self, id: NodeId) -> Vec<NodeId> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// Nodes `id` directly depends on.
    pub fn dependencies(&self, id: NodeId) -> Vec<NodeId> {
        self.neighbors(id, Direction::Incoming)
    }

    fn neighbors(&self, id: NodeId, direction: Direction) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .graph
            .neighbors_directed(NodeIndex::new(id.index()), direction)
            .map(|idx| NodeId::new(idx.index()))
            .collect();
        ids.sort();
        ids
    }

    /// Nodes with no dependencies.
    pub fn roots(&self) -> Vec<NodeId> {
        self.order
            .iter()
            .copied()
            .filter(|&id| self.dependencies(id).is_empty())
            .collect()
    }

    /// Nodes in dependency order.
    pub fn topological_order(&self) -> &[NodeId] {
        &self.order
    }
}

/// Builder for constructing job graphs.
pub struct DagBuilder {
    matrix_expander: MatrixExpander,
}

impl DagBuilder {
    pub fn new() -> Self {
        Self {
            matrix_expander: MatrixExpander::new(),
        }
    }

    /// Validate a pipeline definition and build its node graph.
    pub fn build(&self, pipeline: &PipelineDefinition) -> Result<JobGraph, ConfigError> {
        if pipeline.jobs.is_empty() {
            return Err(ConfigError::EmptyPipeline);
        }

        let mut job_index = HashMap::new();
        for (idx, job) in pipeline.jobs.iter().enumerate() {
            if job_index.insert(job.name.clone(), idx).is_some() {
                return Err(ConfigError::DuplicateJob(job.name.clone()));
            }
        }

        // Job-level graph for cycle detection and reachability
        let mut job_graph: DiGraph<usize, ()> = DiGraph::new();
        let job_nodes: Vec<NodeIndex> = (0..pipeline.jobs.len())
            .map(|idx| job_graph.add_node(idx))
            .collect();

        let mut dependencies = Vec::with_capacity(pipeline.jobs.len());
        for (idx, job) in pipeline.jobs.iter().enumerate() {
            let mut deps: Vec<usize> = Vec::new();
            for dep in &job.needs {
                let dep_idx = *job_index
                    .get(dep)
                    .ok_or_else(|| ConfigError::UnknownDependency {
                        job: job.name.clone(),
                        dependency: dep.clone(),
                    })?;
                if !deps.contains(&dep_idx) {
                    deps.push(dep_idx);
                    job_graph.add_edge(job_nodes[dep_idx], job_nodes[idx], ());
                }
            }
            dependencies.push(deps);
        }

        toposort(&job_graph, None).map_err(|cycle| ConfigError::Cycle {
            job: pipeline.jobs[job_graph[cycle.node_id()]].name.clone(),
        })?;

        let mut graph = DiGraph::new();
        let mut jobs = Vec::with_capacity(pipeline.jobs.len());

        for ((idx, job), deps) in pipeline.jobs.iter().enumerate().zip(dependencies) {
            let condition = job
                .condition
                .as_deref()
                .map(Condition::parse)
                .transpose()
                .map_err(|e| condition_error(&job.name, e))?;

            let variants = self
                .matrix_expander
                .expand(job.matrix.as_ref())
                .map_err(|MatrixError::EmptyAxis(axis)| ConfigError::EmptyMatrixAxis {
                    job: job.name.clone(),
                    axis,
                })?;

            let nodes = variants
                .into_iter()
                .map(|variant| {
                    let id = NodeId::new(graph.node_count());
                    graph.add_node(JobNode {
                        id,
                        key: NodeKey::new(job.name.clone(), variant),
                        job: idx,
                    });
                    id
                })
                .collect();

            jobs.push(CompiledJob {
                spec: job.clone(),
                condition,
                dependencies: deps,
                nodes,
            });
        }

        // Fan-in edges: every dependency variant -> every dependent variant
        for job in &jobs {
            for &dep in &job.dependencies {
                for &from in &jobs[dep].nodes {
                    for &to in &job.nodes {
                        graph.add_edge(NodeIndex::new(from.index()), NodeIndex::new(to.index()), ());
                    }
                }
            }
        }

        let producers = validate_artifacts(&jobs, &job_graph, &job_nodes)?;

        let gate = match &pipeline.gate {
            Some(name) => Some(
                *job_index
                    .get(name)
                    .ok_or_else(|| ConfigError::UnknownGateJob(name.clone()))?,
            ),
            None => None,
        };

        let order = toposort(&graph, None)
            .map_err(|cycle| ConfigError::Cycle {
                job: graph[cycle.node_id()].key.job.clone(),
            })?
            .into_iter()
            .map(|idx| NodeId::new(idx.index()))
            .collect();

        debug!(
            pipeline = %pipeline.name,
            jobs = jobs.len(),
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "Built job graph"
        );

        Ok(JobGraph {
            name: pipeline.name.clone(),
            jobs,
            graph,
            job_index,
            producers,
            gate,
            order,
        })
    }
}

impl Default for DagBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn condition_error(job: &str, err: ConditionError) -> ConfigError {
    match err {
        ConditionError::UnknownAttribute(attribute) => ConfigError::UnknownAttribute {
            job: job.to_string(),
            attribute,
        },
        other => ConfigError::MalformedCondition {
            job: job.to_string(),
            message: other.to_string(),
        },
    }
}

/// Check single-producer and upstream-only artifact rules.
fn validate_artifacts(
    jobs: &[CompiledJob],
    job_graph: &DiGraph<usize, ()>,
    job_nodes: &[NodeIndex],
) -> Result<HashMap<String, usize>, ConfigError> {
    let mut producers: HashMap<String, usize> = HashMap::new();

    for (idx, job) in jobs.iter().enumerate() {
        for key in job.spec.produces.iter().chain(&job.spec.consumes) {
            if !is_valid_key(key) {
                return Err(ConfigError::InvalidArtifactKey {
                    job: job.name().to_string(),
                    key: key.clone(),
                });
            }
        }
        for key in &job.spec.produces {
            if let Some(&first) = producers.get(key) {
                return Err(ConfigError::DuplicateProducer {
                    key: key.clone(),
                    first: jobs[first].name().to_string(),
                    second: job.name().to_string(),
                });
            }
            if job.nodes.len() > 1 {
                return Err(ConfigError::MatrixProducer {
                    job: job.name().to_string(),
                    key: key.clone(),
                    variants: job.nodes.len(),
                });
            }
            producers.insert(key.clone(), idx);
        }
    }

    for (idx, job) in jobs.iter().enumerate() {
        for key in &job.spec.consumes {
            let producer = *producers
                .get(key)
                .ok_or_else(|| ConfigError::UnknownArtifact {
                    job: job.name().to_string(),
                    key: key.clone(),
                })?;
            let upstream = producer != idx
                && has_path_connecting(job_graph, job_nodes[producer], job_nodes[idx], None);
            if !upstream {
                return Err(ConfigError::ArtifactNotUpstream {
                    job: job.name().to_string(),
                    key: key.clone(),
                    producer: jobs[producer].name().to_string(),
                });
            }
        }
    }

    Ok(producers)
}

/// Artifact keys double as file names in runner scratch directories.
fn is_valid_key(key: &str) -> bool {
    !key.is_empty() && key != "." && key != ".." && !key.contains(['/', '\\', '\0'])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pipeline(jobs: Vec<JobSpec>) -> PipelineDefinition {
        PipelineDefinition {
            name: "test".to_string(),
            description: None,
            gate: None,
            jobs,
        }
    }

    #[test]
    fn test_linear_dag() {
        let dag = DagBuilder::new()
            .build(&pipeline(vec![
                JobSpec::new("build"),
                JobSpec::new("test").needs(&["build"]),
                JobSpec::new("deploy").needs(&["test"]),
            ]))
            .unwrap();

        let roots = dag.roots();
        assert_eq!(roots.len(), 1);
        assert_eq!(dag.node(roots[0]).key.job, "build");

        let order: Vec<&str> = dag
            .topological_order()
            .iter()
            .map(|&id| dag.node(id).key.job.as_str())
            .collect();
        assert_eq!(order, vec!["build", "test", "deploy"]);
    }

    #[test]
    fn test_matrix_fan_in_edges() {
        let dag = DagBuilder::new()
            .build(&pipeline(vec![
                JobSpec::new("download"),
                JobSpec::new("tests")
                    .needs(&["download"])
                    .axis("os", vec![json!("linux"), json!("macos")])
                    .axis("py", vec![json!("3.9"), json!("3.10")]),
                JobSpec::new("deploy").needs(&["tests"]),
            ]))
            .unwrap();

        assert_eq!(dag.node_count(), 6);
        let download = dag.job(0).nodes[0];
        assert_eq!(dag.dependents(download).len(), 4);

        let deploy = dag.job(2).nodes[0];
        assert_eq!(dag.dependencies(deploy).len(), 4);
        assert_eq!(
            dag.node(dag.job(1).nodes[3]).key.to_string(),
            "tests (os=macos, py=3.10)"
        );
    }

    #[test]
    fn test_cycle_detected() {
        let err = DagBuilder::new()
            .build(&pipeline(vec![
                JobSpec::new("a").needs(&["c"]),
                JobSpec::new("b").needs(&["a"]),
                JobSpec::new("c").needs(&["b"]),
            ]))
            .unwrap_err();
        match err {
            ConfigError::Cycle { job } => assert!(["a", "b", "c"].contains(&job.as_str())),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let err = DagBuilder::new()
            .build(&pipeline(vec![JobSpec::new("a").needs(&["a"])]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Cycle {
                job: "a".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_dependency() {
        let err = DagBuilder::new()
            .build(&pipeline(vec![JobSpec::new("test").needs(&["build"])]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::UnknownDependency {
                job: "test".to_string(),
                dependency: "build".to_string()
            }
        );
    }

    #[test]
    fn test_empty_and_duplicate_jobs() {
        assert_eq!(
            DagBuilder::new().build(&pipeline(vec![])).unwrap_err(),
            ConfigError::EmptyPipeline
        );
        assert_eq!(
            DagBuilder::new()
                .build(&pipeline(vec![JobSpec::new("a"), JobSpec::new("a")]))
                .unwrap_err(),
            ConfigError::DuplicateJob("a".to_string())
        );
    }

    #[test]
    fn test_condition_errors_name_job() {
        let err = DagBuilder::new()
            .build(&pipeline(vec![JobSpec::new("deploy").when("event.branch == 'main'")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::UnknownAttribute {
                job: "deploy".to_string(),
                attribute: "event.branch".to_string()
            }
        );

        let err = DagBuilder::new()
            .build(&pipeline(vec![JobSpec::new("deploy").when("event.kind ==")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MalformedCondition { job, .. } if job == "deploy"));
    }

    #[test]
    fn test_empty_matrix_axis() {
        let err = DagBuilder::new()
            .build(&pipeline(vec![JobSpec::new("tests").axis("os", vec![])]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::EmptyMatrixAxis {
                job: "tests".to_string(),
                axis: "os".to_string()
            }
        );
    }

    #[test]
    fn test_artifact_must_come_from_upstream() {
        let err = DagBuilder::new()
            .build(&pipeline(vec![
                JobSpec::new("download").produces(&["data"]),
                JobSpec::new("tests").consumes(&["data"]),
            ]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::ArtifactNotUpstream {
                job: "tests".to_string(),
                key: "data".to_string(),
                producer: "download".to_string()
            }
        );

        // Transitive dependency is enough
        DagBuilder::new()
            .build(&pipeline(vec![
                JobSpec::new("download").produces(&["data"]),
                JobSpec::new("lint").needs(&["download"]),
                JobSpec::new("tests").needs(&["lint"]).consumes(&["data"]),
            ]))
            .unwrap();
    }

    #[test]
    fn test_unknown_and_duplicate_artifacts() {
        let err = DagBuilder::new()
            .build(&pipeline(vec![JobSpec::new("tests").consumes(&["data"])]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::UnknownArtifact {
                job: "tests".to_string(),
                key: "data".to_string()
            }
        );

        let err = DagBuilder::new()
            .build(&pipeline(vec![
                JobSpec::new("a").produces(&["data"]),
                JobSpec::new("b").produces(&["data"]),
            ]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateProducer { .. }));

        let err = DagBuilder::new()
            .build(&pipeline(vec![
                JobSpec::new("build")
                    .axis("os", vec![json!("linux"), json!("macos")])
                    .produces(&["wheel"]),
            ]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MatrixProducer { variants: 2, .. }));
    }

    #[test]
    fn test_artifact_keys_must_be_file_names() {
        for key in ["wheels/linux", "..", "dist\\sdist", ""] {
            let err = DagBuilder::new()
                .build(&pipeline(vec![JobSpec::new("build").produces(&[key])]))
                .unwrap_err();
            assert_eq!(
                err,
                ConfigError::InvalidArtifactKey {
                    job: "build".to_string(),
                    key: key.to_string()
                }
            );
        }

        let err = DagBuilder::new()
            .build(&pipeline(vec![
                JobSpec::new("a").produces(&["a_b"]),
                JobSpec::new("b").needs(&["a"]).consumes(&["a/b"]),
            ]))
            .unwrap_err();
        assert_eq!(err.job(), Some("b"));

        let graph = DagBuilder::new()
            .build(&pipeline(vec![JobSpec::new("build").produces(&["climetlab-0.20.tar.gz"])]))
            .unwrap();
        assert_eq!(graph.producers().collect::<Vec<_>>(), vec![("climetlab-0.20.tar.gz", 0)]);
    }

    #[test]
    fn test_unknown_gate_job() {
        let mut definition = pipeline(vec![JobSpec::new("build")]);
        definition.gate = Some("deploy".to_string());
        assert_eq!(
            DagBuilder::new().build(&definition).unwrap_err(),
            ConfigError::UnknownGateJob("deploy".to_string())
        );
    }
}

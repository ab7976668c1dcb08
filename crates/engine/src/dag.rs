//! DAG analyzer implementation

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Topo;
use petgraph::Direction;
use tracing::instrument;

use taskflow_common::{DagMetadata, Error, JobId, Result, WorkflowDefinition};
use taskflow_core::dag::{DagAnalyzer, DagValidation};

/// Builds a `petgraph::DiGraph` from a workflow's declared dependencies and
/// answers structural queries against it. Stateless: every call rebuilds the
/// graph from the `WorkflowDefinition` passed in, so it is always consistent
/// with the caller's view of the workflow.
#[derive(Debug, Default)]
pub struct PetgraphDagAnalyzer;

impl PetgraphDagAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Build the graph plus a `JobId -> NodeIndex` side table. Node insertion
    /// order follows `workflow.jobs` order, which is the tie-break law for
    /// equal-readiness jobs elsewhere in the engine.
    fn build_graph(&self, workflow: &WorkflowDefinition) -> (DiGraph<JobId, ()>, HashMap<JobId, NodeIndex>) {
        let mut graph = DiGraph::new();
        let mut node_map = HashMap::new();

        for job in &workflow.jobs {
            let idx = graph.add_node(job.id.clone());
            node_map.insert(job.id.clone(), idx);
        }

        for job in &workflow.jobs {
            let Some(&to_idx) = node_map.get(&job.id) else {
                continue;
            };
            for dep in &job.dependencies {
                if let Some(&from_idx) = node_map.get(dep) {
                    graph.add_edge(from_idx, to_idx, ());
                }
            }
        }

        (graph, node_map)
    }

    /// Self-dependencies: a job listing itself as its own dependency. Caught
    /// separately from the cycle check because it is a trivial 1-cycle that
    /// deserves its own error message.
    fn find_self_dependencies(&self, workflow: &WorkflowDefinition) -> Vec<String> {
        workflow
            .jobs
            .iter()
            .filter(|job| job.dependencies.contains(&job.id))
            .map(|job| format!("job '{}' depends on itself", job.id))
            .collect()
    }

    fn level_of_each_node(
        &self,
        graph: &DiGraph<JobId, ()>,
    ) -> HashMap<NodeIndex, usize> {
        let mut levels = HashMap::new();
        let roots: Vec<_> = graph
            .node_indices()
            .filter(|&n| graph.edges_directed(n, Direction::Incoming).count() == 0)
            .collect();

        let mut queue = VecDeque::new();
        for root in roots {
            queue.push_back(root);
            levels.insert(root, 0usize);
        }

        while let Some(node) = queue.pop_front() {
            let node_level = levels[&node];
            for edge in graph.edges_directed(node, Direction::Outgoing) {
                let target = edge.target();
                let candidate = node_level + 1;
                let update = match levels.get(&target) {
                    Some(&existing) => candidate > existing,
                    None => true,
                };
                if update {
                    levels.insert(target, candidate);
                    queue.push_back(target);
                }
            }
        }

        levels
    }
}

impl DagAnalyzer for PetgraphDagAnalyzer {
    fn build(&self, workflow: &WorkflowDefinition) -> Result<()> {
        self.build_graph(workflow);
        Ok(())
    }

    #[instrument(skip(self, workflow), fields(job_count = workflow.jobs.len()))]
    fn validate(&self, workflow: &WorkflowDefinition) -> DagValidation {
        let mut errors = workflow.validate_dependencies();
        errors.extend(self.find_self_dependencies(workflow));

        let (graph, _) = self.build_graph(workflow);
        if is_cyclic_directed(&graph) {
            errors.push("workflow contains a dependency cycle".to_string());
        }

        DagValidation::with_errors(errors)
    }

    fn metadata(&self, workflow: &WorkflowDefinition) -> Result<DagMetadata> {
        let (graph, _) = self.build_graph(workflow);
        let has_cycles = is_cyclic_directed(&graph);

        if has_cycles {
            return Ok(DagMetadata {
                node_count: graph.node_count(),
                level_count: 0,
                critical_path_length: 0,
                max_parallelism: 0,
                has_cycles: true,
            });
        }

        let levels = self.level_of_each_node(&graph);
        let level_count = levels.values().copied().max().map_or(0, |m| m + 1);

        let mut per_level: HashMap<usize, usize> = HashMap::new();
        for &level in levels.values() {
            *per_level.entry(level).or_insert(0) += 1;
        }
        let max_parallelism = per_level.values().copied().max().unwrap_or(0);

        Ok(DagMetadata {
            node_count: graph.node_count(),
            level_count,
            critical_path_length: level_count.saturating_sub(1),
            max_parallelism,
            has_cycles: false,
        })
    }

    fn execution_order(&self, workflow: &WorkflowDefinition) -> Result<Vec<JobId>> {
        let (graph, _) = self.build_graph(workflow);
        if is_cyclic_directed(&graph) {
            return Err(Error::Validation(
                "cannot compute execution order: workflow contains a cycle".to_string(),
            ));
        }

        let mut order = Vec::new();
        let mut topo = Topo::new(&graph);
        while let Some(idx) = topo.next(&graph) {
            if let Some(job_id) = graph.node_weight(idx) {
                order.push(job_id.clone());
            }
        }
        Ok(order)
    }

    fn ready_jobs(
        &self,
        workflow: &WorkflowDefinition,
        completed: &HashSet<JobId>,
        unreachable: &HashSet<JobId>,
    ) -> Result<Vec<JobId>> {
        let ready = workflow
            .jobs
            .iter()
            .filter(|job| !completed.contains(&job.id) && !unreachable.contains(&job.id))
            .filter(|job| {
                job.dependencies
                    .iter()
                    .all(|dep| completed.contains(dep))
            })
            .map(|job| job.id.clone())
            .collect();
        Ok(ready)
    }

    fn dependents(&self, workflow: &WorkflowDefinition, job_id: &JobId) -> Vec<JobId> {
        workflow
            .jobs
            .iter()
            .filter(|job| job.dependencies.contains(job_id))
            .map(|job| job.id.clone())
            .collect()
    }

    fn transitive_dependents(&self, workflow: &WorkflowDefinition, job_id: &JobId) -> Vec<JobId> {
        let mut visited = HashSet::new();
        let mut stack = self.dependents(workflow, job_id);

        while let Some(current) = stack.pop() {
            if visited.insert(current.clone()) {
                stack.extend(self.dependents(workflow, &current));
            }
        }

        visited.into_iter().collect()
    }
}

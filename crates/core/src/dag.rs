//! DAG analyzer trait and its boundary value types

use taskflow_common::{DagMetadata, Error, JobId, Result, WorkflowDefinition};

/// Validation result for a workflow's dependency graph.
#[derive(Debug, Clone)]
pub struct DagValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

impl DagValidation {
    pub fn ok() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
        }
    }

    pub fn with_errors(errors: Vec<String>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
        }
    }
}

/// Builds, validates, and queries the dependency graph of a workflow.
///
/// Implementations are pure: they never touch process state or the resource
/// manager, only the declared job graph.
pub trait DagAnalyzer: Send + Sync {
    /// Build the internal graph representation from a workflow's jobs.
    fn build(&self, workflow: &WorkflowDefinition) -> Result<()>;

    /// Validate the graph: no cycles, no missing dependencies, no
    /// self-dependencies. Does not mutate state.
    fn validate(&self, workflow: &WorkflowDefinition) -> DagValidation;

    /// Structural metadata: node count, level count, critical path length,
    /// maximum parallelism (widest level), and cycle presence.
    fn metadata(&self, workflow: &WorkflowDefinition) -> Result<DagMetadata>;

    /// Topological execution order (one valid linearization).
    fn execution_order(&self, workflow: &WorkflowDefinition) -> Result<Vec<JobId>>;

    /// Jobs whose dependencies are all in `completed` and none are in
    /// `unreachable` (failed/cancelled/skipped), excluding jobs already in
    /// either set.
    fn ready_jobs(
        &self,
        workflow: &WorkflowDefinition,
        completed: &std::collections::HashSet<JobId>,
        unreachable: &std::collections::HashSet<JobId>,
    ) -> Result<Vec<JobId>>;

    /// Direct dependents of `job_id` (jobs that name it as a dependency).
    fn dependents(&self, workflow: &WorkflowDefinition, job_id: &JobId) -> Vec<JobId>;

    /// Every job reachable from `job_id` by following dependents transitively.
    fn transitive_dependents(&self, workflow: &WorkflowDefinition, job_id: &JobId) -> Vec<JobId>;
}

/// Convenience: convert a `DagValidation` into a `Result<()>`.
pub fn validation_to_result(validation: DagValidation) -> Result<()> {
    if validation.is_valid {
        Ok(())
    } else {
        Err(Error::Validation(validation.errors.join("; ")))
    }
}

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Taskflow: the core of a parallel job orchestrator.
//!
//! This crate is a thin facade over `taskflow-engine`'s production
//! implementations, `taskflow-core`'s component traits, and
//! `taskflow-common`'s data model. Downstream callers depend on this crate
//! alone; workflow loaders, CLI front-ends, and HTTP status surfaces are
//! left to the caller.

pub use taskflow_common::{
    config, error, types, Config, DagMetadata, Error, ExecutionPlan, GlobalResourceLimits,
    InlineLanguage, JobDefinition, JobEvent, JobEventKind, JobExecution, JobId, JobKind,
    JobStatus, JobStatusSnapshot, OutcomeSets, PlanStatus, ResourceLimits, ResourceUsage, Result,
    RetryConfig, StatusSnapshot, WorkflowDefinition,
};

pub use taskflow_core::dag::{DagAnalyzer, DagValidation};
pub use taskflow_core::executor::JobExecutor;
pub use taskflow_core::resource::{AdmissionDecision, ResourceManager};
pub use taskflow_core::scheduler::{EventSink, EventSubscriber, WorkflowOutcome, WorkflowScheduler};

pub use taskflow_engine::{
    DagWorkflowScheduler, InMemoryEventSink, PetgraphDagAnalyzer, ProcessJobExecutor,
    RecordingSubscriber, SystemResourceManager, OUTPUT_CAPTURE_LIMIT,
};

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// Convenience constructor wiring the production implementations together
/// the way a typical caller would, using the scheduler configuration's
/// global resource limits for admission control.
pub fn build_scheduler(config: &Config) -> DagWorkflowScheduler {
    let resources: Arc<dyn ResourceManager> = Arc::new(SystemResourceManager::new(
        config.scheduler.global_resource_limits.clone(),
    ));
    DagWorkflowScheduler::new(
        Arc::new(PetgraphDagAnalyzer::new()),
        resources.clone(),
        Arc::new(ProcessJobExecutor::new(resources)),
        Arc::new(InMemoryEventSink::new()),
    )
}

/// Run `workflow` to completion using the default production wiring.
pub async fn run_workflow(
    config: &Config,
    workflow: &WorkflowDefinition,
    cancel: CancellationToken,
) -> Result<WorkflowOutcome> {
    build_scheduler(config).run(workflow, cancel).await
}

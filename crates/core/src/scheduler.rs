//! Workflow scheduler trait and its boundary value types

use std::sync::Arc;

use taskflow_common::{JobEvent, JobId, JobStatusSnapshot, PlanStatus, Result, StatusSnapshot, WorkflowDefinition};
use tokio_util::sync::CancellationToken;

/// Subscriber callback for the event stream a scheduler publishes over a run.
/// Invoked synchronously from the publishing side; implementations that need
/// to do async work should hand the event off to a channel.
pub trait EventSubscriber: Send + Sync {
    fn on_event(&self, event: &JobEvent);
}

/// Append-only event sink shared between the scheduler and its subscribers.
pub trait EventSink: Send + Sync {
    fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>);
    fn publish(&self, event: JobEvent);
}

/// Outcome of driving a workflow to completion.
#[derive(Debug, Clone)]
pub struct WorkflowOutcome {
    pub status: PlanStatus,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub skipped: usize,
}

/// Drives a validated workflow from its ready set through to completion:
/// admits jobs against the resource manager, dispatches them to the
/// executor, supervises retries, and tracks per-job outcomes.
#[async_trait::async_trait]
pub trait WorkflowScheduler: Send + Sync {
    /// Validate and run `workflow` to completion (or until `cancel` fires).
    async fn run(
        &self,
        workflow: &WorkflowDefinition,
        cancel: CancellationToken,
    ) -> Result<WorkflowOutcome>;

    /// Snapshot of the most recent or in-progress run. Must not block the
    /// dispatch loop and must be safe to call from any task at any time,
    /// including concurrently with `run`. Returns the zero-value snapshot
    /// before the first `run()` call.
    fn status(&self) -> StatusSnapshot;

    /// Per-job detail for the most recent or in-progress run. `None` if no
    /// run has started yet, or if `job_id` is not part of it.
    fn job_status(&self, job_id: &JobId) -> Option<JobStatusSnapshot>;
}

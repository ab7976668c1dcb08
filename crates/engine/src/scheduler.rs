//! Scheduler: drives a validated workflow from its ready set through to
//! completion, admitting jobs against the resource manager and supervising
//! per-job retries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use parking_lot::RwLock;
use taskflow_common::{
    Error, ExecutionPlan, JobEvent, JobEventKind, JobExecution, JobId, JobStatus,
    JobStatusSnapshot, PlanStatus, Result, StatusSnapshot, WorkflowDefinition,
};
use taskflow_core::dag::DagAnalyzer;
use taskflow_core::executor::JobExecutor;
use taskflow_core::resource::ResourceManager;
use taskflow_core::scheduler::{EventSink, WorkflowOutcome, WorkflowScheduler};

/// Interval at which the dispatch loop re-checks readiness even when no
/// attempt has just completed (covers the "nothing running, nothing ready"
/// termination case and bounds poll latency).
const DISPATCH_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long to wait for at least one running attempt to finish before
/// looping back to re-evaluate readiness.
const WAIT_ANY_TIMEOUT: Duration = Duration::from_secs(1);

/// Drives one workflow at a time. Owns the `ExecutionPlan`'s outcome sets
/// exclusively for the duration of `run`; the resource manager and executor
/// are shared collaborators, not owned state.
pub struct DagWorkflowScheduler {
    dag: Arc<dyn DagAnalyzer>,
    resources: Arc<dyn ResourceManager>,
    executor: Arc<dyn JobExecutor>,
    events: Arc<dyn EventSink>,
    /// The most recently started (or in-progress) run's plan, read by
    /// `status`/`job_status` from any task without touching the dispatch
    /// loop. `None` until the first `run()` call.
    current: RwLock<Option<Arc<ExecutionPlan>>>,
}

impl DagWorkflowScheduler {
    pub fn new(
        dag: Arc<dyn DagAnalyzer>,
        resources: Arc<dyn ResourceManager>,
        executor: Arc<dyn JobExecutor>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            dag,
            resources,
            executor,
            events,
            current: RwLock::new(None),
        }
    }

    fn emit(&self, execution_id: Uuid, job_id: JobId, kind: JobEventKind) {
        self.events.publish(JobEvent {
            timestamp: Utc::now(),
            job_id,
            kind,
            execution_id,
        });
    }

    /// Runs one job to terminal status, retrying on failure per its
    /// `RetryConfig`. A per-attempt cancellation scope is derived from
    /// `plan_cancel` so a job-level timeout never reaches other jobs, while a
    /// workflow-wide cancel wakes every in-flight backoff sleep immediately.
    async fn run_job_with_retry(
        job: taskflow_common::JobDefinition,
        executor: Arc<dyn JobExecutor>,
        events: Arc<dyn EventSink>,
        execution_id: Uuid,
        plan_cancel: CancellationToken,
        plan: Arc<ExecutionPlan>,
    ) -> JobExecution {
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            if plan_cancel.is_cancelled() {
                let mut execution = JobExecution::pending(job.id.clone());
                execution.status = JobStatus::Cancelled;
                return execution;
            }

            if let Some(mut live) = plan.jobs.get_mut(&job.id) {
                live.status = JobStatus::Running;
                live.attempt = attempt;
                live.start_time.get_or_insert(Utc::now());
            }

            events.publish(JobEvent {
                timestamp: Utc::now(),
                job_id: job.id.clone(),
                kind: JobEventKind::Started { attempt },
                execution_id,
            });

            let attempt_token = plan_cancel.child_token();
            let execution = match executor.execute(&job, attempt, attempt_token).await {
                Ok(execution) => execution,
                Err(e) => {
                    let mut execution = JobExecution::pending(job.id.clone());
                    execution.attempt = attempt;
                    execution.status = JobStatus::Failed;
                    execution.error = Some(e.to_string());
                    execution
                }
            };

            if let Some(mut live) = plan.jobs.get_mut(&job.id) {
                *live = execution.clone();
            }

            match execution.status {
                JobStatus::Success => {
                    events.publish(JobEvent {
                        timestamp: Utc::now(),
                        job_id: job.id.clone(),
                        kind: JobEventKind::Completed {
                            exit_code: execution.exit_code.unwrap_or(0),
                            duration_ms: execution
                                .duration()
                                .map(|d| d.num_milliseconds())
                                .unwrap_or(0),
                        },
                        execution_id,
                    });
                    return execution;
                }
                JobStatus::Cancelled => {
                    events.publish(JobEvent {
                        timestamp: Utc::now(),
                        job_id: job.id.clone(),
                        kind: JobEventKind::Cancelled,
                        execution_id,
                    });
                    return execution;
                }
                JobStatus::Failed if attempt < job.retry.max_attempts => {
                    events.publish(JobEvent {
                        timestamp: Utc::now(),
                        job_id: job.id.clone(),
                        kind: JobEventKind::Failed {
                            exit_code: execution.exit_code,
                            error: execution.error.clone(),
                        },
                        execution_id,
                    });

                    let delay = job.retry.delay_for_attempt(attempt);
                    events.publish(JobEvent {
                        timestamp: Utc::now(),
                        job_id: job.id.clone(),
                        kind: JobEventKind::Retrying {
                            attempt: attempt + 1,
                            delay_ms: delay.as_millis() as u64,
                        },
                        execution_id,
                    });

                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = plan_cancel.cancelled() => {
                            let mut execution = execution;
                            execution.status = JobStatus::Cancelled;
                            return execution;
                        }
                    }
                }
                _ => {
                    events.publish(JobEvent {
                        timestamp: Utc::now(),
                        job_id: job.id.clone(),
                        kind: JobEventKind::Failed {
                            exit_code: execution.exit_code,
                            error: execution.error.clone(),
                        },
                        execution_id,
                    });
                    return execution;
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl WorkflowScheduler for DagWorkflowScheduler {
    #[instrument(skip(self, workflow, cancel), fields(workflow = %workflow.name))]
    async fn run(
        &self,
        workflow: &WorkflowDefinition,
        cancel: CancellationToken,
    ) -> Result<WorkflowOutcome> {
        let validation = self.dag.validate(workflow);
        if !validation.is_valid {
            return Err(Error::Validation(validation.errors.join("; ")));
        }

        let dag_metadata = self.dag.metadata(workflow)?;
        let plan = Arc::new(ExecutionPlan::new(&workflow.jobs, dag_metadata));
        *plan.status.write() = PlanStatus::Running;
        let execution_id = plan.execution_id;
        *self.current.write() = Some(plan.clone());

        let mut running: HashMap<JobId, JoinHandle<JobExecution>> = HashMap::new();

        info!(job_count = workflow.jobs.len(), "starting workflow run");

        loop {
            if plan.is_complete() {
                break;
            }

            let (completed, unreachable) = {
                let outcomes = plan.outcomes.read();
                (outcomes.completed.clone(), outcomes.unreachable())
            };

            let ready = self.dag.ready_jobs(workflow, &completed, &unreachable)?;
            let ready: Vec<JobId> = ready
                .into_iter()
                .filter(|id| !running.contains_key(id))
                .collect();

            if ready.is_empty() && running.is_empty() {
                // Nothing left can make progress: every remaining pending job
                // depends, directly or transitively, on something that will
                // never complete.
                let newly_skipped: Vec<JobId> = {
                    let mut outcomes = plan.outcomes.write();
                    let mut newly_skipped = Vec::new();
                    for job in &workflow.jobs {
                        let already_known = outcomes.completed.contains(&job.id)
                            || outcomes.failed.contains(&job.id)
                            || outcomes.cancelled.contains(&job.id)
                            || outcomes.skipped.contains(&job.id);
                        if !already_known {
                            outcomes.skipped.insert(job.id.clone());
                            newly_skipped.push(job.id.clone());
                        }
                    }
                    newly_skipped
                };
                for job_id in &newly_skipped {
                    if let Some(mut live) = plan.jobs.get_mut(job_id) {
                        live.status = JobStatus::Skipped;
                        live.error = Some("dependency_failed".to_string());
                    }
                }
                for job_id in newly_skipped {
                    self.emit(
                        execution_id,
                        job_id,
                        JobEventKind::Skipped {
                            reason: "dependency_failed".to_string(),
                        },
                    );
                }
                break;
            }

            for job_id in ready {
                let Some(job) = workflow.get_job(&job_id) else {
                    continue;
                };

                let decision = self.resources.can_start(&job_id, &job.resources).await;
                if !decision.is_admitted() {
                    continue;
                }
                self.resources.register(&job_id, &job.resources).await?;

                let job = job.clone();
                let executor = self.executor.clone();
                let events = self.events.clone();
                let job_cancel = cancel.child_token();
                let job_plan = plan.clone();

                let handle = tokio::spawn(Self::run_job_with_retry(
                    job, executor, events, execution_id, job_cancel, job_plan,
                ));
                running.insert(job_id, handle);
            }

            if running.is_empty() {
                tokio::time::sleep(DISPATCH_POLL_INTERVAL).await;
                continue;
            }

            // Wait until at least one running attempt finishes, bounded by
            // WAIT_ANY_TIMEOUT so the loop still notices newly-ready jobs
            // (e.g. unblocked by a job outside this batch) without needing a
            // dedicated wakeup channel per handle.
            let deadline = tokio::time::Instant::now() + WAIT_ANY_TIMEOUT;
            while tokio::time::Instant::now() < deadline
                && !running.values().any(JoinHandle::is_finished)
            {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }

            let mut finished = Vec::new();
            for (job_id, handle) in running.iter() {
                if handle.is_finished() {
                    finished.push(job_id.clone());
                }
            }

            for job_id in finished {
                let Some(handle) = running.remove(&job_id) else {
                    continue;
                };
                self.resources.unregister(&job_id).await;

                let execution = match handle.await {
                    Ok(execution) => execution,
                    Err(join_error) => {
                        warn!(job_id = %job_id, error = %join_error, "job task panicked or was aborted");
                        let mut execution = JobExecution::pending(job_id.clone());
                        execution.status = JobStatus::Failed;
                        execution.error = Some(join_error.to_string());
                        execution
                    }
                };

                let mut outcomes = plan.outcomes.write();
                match execution.status {
                    JobStatus::Success => {
                        outcomes.completed.insert(job_id.clone());
                    }
                    JobStatus::Cancelled => {
                        outcomes.cancelled.insert(job_id.clone());
                    }
                    _ => {
                        outcomes.failed.insert(job_id.clone());
                    }
                }
                drop(outcomes);
                plan.jobs.insert(job_id, execution);
            }
        }

        let outcomes = plan.outcomes.read();
        let status = if cancel.is_cancelled() {
            PlanStatus::Cancelled
        } else if !outcomes.failed.is_empty() {
            PlanStatus::Failed
        } else {
            PlanStatus::Completed
        };
        *plan.status.write() = status;

        info!(
            completed = outcomes.completed.len(),
            failed = outcomes.failed.len(),
            cancelled = outcomes.cancelled.len(),
            skipped = outcomes.skipped.len(),
            ?status,
            "workflow run finished"
        );

        Ok(WorkflowOutcome {
            status,
            completed: outcomes.completed.len(),
            failed: outcomes.failed.len(),
            cancelled: outcomes.cancelled.len(),
            skipped: outcomes.skipped.len(),
        })
    }

    fn status(&self) -> StatusSnapshot {
        let Some(plan) = self.current.read().clone() else {
            return StatusSnapshot::default();
        };

        let outcomes = plan.outcomes.read();
        let running: Vec<JobId> = plan
            .jobs
            .iter()
            .filter(|entry| entry.status == JobStatus::Running)
            .map(|entry| entry.key().clone())
            .collect();
        let elapsed_ms = (Utc::now() - plan.start_time).num_milliseconds();

        StatusSnapshot {
            execution_id: Some(plan.execution_id),
            plan_status: Some(*plan.status.read()),
            running,
            completed: outcomes.completed.len(),
            failed: outcomes.failed.len(),
            cancelled: outcomes.cancelled.len(),
            skipped: outcomes.skipped.len(),
            dag_metadata: Some(plan.dag_metadata.clone()),
            elapsed_ms: Some(elapsed_ms),
        }
    }

    fn job_status(&self, job_id: &JobId) -> Option<JobStatusSnapshot> {
        let plan = self.current.read().clone()?;
        plan.jobs.get(job_id).map(|entry| JobStatusSnapshot::from(entry.value()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::PetgraphDagAnalyzer;
    use crate::events::InMemoryEventSink;
    use crate::executor::ProcessJobExecutor;
    use crate::resource::SystemResourceManager;
    use proptest::prelude::*;
    use taskflow_common::{GlobalResourceLimits, JobDefinition, JobKind};

    fn scheduler(max_concurrent_jobs: usize) -> DagWorkflowScheduler {
        let resources: Arc<dyn ResourceManager> = Arc::new(SystemResourceManager::new(GlobalResourceLimits {
            max_concurrent_jobs,
            max_memory_mb: None,
            max_cpu_percent: None,
        }));
        DagWorkflowScheduler::new(
            Arc::new(PetgraphDagAnalyzer::new()),
            resources.clone(),
            Arc::new(ProcessJobExecutor::new(resources)),
            Arc::new(InMemoryEventSink::new()),
        )
    }

    #[tokio::test]
    async fn runs_a_simple_chain_to_completion() {
        let mut a = JobDefinition::new("a", "a", JobKind::Command { command: "exit 0".into() });
        a.timeout = Duration::from_secs(5);
        let mut b = JobDefinition::new("b", "b", JobKind::Command { command: "exit 0".into() });
        b.timeout = Duration::from_secs(5);
        b.dependencies = vec![JobId::from("a")];

        let workflow = WorkflowDefinition::new("chain", vec![a, b]);
        let scheduler = scheduler(4);

        let outcome = scheduler.run(&workflow, CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.completed, 2);
        assert_eq!(outcome.failed, 0);
    }

    #[tokio::test]
    async fn skips_dependents_of_a_failed_job() {
        let mut a = JobDefinition::new("a", "a", JobKind::Command { command: "exit 1".into() });
        a.timeout = Duration::from_secs(5);
        a.retry.max_attempts = 1;
        let mut b = JobDefinition::new("b", "b", JobKind::Command { command: "exit 0".into() });
        b.timeout = Duration::from_secs(5);
        b.dependencies = vec![JobId::from("a")];

        let workflow = WorkflowDefinition::new("chain", vec![a, b]);
        let scheduler = scheduler(4);

        let outcome = scheduler.run(&workflow, CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.skipped, 1);
    }

    #[tokio::test]
    async fn rejects_a_cyclic_workflow_before_running_anything() {
        let mut a = JobDefinition::new("a", "a", JobKind::Command { command: "exit 0".into() });
        a.dependencies = vec![JobId::from("b")];
        let mut b = JobDefinition::new("b", "b", JobKind::Command { command: "exit 0".into() });
        b.dependencies = vec![JobId::from("a")];

        let workflow = WorkflowDefinition::new("cycle", vec![a, b]);
        let scheduler = scheduler(4);

        let result = scheduler.run(&workflow, CancellationToken::new()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn respects_concurrency_limit() {
        let jobs: Vec<_> = (0..5)
            .map(|i| {
                let mut job = JobDefinition::new(
                    format!("j{i}"),
                    format!("j{i}"),
                    JobKind::Command { command: "exit 0".into() },
                );
                job.timeout = Duration::from_secs(5);
                job
            })
            .collect();

        let workflow = WorkflowDefinition::new("parallel", jobs);
        let scheduler = scheduler(2);

        let outcome = scheduler.run(&workflow, CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.completed, 5);
    }

    #[tokio::test]
    async fn status_is_the_zero_value_before_any_run() {
        let scheduler = scheduler(4);
        let status = scheduler.status();
        assert!(status.execution_id.is_none());
        assert!(status.plan_status.is_none());
    }

    #[tokio::test]
    async fn status_and_job_status_reflect_a_finished_run() {
        let mut a = JobDefinition::new("a", "a", JobKind::Command { command: "echo hi".into() });
        a.timeout = Duration::from_secs(5);
        let workflow = WorkflowDefinition::new("wf", vec![a]);
        let scheduler = scheduler(4);

        let outcome = scheduler.run(&workflow, CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.completed, 1);

        let status = scheduler.status();
        assert_eq!(status.completed, 1);
        assert!(status.execution_id.is_some());
        assert_eq!(status.plan_status, Some(PlanStatus::Completed));

        let job_status = scheduler.job_status(&JobId::from("a")).unwrap();
        assert_eq!(job_status.status, JobStatus::Success);
        assert!(job_status.stdout.contains("hi"));
    }

    #[tokio::test]
    async fn job_status_is_none_for_an_unknown_job() {
        let a = JobDefinition::new("a", "a", JobKind::Command { command: "exit 0".into() });
        let workflow = WorkflowDefinition::new("wf", vec![a]);
        let scheduler = scheduler(4);
        scheduler.run(&workflow, CancellationToken::new()).await.unwrap();

        assert!(scheduler.job_status(&JobId::from("ghost")).is_none());
    }

    proptest! {
        /// Every job in a finished run lands in exactly one of
        /// completed/failed/cancelled/skipped: the buckets partition the job
        /// set, so their sizes always sum to the total job count.
        #[test]
        fn outcome_buckets_partition_the_job_set(passes in proptest::collection::vec(any::<bool>(), 1..6)) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let result: Result<(), TestCaseError> = rt.block_on(async {
                let jobs: Vec<JobDefinition> = passes
                    .iter()
                    .enumerate()
                    .map(|(i, &pass)| {
                        let mut job = JobDefinition::new(
                            format!("j{i}"),
                            format!("j{i}"),
                            JobKind::Command {
                                command: if pass { "exit 0".into() } else { "exit 1".into() },
                            },
                        );
                        job.timeout = Duration::from_secs(5);
                        job.retry.max_attempts = 1;
                        if i > 0 {
                            job.dependencies = vec![JobId::from(format!("j{}", i - 1))];
                        }
                        job
                    })
                    .collect();
                let total = jobs.len();

                let workflow = WorkflowDefinition::new("chain", jobs);
                let scheduler = scheduler(4);
                let outcome = scheduler.run(&workflow, CancellationToken::new()).await.unwrap();

                prop_assert_eq!(
                    outcome.completed + outcome.failed + outcome.cancelled + outcome.skipped,
                    total
                );
                Ok(())
            });
            result?;
        }
    }
}

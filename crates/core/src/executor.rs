//! Job executor trait and its boundary value types

use tokio_util::sync::CancellationToken;

use taskflow_common::{JobDefinition, JobExecution};

/// Executes exactly one attempt of a job: spawn, capture, enforce timeout,
/// observe cancellation. Retry supervision lives in the scheduler, not here.
#[async_trait::async_trait]
pub trait JobExecutor: Send + Sync {
    /// Run one attempt of `job`, honoring `job.timeout` and stopping early if
    /// `cancel` is triggered. Never returns `Err` for a failed job attempt
    /// (that is communicated via `JobExecution.status`/`exit_code`); `Err` is
    /// reserved for execution infrastructure failure (e.g. the job kind is
    /// fundamentally unrunnable on this host).
    async fn execute(
        &self,
        job: &JobDefinition,
        attempt: u32,
        cancel: CancellationToken,
    ) -> taskflow_common::Result<JobExecution>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;
    use taskflow_common::{JobExecution, JobKind};

    mock! {
        TestExecutor {}

        #[async_trait::async_trait]
        impl JobExecutor for TestExecutor {
            async fn execute(
                &self,
                job: &JobDefinition,
                attempt: u32,
                cancel: CancellationToken,
            ) -> taskflow_common::Result<JobExecution>;
        }
    }

    #[tokio::test]
    async fn a_mocked_executor_satisfies_the_trait_bound() {
        let mut mock = MockTestExecutor::new();
        mock.expect_execute()
            .returning(|job, attempt, _cancel| {
                let mut execution = JobExecution::pending(job.id.clone());
                execution.attempt = attempt;
                Ok(execution)
            });

        let job = JobDefinition::new(
            "job-1",
            "job-1",
            JobKind::Command {
                command: "true".to_string(),
            },
        );
        let execution = mock
            .execute(&job, 1, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(execution.attempt, 1);
    }
}

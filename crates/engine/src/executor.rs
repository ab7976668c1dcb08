//! Job executor: runs exactly one attempt of a job.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use taskflow_common::{
    Error, InlineLanguage, JobDefinition, JobExecution, JobKind, JobStatus, Result,
};
use taskflow_core::executor::JobExecutor;
use taskflow_core::resource::ResourceManager;

/// Captured stdout/stderr is truncated past this many bytes per stream. An
/// implementer choice: the source spec leaves the cap unstated.
pub const OUTPUT_CAPTURE_LIMIT: usize = 1_048_576;

const TRUNCATION_MARKER: &str = "... [truncated]";

/// Runs jobs as OS processes. `command` and `script` run directly;
/// `inline-code` is staged to a temp file first; `http` is a bare GET with no
/// process involved at all. Holds the resource manager only to attach a
/// job's pid once it spawns, so `ResourceManager::usage()` can sample live
/// RSS/CPU; admission and reservation bookkeeping stay with the scheduler.
pub struct ProcessJobExecutor {
    resources: Arc<dyn ResourceManager>,
}

impl ProcessJobExecutor {
    pub fn new(resources: Arc<dyn ResourceManager>) -> Self {
        Self { resources }
    }

    fn shell_command(command: &str) -> Command {
        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd
    }

    fn interpreter_for_script(path: &Path) -> String {
        match path.extension().and_then(|e| e.to_str()) {
            Some("py") => format!("python3 {}", path.display()),
            Some("sh") | Some("bash") => format!("bash {}", path.display()),
            Some("js") => format!("node {}", path.display()),
            _ => path.display().to_string(),
        }
    }

    /// Run a prepared shell command to completion, honoring `timeout` and
    /// `cancel`. Returns (exit_code, stdout, stderr, timed_out, cancelled).
    async fn run_with_supervision(
        &self,
        mut cmd: Command,
        job: &JobDefinition,
        cancel: &CancellationToken,
    ) -> Result<(i32, String, String, Option<String>)> {
        if let Some(dir) = &job.working_dir {
            cmd.current_dir(dir);
        }
        cmd.envs(&job.env);

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // New process group per job so the whole tree can be signalled
            // at once on cancellation or timeout.
            cmd.process_group(0);
        }

        let mut child = cmd.spawn()?;
        if let Some(pid) = child.id() {
            self.resources.attach_pid(&job.id, pid);
        }
        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();

        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(pipe) = stdout_pipe.as_mut() {
                let _ = tokio::io::AsyncReadExt::read_to_end(pipe, &mut buf).await;
            }
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(pipe) = stderr_pipe.as_mut() {
                let _ = tokio::io::AsyncReadExt::read_to_end(pipe, &mut buf).await;
            }
            buf
        });

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                Self::terminate(&mut child).await;
                let stdout = Self::capture(&stdout_task.await.unwrap_or_default());
                let stderr = Self::capture(&stderr_task.await.unwrap_or_default());
                Ok((-1, stdout, stderr, Some("execution was cancelled".to_string())))
            }
            result = tokio::time::timeout(job.timeout, child.wait()) => {
                match result {
                    Ok(Ok(status)) => {
                        let stdout = Self::capture(&stdout_task.await.unwrap_or_default());
                        let stderr = Self::capture(&stderr_task.await.unwrap_or_default());
                        let code = status.code().unwrap_or(-1);
                        Ok((code, stdout, stderr, None))
                    }
                    Ok(Err(e)) => Err(Error::Io(e)),
                    Err(_elapsed) => {
                        Self::terminate(&mut child).await;
                        let stdout = Self::capture(&stdout_task.await.unwrap_or_default());
                        let stderr = Self::capture(&stderr_task.await.unwrap_or_default());
                        Ok((
                            -1,
                            stdout,
                            stderr,
                            Some(format!("Job timed out after {} seconds", job.timeout.as_secs())),
                        ))
                    }
                }
            }
        }
    }

    fn capture(bytes: &[u8]) -> String {
        let text = String::from_utf8_lossy(bytes).into_owned();
        if text.len() > OUTPUT_CAPTURE_LIMIT {
            let mut truncated = text[..OUTPUT_CAPTURE_LIMIT].to_string();
            truncated.push_str(TRUNCATION_MARKER);
            truncated
        } else {
            text
        }
    }

    #[cfg(unix)]
    async fn terminate(child: &mut Child) {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            let pgid = Pid::from_raw(pid as i32);
            let _ = killpg(pgid, Signal::SIGTERM);

            let grace = tokio::time::sleep(Duration::from_secs(2));
            tokio::select! {
                _ = child.wait() => return,
                () = grace => {}
            }

            let _ = killpg(pgid, Signal::SIGKILL);
        }
        let _ = child.wait().await;
    }

    #[cfg(not(unix))]
    async fn terminate(child: &mut Child) {
        let _ = child.kill().await;
    }

    async fn execute_http(url: &str, timeout: Duration) -> Result<(i32, String, String)> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        match client.get(url).send().await {
            Ok(response) if response.status().is_success() => Ok((0, String::new(), String::new())),
            Ok(response) => {
                let status = response.status();
                Ok((1, String::new(), format!("HTTP request failed with status {status}")))
            }
            Err(e) => Ok((1, String::new(), format!("HTTP request error: {e}"))),
        }
    }

    async fn stage_inline_code(
        language: InlineLanguage,
        source: &str,
    ) -> Result<tempfile::NamedTempFile> {
        let mut file = tempfile::Builder::new()
            .suffix(language.file_suffix())
            .tempfile()?;
        tokio::task::block_in_place(|| -> std::io::Result<()> {
            use std::io::Write;
            file.write_all(source.as_bytes())
        })?;
        Ok(file)
    }
}

#[async_trait]
impl JobExecutor for ProcessJobExecutor {
    #[instrument(skip(self, job, cancel), fields(job_id = %job.id, attempt))]
    async fn execute(
        &self,
        job: &JobDefinition,
        attempt: u32,
        cancel: CancellationToken,
    ) -> Result<JobExecution> {
        let mut execution = JobExecution::pending(job.id.clone());
        execution.attempt = attempt;
        execution.status = JobStatus::Running;
        execution.start_time = Some(Utc::now());

        info!(job_id = %job.id, attempt, "starting job attempt");

        let started = Instant::now();

        let outcome = match &job.kind {
            JobKind::Command { command } => {
                let cmd = Self::shell_command(command);
                self.run_with_supervision(cmd, job, &cancel).await
            }
            JobKind::Script { path } => {
                let command_line = Self::interpreter_for_script(path);
                let cmd = Self::shell_command(&command_line);
                self.run_with_supervision(cmd, job, &cancel).await
            }
            JobKind::InlineCode { language, source } => {
                match Self::stage_inline_code(*language, source).await {
                    Ok(file) => {
                        let command_line = format!(
                            "{} {}",
                            language.interpreter(),
                            file.path().display()
                        );
                        let cmd = Self::shell_command(&command_line);
                        let result = self.run_with_supervision(cmd, job, &cancel).await;
                        // `file` drops here, unlinking the temp file on every exit path.
                        result
                    }
                    Err(e) => Err(e),
                }
            }
            JobKind::Http { url } => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Ok((-1, String::new(), String::new(), Some("execution was cancelled".to_string()))),
                    result = Self::execute_http(url, job.timeout) => {
                        result.map(|(code, stdout, stderr)| (code, stdout, stderr, None))
                    }
                }
            }
        };

        execution.end_time = Some(Utc::now());

        match outcome {
            Ok((exit_code, stdout, stderr, error)) => {
                execution.exit_code = Some(exit_code);
                execution.stdout = stdout;
                execution.stderr = stderr;
                execution.error = error.clone();
                execution.status = if cancel.is_cancelled() {
                    JobStatus::Cancelled
                } else if exit_code == 0 {
                    JobStatus::Success
                } else {
                    JobStatus::Failed
                };
            }
            Err(e) => {
                execution.exit_code = Some(-1);
                execution.error = Some(e.to_string());
                execution.status = JobStatus::Failed;
            }
        }

        info!(
            job_id = %job.id,
            attempt,
            status = ?execution.status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "job attempt finished"
        );

        Ok(execution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskflow_common::JobDefinition;
    use crate::resource::SystemResourceManager;
    use taskflow_common::GlobalResourceLimits;

    #[tokio::test]
    async fn runs_a_successful_command() {
        let job = JobDefinition::new(
            "ok",
            "ok",
            JobKind::Command {
                command: "exit 0".to_string(),
            },
        );
        let executor = ProcessJobExecutor::new(Arc::new(SystemResourceManager::new(GlobalResourceLimits::default())));
        let execution = executor
            .execute(&job, 1, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(execution.status, JobStatus::Success);
        assert_eq!(execution.exit_code, Some(0));
    }

    #[tokio::test]
    async fn runs_a_failing_command() {
        let job = JobDefinition::new(
            "fail",
            "fail",
            JobKind::Command {
                command: "exit 7".to_string(),
            },
        );
        let executor = ProcessJobExecutor::new(Arc::new(SystemResourceManager::new(GlobalResourceLimits::default())));
        let execution = executor
            .execute(&job, 1, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(execution.status, JobStatus::Failed);
        assert_eq!(execution.exit_code, Some(7));
    }

    #[tokio::test]
    async fn captures_stdout() {
        let job = JobDefinition::new(
            "echo",
            "echo",
            JobKind::Command {
                command: "echo hello".to_string(),
            },
        );
        let executor = ProcessJobExecutor::new(Arc::new(SystemResourceManager::new(GlobalResourceLimits::default())));
        let execution = executor
            .execute(&job, 1, CancellationToken::new())
            .await
            .unwrap();
        assert!(execution.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn cancellation_marks_job_cancelled() {
        let mut job = JobDefinition::new(
            "sleepy",
            "sleepy",
            JobKind::Command {
                command: "sleep 5".to_string(),
            },
        );
        job.timeout = Duration::from_secs(30);
        let executor = ProcessJobExecutor::new(Arc::new(SystemResourceManager::new(GlobalResourceLimits::default())));
        let token = CancellationToken::new();
        let token_clone = token.clone();

        let handle = tokio::spawn(async move { executor.execute(&job, 1, token_clone).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();

        let execution = handle.await.unwrap().unwrap();
        assert_eq!(execution.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn runs_an_http_job_against_a_mock_server() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let job = JobDefinition::new(
            "ping",
            "ping",
            JobKind::Http {
                url: format!("{}/health", server.uri()),
            },
        );
        let executor = ProcessJobExecutor::new(Arc::new(SystemResourceManager::new(GlobalResourceLimits::default())));
        let execution = executor
            .execute(&job, 1, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(execution.status, JobStatus::Success);
        assert_eq!(execution.exit_code, Some(0));
    }

    #[tokio::test]
    async fn an_http_job_fails_on_a_non_success_status() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let job = JobDefinition::new(
            "ping-broken",
            "ping-broken",
            JobKind::Http {
                url: format!("{}/broken", server.uri()),
            },
        );
        let executor = ProcessJobExecutor::new(Arc::new(SystemResourceManager::new(GlobalResourceLimits::default())));
        let execution = executor
            .execute(&job, 1, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(execution.status, JobStatus::Failed);
        assert!(execution.stderr.contains("503"));
    }

    #[tokio::test]
    async fn runs_inline_python_code() {
        let job = JobDefinition::new(
            "inline",
            "inline",
            JobKind::InlineCode {
                language: InlineLanguage::Shell,
                source: "echo inline-ran".to_string(),
            },
        );
        let executor = ProcessJobExecutor::new(Arc::new(SystemResourceManager::new(GlobalResourceLimits::default())));
        let execution = executor
            .execute(&job, 1, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(execution.status, JobStatus::Success);
        assert!(execution.stdout.contains("inline-ran"));
    }
}

//! Data model for the Taskflow orchestrator core

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable, user-chosen job identifier. Not a generated UUID: the workflow
/// author names their own jobs so dependencies can reference them by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Interpreter used for an `inline-code` job's temporary file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InlineLanguage {
    Python,
    Shell,
    JavaScript,
}

impl InlineLanguage {
    /// File suffix used for the temporary file written before execution.
    pub fn file_suffix(self) -> &'static str {
        match self {
            Self::Python => ".py",
            Self::Shell => ".sh",
            Self::JavaScript => ".js",
        }
    }

    /// Interpreter binary invoked on the temporary file.
    pub fn interpreter(self) -> &'static str {
        match self {
            Self::Python => "python3",
            Self::Shell => "bash",
            Self::JavaScript => "node",
        }
    }
}

/// What a job actually runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobKind {
    /// A shell command line, run under the OS shell.
    Command { command: String },
    /// A script file; the interpreter is derived from its extension.
    Script { path: PathBuf },
    /// A GET request; HTTP 200 is success, anything else is failure.
    Http { url: String },
    /// Source code written to a temporary file and interpreted.
    InlineCode {
        language: InlineLanguage,
        source: String,
    },
}

/// Retry policy with exponential backoff, capped at `max_delay`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before attempt `n` (n >= 1): `min(initial * mult^(n-1), max)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let scaled =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent as i32);
        let capped = scaled.min(self.max_delay.as_secs_f64()).max(0.0);
        Duration::from_secs_f64(capped)
    }
}

/// Per-job declared resource reservation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub max_memory_mb: Option<u64>,
    pub max_cpu_percent: Option<f32>,
    pub max_execution_time: Option<Duration>,
}

/// Process-wide resource ceilings, enforced by the resource manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalResourceLimits {
    pub max_concurrent_jobs: usize,
    pub max_memory_mb: Option<u64>,
    pub max_cpu_percent: Option<f32>,
}

impl Default for GlobalResourceLimits {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
            max_memory_mb: None,
            max_cpu_percent: None,
        }
    }
}

/// Immutable user input: one job in a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDefinition {
    pub id: JobId,
    pub name: String,
    pub kind: JobKind,
    pub working_dir: Option<PathBuf>,
    pub env: HashMap<String, String>,
    pub dependencies: Vec<JobId>,
    pub timeout: Duration,
    pub retry: RetryConfig,
    pub resources: ResourceLimits,
    pub tags: Vec<String>,
}

impl JobDefinition {
    /// Convenience constructor with the common defaults filled in.
    pub fn new(id: impl Into<JobId>, name: impl Into<String>, kind: JobKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            working_dir: None,
            env: HashMap::new(),
            dependencies: Vec::new(),
            timeout: Duration::from_secs(3600),
            retry: RetryConfig::default(),
            resources: ResourceLimits::default(),
            tags: Vec::new(),
        }
    }
}

/// Job execution status. Terminal states: success, failed, cancelled, skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
    Skipped,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failed | Self::Cancelled | Self::Skipped
        )
    }
}

/// Runtime state for exactly one `JobDefinition` within a single run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecution {
    pub job_id: JobId,
    pub status: JobStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub attempt: u32,
    pub pid: Option<u32>,
    pub error: Option<String>,
}

impl JobExecution {
    pub fn pending(job_id: JobId) -> Self {
        Self {
            job_id,
            status: JobStatus::Pending,
            start_time: None,
            end_time: None,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            attempt: 0,
            pid: None,
            error: None,
        }
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.start_time, self.end_time) {
            (Some(s), Some(e)) => Some(e - s),
            _ => None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == JobStatus::Running
    }
}

/// A complete workflow: jobs plus whatever global configuration the loader
/// attached. Treated as immutable during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    pub jobs: Vec<JobDefinition>,
    #[serde(default)]
    pub global_config: HashMap<String, serde_json::Value>,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>, jobs: Vec<JobDefinition>) -> Self {
        Self {
            name: name.into(),
            version: "1.0.0".to_string(),
            description: String::new(),
            jobs,
            global_config: HashMap::new(),
        }
    }

    pub fn get_job(&self, id: &JobId) -> Option<&JobDefinition> {
        self.jobs.iter().find(|j| &j.id == id)
    }

    /// Dependency-reference validation: every dependency id must name a job
    /// in this workflow. Cycle/self-dependency detection lives in the DAG
    /// analyzer, which needs the full graph built.
    pub fn validate_dependencies(&self) -> Vec<String> {
        let known: std::collections::HashSet<&JobId> = self.jobs.iter().map(|j| &j.id).collect();
        let mut errors = Vec::new();
        for job in &self.jobs {
            for dep in &job.dependencies {
                if !known.contains(dep) {
                    errors.push(format!(
                        "job '{}' depends on non-existent job '{}'",
                        job.id, dep
                    ));
                }
            }
        }
        errors
    }
}

/// Structural metadata about a validated DAG.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DagMetadata {
    pub node_count: usize,
    pub level_count: usize,
    pub critical_path_length: usize,
    pub max_parallelism: usize,
    pub has_cycles: bool,
}

/// Overall plan status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Planning,
    Running,
    Completed,
    Failed,
    Cancelled,
    Error,
}

/// The four disjoint outcome sets the scheduler maintains exclusively.
#[derive(Debug, Default)]
pub struct OutcomeSets {
    pub completed: std::collections::HashSet<JobId>,
    pub failed: std::collections::HashSet<JobId>,
    pub cancelled: std::collections::HashSet<JobId>,
    pub skipped: std::collections::HashSet<JobId>,
}

impl OutcomeSets {
    /// Union of failed/cancelled/skipped: jobs a pending job cannot depend on.
    pub fn unreachable(&self) -> std::collections::HashSet<JobId> {
        self.failed
            .iter()
            .chain(self.cancelled.iter())
            .chain(self.skipped.iter())
            .cloned()
            .collect()
    }

    pub fn total(&self) -> usize {
        self.completed.len() + self.failed.len() + self.cancelled.len() + self.skipped.len()
    }
}

/// Per-run aggregate: the execution plan's state. Owned exclusively by the
/// scheduler; `jobs` is a `DashMap` so status snapshots never block the
/// dispatch loop.
pub struct ExecutionPlan {
    pub execution_id: Uuid,
    pub jobs: DashMap<JobId, JobExecution>,
    pub dag_metadata: DagMetadata,
    pub start_time: DateTime<Utc>,
    pub status: RwLock<PlanStatus>,
    pub outcomes: RwLock<OutcomeSets>,
}

impl ExecutionPlan {
    pub fn new(jobs: &[JobDefinition], dag_metadata: DagMetadata) -> Self {
        let map = DashMap::new();
        for job in jobs {
            map.insert(job.id.clone(), JobExecution::pending(job.id.clone()));
        }
        Self {
            execution_id: Uuid::new_v4(),
            jobs: map,
            dag_metadata,
            start_time: Utc::now(),
            status: RwLock::new(PlanStatus::Planning),
            outcomes: RwLock::new(OutcomeSets::default()),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.outcomes.read().total() >= self.jobs.len()
    }
}

/// Immutable fact about a job's lifecycle, in emission order per job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub timestamp: DateTime<Utc>,
    pub job_id: JobId,
    pub kind: JobEventKind,
    pub execution_id: Uuid,
}

/// Event kinds: started | completed | failed | cancelled | retrying | skipped.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEventKind {
    Started {
        attempt: u32,
    },
    Completed {
        exit_code: i32,
        duration_ms: i64,
    },
    Failed {
        exit_code: Option<i32>,
        error: Option<String>,
    },
    Cancelled,
    Retrying {
        attempt: u32,
        delay_ms: u64,
    },
    Skipped {
        reason: String,
    },
}

/// Live resource usage snapshot, as returned by `ResourceManager::usage()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub running_jobs: usize,
    pub reserved_memory_mb: u64,
    pub sampled_memory_mb: u64,
    pub sampled_cpu_percent: f32,
    pub limits: GlobalResourceLimits,
}

/// Whole-run snapshot returned by `WorkflowScheduler::status()`. Safe to read
/// at any time, including while the dispatch loop is still driving the plan;
/// `None` before the scheduler's first `run()` call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub execution_id: Option<Uuid>,
    pub plan_status: Option<PlanStatus>,
    pub running: Vec<JobId>,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub skipped: usize,
    pub dag_metadata: Option<DagMetadata>,
    pub elapsed_ms: Option<i64>,
}

/// Per-job detail returned by `WorkflowScheduler::job_status(id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusSnapshot {
    pub job_id: JobId,
    pub status: JobStatus,
    pub attempt: u32,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
    pub stdout: String,
    pub stderr: String,
}

impl From<&JobExecution> for JobStatusSnapshot {
    fn from(execution: &JobExecution) -> Self {
        Self {
            job_id: execution.job_id.clone(),
            status: execution.status,
            attempt: execution.attempt,
            start_time: execution.start_time,
            end_time: execution.end_time,
            exit_code: execution.exit_code,
            error: execution.error.clone(),
            stdout: execution.stdout.clone(),
            stderr: execution.stderr.clone(),
        }
    }
}

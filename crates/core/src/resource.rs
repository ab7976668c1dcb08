//! Resource manager trait and its boundary value types

use taskflow_common::{JobId, ResourceLimits, ResourceUsage, Result};

/// Declares whether a job can be started right now, and why not if it can't.
#[derive(Debug, Clone)]
pub enum AdmissionDecision {
    Admit,
    Deny(String),
}

impl AdmissionDecision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admit)
    }
}

/// Admission control and live accounting for concurrently running jobs.
///
/// Implementations own the table of currently-reserved resources and are
/// the single writer for that table.
#[async_trait::async_trait]
pub trait ResourceManager: Send + Sync {
    /// Whether a job with these declared limits can start without breaching
    /// the global ceiling.
    async fn can_start(&self, job_id: &JobId, limits: &ResourceLimits) -> AdmissionDecision;

    /// Record a job as running, reserving its declared resources.
    async fn register(&self, job_id: &JobId, limits: &ResourceLimits) -> Result<()>;

    /// Release a job's reservation. Idempotent: unregistering a job that was
    /// never registered is a no-op.
    async fn unregister(&self, job_id: &JobId);

    /// Current aggregate usage: reserved totals plus a best-effort sampled
    /// snapshot of live RSS/CPU.
    async fn usage(&self) -> ResourceUsage;

    /// Attach the OS pid of a job once its process has actually spawned, so
    /// `usage()`'s live sampling can find it. The default no-op suits
    /// implementations that don't sample live RSS/CPU at all.
    fn attach_pid(&self, _job_id: &JobId, _pid: u32) {}
}

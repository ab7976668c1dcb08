//! Resource manager implementation: admission control plus a best-effort
//! live usage sample.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use sysinfo::{Pid, System};
use tracing::{debug, warn};

use taskflow_common::{GlobalResourceLimits, JobId, ResourceLimits, ResourceUsage, Result};
use taskflow_core::resource::{AdmissionDecision, ResourceManager};

#[derive(Debug, Clone, Default)]
struct Reservation {
    memory_mb: u64,
    pid: Option<u32>,
}

/// Tracks declared reservations for every running job and enforces the
/// process-wide concurrency and memory ceilings against them. Live RSS/CPU
/// sampling is best-effort: a process that already exited contributes zero,
/// never an error.
pub struct SystemResourceManager {
    limits: GlobalResourceLimits,
    reservations: Mutex<HashMap<JobId, Reservation>>,
    system: Mutex<System>,
}

impl SystemResourceManager {
    pub fn new(limits: GlobalResourceLimits) -> Self {
        Self {
            limits,
            reservations: Mutex::new(HashMap::new()),
            system: Mutex::new(System::new()),
        }
    }
}

#[async_trait]
impl ResourceManager for SystemResourceManager {
    async fn can_start(&self, _job_id: &JobId, limits: &ResourceLimits) -> AdmissionDecision {
        let reservations = self.reservations.lock();

        if reservations.len() >= self.limits.max_concurrent_jobs {
            return AdmissionDecision::Deny(format!(
                "max_concurrent_jobs ({}) reached",
                self.limits.max_concurrent_jobs
            ));
        }

        if let Some(global_cap) = self.limits.max_memory_mb {
            let reserved: u64 = reservations.values().map(|r| r.memory_mb).sum();
            let candidate = limits.max_memory_mb.unwrap_or(0);
            if reserved + candidate > global_cap {
                return AdmissionDecision::Deny(format!(
                    "reserving {candidate} MB would exceed global memory cap of {global_cap} MB (currently reserved: {reserved} MB)"
                ));
            }
        }

        AdmissionDecision::Admit
    }

    async fn register(&self, job_id: &JobId, limits: &ResourceLimits) -> Result<()> {
        let mut reservations = self.reservations.lock();
        reservations.insert(
            job_id.clone(),
            Reservation {
                memory_mb: limits.max_memory_mb.unwrap_or(0),
                pid: None,
            },
        );
        debug!(job_id = %job_id, "registered job with resource manager");
        Ok(())
    }

    async fn unregister(&self, job_id: &JobId) {
        self.reservations.lock().remove(job_id);
    }

    async fn usage(&self) -> ResourceUsage {
        let reservations = self.reservations.lock();
        let running_jobs = reservations.len();
        let reserved_memory_mb: u64 = reservations.values().map(|r| r.memory_mb).sum();
        let pids: Vec<u32> = reservations.values().filter_map(|r| r.pid).collect();
        drop(reservations);

        let (sampled_memory_mb, sampled_cpu_percent) = self.sample(&pids);

        ResourceUsage {
            running_jobs,
            reserved_memory_mb,
            sampled_memory_mb,
            sampled_cpu_percent,
            limits: self.limits.clone(),
        }
    }

    /// Registration without a pid (the admission check before spawn) still
    /// reserves memory against the ceiling; the pid arrives once the
    /// executor has actually spawned the process.
    fn attach_pid(&self, job_id: &JobId, pid: u32) {
        if let Some(reservation) = self.reservations.lock().get_mut(job_id) {
            reservation.pid = Some(pid);
        }
    }
}

impl SystemResourceManager {
    fn sample(&self, pids: &[u32]) -> (u64, f32) {
        if pids.is_empty() {
            return (0, 0.0);
        }

        let mut system = self.system.lock();
        system.refresh_processes(
            sysinfo::ProcessesToUpdate::Some(
                &pids.iter().map(|&p| Pid::from_u32(p)).collect::<Vec<_>>(),
            ),
            true,
        );

        let mut memory_kb = 0u64;
        let mut cpu_percent = 0f32;
        for &pid in pids {
            match system.process(Pid::from_u32(pid)) {
                Some(process) => {
                    memory_kb += process.memory();
                    cpu_percent += process.cpu_usage();
                }
                None => warn!(pid, "process no longer exists, sampling as zero usage"),
            }
        }

        (memory_kb / 1024, cpu_percent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(max_concurrent: usize, max_memory_mb: Option<u64>) -> GlobalResourceLimits {
        GlobalResourceLimits {
            max_concurrent_jobs: max_concurrent,
            max_memory_mb,
            max_cpu_percent: None,
        }
    }

    #[tokio::test]
    async fn admits_when_under_concurrency_cap() {
        let manager = SystemResourceManager::new(limits(2, None));
        let decision = manager
            .can_start(&JobId::from("a"), &ResourceLimits::default())
            .await;
        assert!(decision.is_admitted());
    }

    #[tokio::test]
    async fn denies_when_concurrency_cap_reached() {
        let manager = SystemResourceManager::new(limits(1, None));
        manager
            .register(&JobId::from("a"), &ResourceLimits::default())
            .await
            .unwrap();

        let decision = manager
            .can_start(&JobId::from("b"), &ResourceLimits::default())
            .await;
        assert!(!decision.is_admitted());
    }

    #[tokio::test]
    async fn denies_when_memory_cap_would_be_exceeded() {
        let manager = SystemResourceManager::new(limits(4, Some(512)));
        manager
            .register(
                &JobId::from("a"),
                &ResourceLimits {
                    max_memory_mb: Some(400),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let decision = manager
            .can_start(
                &JobId::from("b"),
                &ResourceLimits {
                    max_memory_mb: Some(200),
                    ..Default::default()
                },
            )
            .await;
        assert!(!decision.is_admitted());
    }

    #[tokio::test]
    async fn unregister_frees_the_concurrency_slot() {
        let manager = SystemResourceManager::new(limits(1, None));
        let job = JobId::from("a");
        manager.register(&job, &ResourceLimits::default()).await.unwrap();
        manager.unregister(&job).await;

        let decision = manager
            .can_start(&JobId::from("b"), &ResourceLimits::default())
            .await;
        assert!(decision.is_admitted());
    }

    #[tokio::test]
    async fn usage_reports_zero_sampled_memory_for_a_job_with_no_attached_pid() {
        let manager = SystemResourceManager::new(limits(4, None));
        manager
            .register(
                &JobId::from("a"),
                &ResourceLimits {
                    max_memory_mb: Some(128),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let usage = manager.usage().await;
        assert_eq!(usage.running_jobs, 1);
        assert_eq!(usage.reserved_memory_mb, 128);
        assert_eq!(usage.sampled_memory_mb, 0);
    }

    #[tokio::test]
    async fn attach_pid_on_an_unknown_job_is_a_no_op() {
        let manager = SystemResourceManager::new(limits(4, None));
        manager.attach_pid(&JobId::from("ghost"), 1);
    }
}

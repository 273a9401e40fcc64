//! # Downscaler
//!
//! Background task that swaps out idle processes (§4.14), grounded in
//! `original_source/control-plane/include/praas/control-plane/downscaler.hpp`.
//! The original runs this on its own OS thread with a tracked-process map
//! behind a mutex; here one `tokio` task polls every application's active
//! processes directly off the worker pool's own locking, since `Process`
//! and `Application` are already safe to read concurrently from any task.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::control_plane::deployment::Deployment;
use crate::control_plane::process::ProcessStatus;
use crate::control_plane::worker_pool::ControlPlaneWorkerPool;
use crate::util::current_timestamp_ms;

pub struct Downscaler {
    pool: Arc<ControlPlaneWorkerPool>,
    deployment: Arc<dyn Deployment>,
    polling_interval: Duration,
    swapping_threshold: Duration,
}

impl Downscaler {
    pub fn new(
        pool: Arc<ControlPlaneWorkerPool>,
        deployment: Arc<dyn Deployment>,
        polling_interval_secs: u64,
        swapping_threshold_secs: u64,
    ) -> Self {
        Downscaler {
            pool,
            deployment,
            polling_interval: Duration::from_secs(polling_interval_secs.max(1)),
            swapping_threshold: Duration::from_secs(swapping_threshold_secs),
        }
    }

    /// Runs forever, sleeping `polling_interval` between sweeps. Intended
    /// to be `tokio::spawn`ed once at startup.
    pub async fn run(self) {
        let threshold_ms = self.swapping_threshold.as_millis() as u64;
        loop {
            tokio::time::sleep(self.polling_interval).await;
            self.sweep(threshold_ms);
        }
    }

    /// One polling iteration: walks every application's active processes
    /// and schedules a swap-out for any that have been idle past
    /// `threshold_ms` (§4.14 step 2-4).
    fn sweep(&self, threshold_ms: u64) {
        let now = current_timestamp_ms();

        for application in self.pool.applications_snapshot() {
            for name in application.active_names() {
                let Some(process) = application.get_active(&name) else {
                    continue;
                };
                if process.status() != ProcessStatus::Allocated {
                    continue;
                }

                let metrics = process.metrics();
                let how_long = match metrics.last_invocation_ms {
                    Some(last) => now.saturating_sub(last),
                    None => match metrics.last_report_ms {
                        Some(last) => now.saturating_sub(last),
                        None => continue,
                    },
                };

                if how_long <= threshold_ms {
                    continue;
                }

                debug!(process = %name, idle_ms = how_long, "process idle past threshold");
                match application.swap_process(self.deployment.as_ref(), &name) {
                    Ok(()) => info!(process = %name, "scheduled idle process for swap-out"),
                    Err(e) => warn!(process = %name, error = %e, "failed to schedule swap-out"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_plane::deployment::LocalDeployment;
    use crate::control_plane::resources::{Backend, ResourceBounds, Resources};
    use crate::control_plane::tcp_server::ControlPlaneTcpServer;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    struct NeverAllocatingBackend;

    #[async_trait]
    impl Backend for NeverAllocatingBackend {
        fn bounds(&self) -> ResourceBounds {
            ResourceBounds::default()
        }

        async fn allocate_process(
            &self,
            _controlplane_addr: &str,
            _name: &str,
            _resources: Resources,
            _code_location: &str,
            _config_location: &str,
        ) -> Result<crate::control_plane::resources::AllocatedProcess, crate::error::PraasError> {
            Err(crate::error::PraasError::FailedAllocation("not used in this test".into()))
        }

        async fn deallocate_process(
            &self,
            _process: &mut crate::control_plane::resources::AllocatedProcess,
        ) -> Result<(), crate::error::PraasError> {
            Ok(())
        }
    }

    #[test]
    fn sweep_skips_applications_with_no_active_processes() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let tcp = Arc::new(ControlPlaneTcpServer::new(tx));
        let pool = Arc::new(ControlPlaneWorkerPool::new(
            Arc::new(NeverAllocatingBackend),
            tcp,
            Arc::new(LocalDeployment::new("/tmp/praas-swaps-test")),
            "127.0.0.1:9000".to_string(),
            "/code".to_string(),
            "/config".to_string(),
        ));
        pool.create_application("app", "code").unwrap();

        let downscaler = Downscaler::new(pool, Arc::new(LocalDeployment::new("/tmp/praas-swaps-test")), 5, 60);
        downscaler.sweep(60_000);
    }
}

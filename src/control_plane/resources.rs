//! # Resources and the allocation backend
//!
//! `Resources` and the bounds-checked `Backend` abstraction behind
//! `Application::add_process` (§4.12), grounded in
//! `original_source/control-plane/include/praas/control-plane/resources.hpp`
//! for the min/max vcpu and memory bounds, and in
//! `original_source/control-plane/include/praas/control-plane/process.hpp`
//! for the `sandbox_id` opaque backend handle carried by every allocated
//! process (SPEC_FULL §3).
//!
//! Out of scope per spec.md §1: the Docker-serving shim is an external
//! collaborator reached only through this trait's interface. The only
//! implementation shipped here, [`LocalBackend`], allocates a process by
//! spawning the `praas-controller` binary as a child process with the
//! environment variables named in SPEC_FULL §6 — a stand-in for "launch a
//! container via a REST call" that needs no external service to test
//! against.

use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::process::{Child, Command};
use uuid::Uuid;

use crate::error::PraasError;

/// Resource request accompanying `create_process` (§6 HTTP surface).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Resources {
    pub vcpus: u32,
    pub memory: u32,
}

/// Bounds a backend enforces on any single process's resource request.
#[derive(Debug, Clone, Copy)]
pub struct ResourceBounds {
    pub min_vcpus: u32,
    pub max_vcpus: u32,
    pub min_memory: u32,
    pub max_memory: u32,
}

impl Default for ResourceBounds {
    fn default() -> Self {
        ResourceBounds {
            min_vcpus: 1,
            max_vcpus: 16,
            min_memory: 128,
            max_memory: 16384,
        }
    }
}

impl ResourceBounds {
    pub fn validate(&self, resources: Resources) -> Result<(), PraasError> {
        if resources.vcpus < self.min_vcpus || resources.vcpus > self.max_vcpus {
            return Err(PraasError::InvalidConfiguration(format!(
                "vcpus {} out of bounds [{}, {}]",
                resources.vcpus, self.min_vcpus, self.max_vcpus
            )));
        }
        if resources.memory < self.min_memory || resources.memory > self.max_memory {
            return Err(PraasError::InvalidConfiguration(format!(
                "memory {} out of bounds [{}, {}]",
                resources.memory, self.min_memory, self.max_memory
            )));
        }
        Ok(())
    }
}

/// What a successful allocation hands back: the opaque sandbox handle and
/// the address the process's TCP wire server (§4.10) will listen on once
/// it starts, which the control plane needs to connect its dataplane
/// clients or accept the process's own registration.
#[derive(Debug, Clone)]
pub struct BackendInstance {
    pub sandbox_id: String,
    pub ip_address: String,
    pub port: u16,
}

/// A running backend-allocated process, kept alive until `deallocate`.
pub struct AllocatedProcess {
    pub instance: BackendInstance,
    child: Option<Child>,
}

impl AllocatedProcess {
    /// Builds an instance with no locally-owned child handle, for backends
    /// that don't supervise a local OS process (a Docker or SSH backend,
    /// say) and so have nothing for `deallocate_process` to kill directly.
    pub fn new(instance: BackendInstance) -> Self {
        AllocatedProcess { instance, child: None }
    }
}

impl std::fmt::Debug for AllocatedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllocatedProcess")
            .field("instance", &self.instance)
            .finish()
    }
}

/// Abstracts over however a process is actually brought up, matching the
/// out-of-scope "Docker-serving shim" collaborator named in spec.md §1.
#[async_trait::async_trait]
pub trait Backend: Send + Sync {
    fn bounds(&self) -> ResourceBounds;

    async fn allocate_process(
        &self,
        controlplane_addr: &str,
        process_name: &str,
        resources: Resources,
        code_location: &str,
        config_location: &str,
    ) -> Result<AllocatedProcess, PraasError>;

    async fn deallocate_process(&self, instance: &mut AllocatedProcess) -> Result<(), PraasError>;
}

/// Spawns `praas-controller` as a local child process per allocation.
/// `port` is chosen by the backend from a configurable range so multiple
/// processes can run side by side on one host during tests.
pub struct LocalBackend {
    bounds: ResourceBounds,
    controller_path: String,
    next_port: std::sync::atomic::AtomicU16,
}

impl LocalBackend {
    pub fn new(controller_path: impl Into<String>, base_port: u16) -> Self {
        LocalBackend {
            bounds: ResourceBounds::default(),
            controller_path: controller_path.into(),
            next_port: std::sync::atomic::AtomicU16::new(base_port),
        }
    }

    pub fn with_bounds(mut self, bounds: ResourceBounds) -> Self {
        self.bounds = bounds;
        self
    }
}

#[async_trait::async_trait]
impl Backend for LocalBackend {
    fn bounds(&self) -> ResourceBounds {
        self.bounds
    }

    async fn allocate_process(
        &self,
        controlplane_addr: &str,
        process_name: &str,
        resources: Resources,
        code_location: &str,
        config_location: &str,
    ) -> Result<AllocatedProcess, PraasError> {
        self.bounds.validate(resources)?;

        let port = self
            .next_port
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let sandbox_id = Uuid::new_v4().to_string();

        let child = Command::new(&self.controller_path)
            .env("CONTROLPLANE_ADDR", controlplane_addr)
            .env("PROCESS_ID", process_name)
            .env("CODE_LOCATION", code_location)
            .env("CONFIG_LOCATION", config_location)
            .env("PRAAS_TCP_PORT", port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| PraasError::FailedAllocation(format!("failed to spawn process controller: {e}")))?;

        Ok(AllocatedProcess {
            instance: BackendInstance {
                sandbox_id,
                ip_address: "127.0.0.1".to_string(),
                port,
            },
            child: Some(child),
        })
    }

    async fn deallocate_process(&self, instance: &mut AllocatedProcess) -> Result<(), PraasError> {
        if let Some(mut child) = instance.child.take() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_reject_vcpus_outside_the_range() {
        let bounds = ResourceBounds::default();
        assert!(bounds.validate(Resources { vcpus: 0, memory: 256 }).is_err());
        assert!(bounds.validate(Resources { vcpus: 100, memory: 256 }).is_err());
        assert!(bounds.validate(Resources { vcpus: 2, memory: 256 }).is_ok());
    }
}

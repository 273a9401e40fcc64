//! # Control-plane Application
//!
//! Owns a named collection of processes sharing one code image and drives
//! their create/swap/delete transitions (§3, §4.12), grounded in
//! `original_source/control-plane/include/praas/control-plane/application.hpp`.
//! The four collections named in spec.md §3 (`active_processes`,
//! `swapped_processes`, `controlplane_processes`, plus each process's own
//! lock) are acquired in the fixed order active -> swapped -> controlplane
//! -> process, per §5, to avoid deadlock on concurrent moves between them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::warn;

use crate::control_plane::deployment::Deployment;
use crate::control_plane::process::{Process, ProcessStatus};
use crate::control_plane::resources::{Backend, Resources};
use crate::control_plane::tcp_server::ControlPlaneTcpServer;
use crate::error::PraasError;

/// How long `add_process` waits for a newly-allocated process to dial
/// back in and register before treating the allocation as failed.
const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum number of functions a single control-plane-managed process
/// (one created implicitly by `handle_invocation`, not an explicit
/// `create_process` call) will be asked to host before a fresh one is
/// allocated, matching spec.md §4.12's "configurable max functions per
/// process".
const MAX_FUNCTIONS_PER_CONTROLPLANE_PROCESS: usize = 8;

pub struct Application {
    pub name: String,
    pub code_resource: String,
    active: RwLock<HashMap<String, Arc<Process>>>,
    swapped: RwLock<HashMap<String, Arc<Process>>>,
    controlplane_processes: RwLock<Vec<Arc<Process>>>,
    controlplane_load: RwLock<HashMap<String, usize>>,
}

/// Parameters shared by every operation that needs to reach outside the
/// `Application` into the backend/deployment/tcp collaborators (§4.12).
/// Bundled so call sites don't thread five positional arguments through
/// every method, matching the original's constructor-injected
/// `Controller&` reference the real methods close over.
pub struct Environment<'a> {
    pub backend: &'a dyn Backend,
    pub tcp: &'a ControlPlaneTcpServer,
    pub controlplane_addr: &'a str,
    pub code_location: &'a str,
    pub config_location: &'a str,
}

impl Application {
    pub fn new(name: impl Into<String>, code_resource: impl Into<String>) -> Self {
        Application {
            name: name.into(),
            code_resource: code_resource.into(),
            active: RwLock::new(HashMap::new()),
            swapped: RwLock::new(HashMap::new()),
            controlplane_processes: RwLock::new(Vec::new()),
            controlplane_load: RwLock::new(HashMap::new()),
        }
    }

    pub fn active_names(&self) -> Vec<String> {
        self.active.read().keys().cloned().collect()
    }

    pub fn swapped_names(&self) -> Vec<String> {
        self.swapped.read().keys().cloned().collect()
    }

    pub fn get_active(&self, name: &str) -> Option<Arc<Process>> {
        self.active.read().get(name).cloned()
    }

    fn get_any(&self, name: &str) -> Option<Arc<Process>> {
        self.active
            .read()
            .get(name)
            .cloned()
            .or_else(|| self.swapped.read().get(name).cloned())
    }

    /// Validates `name`/`resources`, registers expectation of the new
    /// process with the TCP server, asks the backend to allocate it, and
    /// waits for it to register before transitioning it to `ALLOCATED`.
    /// Rolls back the TCP-server registration and the `active` insert on
    /// any failure (§4.12).
    pub async fn add_process(
        &self,
        env: &Environment<'_>,
        name: &str,
        resources: Resources,
    ) -> Result<Arc<Process>, PraasError> {
        if name.is_empty() {
            return Err(PraasError::InvalidArgument("process name must not be empty".into()));
        }
        if self.active.read().contains_key(name) || self.swapped.read().contains_key(name) {
            return Err(PraasError::ObjectExists(format!("process already exists: {name}")));
        }
        env.backend.bounds().validate(resources)?;

        let process = Process::new(name, resources);
        self.active.write().insert(name.to_string(), Arc::clone(&process));

        let registered = env.tcp.expect_process(name);

        let allocation = env
            .backend
            .allocate_process(
                env.controlplane_addr,
                name,
                resources,
                env.code_location,
                env.config_location,
            )
            .await;

        let mut allocation = match allocation {
            Ok(a) => a,
            Err(e) => {
                self.active.write().remove(name);
                env.tcp.remove_process(name);
                return Err(e);
            }
        };

        let connection = match tokio::time::timeout(REGISTRATION_TIMEOUT, registered).await {
            Ok(Ok(handle)) => handle,
            _ => {
                self.active.write().remove(name);
                env.tcp.remove_process(name);
                let _ = env.backend.deallocate_process(&mut allocation).await;
                return Err(PraasError::FailedAllocation(format!(
                    "process {name} did not register within the timeout"
                )));
            }
        };

        process.connect(allocation.instance, connection)?;
        Ok(process)
    }

    /// Returns an existing control-plane-managed process with spare
    /// function capacity, or allocates a fresh one (§4.12).
    pub async fn get_controlplane_process(
        &self,
        env: &Environment<'_>,
        resources: Resources,
    ) -> Result<Arc<Process>, PraasError> {
        {
            let processes = self.controlplane_processes.read();
            let load = self.controlplane_load.read();
            for process in processes.iter() {
                if process.status() != ProcessStatus::Allocated {
                    continue;
                }
                let used = load.get(&process.name).copied().unwrap_or(0);
                if used < MAX_FUNCTIONS_PER_CONTROLPLANE_PROCESS {
                    drop(load);
                    drop(processes);
                    self.bump_controlplane_load(&process.name);
                    return Ok(Arc::clone(process));
                }
            }
        }

        let name = format!("cp-{}", uuid::Uuid::new_v4());
        let process = self.add_process(env, &name, resources).await?;
        self.controlplane_processes.write().push(Arc::clone(&process));
        self.bump_controlplane_load(&process.name);
        Ok(process)
    }

    fn bump_controlplane_load(&self, name: &str) {
        *self.controlplane_load.write().entry(name.to_string()).or_insert(0) += 1;
    }

    /// Requires `ALLOCATED`; obtains a fresh swap location and sends the
    /// swap request through the process (§4.12).
    pub fn swap_process(&self, deployment: &dyn Deployment, name: &str) -> Result<(), PraasError> {
        let process = self
            .active
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| PraasError::ObjectDoesNotExist(format!("no active process named {name}")))?;
        let location = deployment.new_swap_location(&self.name, name);
        process.swap(location)
    }

    /// Requires `SWAPPING_OUT`; moves the process from `active` to
    /// `swapped` and marks it `SWAPPED_OUT` (§4.12).
    pub fn swapped_process(&self, name: &str) -> Result<(), PraasError> {
        let mut active = self.active.write();
        let mut swapped = self.swapped.write();

        let process = active
            .get(name)
            .cloned()
            .ok_or_else(|| PraasError::ObjectDoesNotExist(format!("no active process named {name}")))?;
        if process.status() != ProcessStatus::SwappingOut {
            return Err(PraasError::InvalidProcessState {
                current: format!("{:?}", process.status()),
                attempted: "SWAPPED_OUT".to_string(),
            });
        }
        process.mark_swapped_out()?;
        active.remove(name);
        swapped.insert(name.to_string(), process);
        Ok(())
    }

    /// If the process is currently `SWAPPED_OUT`, merely closes its
    /// connection; otherwise marks it `FAILURE` and removes it from
    /// whichever collection owns it. Unknown names are logged, not fatal
    /// (§4.12, §9 Open Questions).
    pub fn closed_process(&self, name: &str) {
        let Some(process) = self.get_any(name) else {
            warn!(process = name, "closed_process for unknown process name");
            return;
        };

        if process.status() == ProcessStatus::SwappedOut {
            let _ = process.close_connection();
            return;
        }

        process.mark_failed();
        self.active.write().remove(name);
        self.swapped.write().remove(name);
        self.controlplane_processes.write().retain(|p| p.name != name);
        self.controlplane_load.write().remove(name);
    }

    /// Requires the entry to be in `swapped`; reclaims the swap location
    /// and removes the bookkeeping entry (§4.12).
    pub fn delete_process(&self, deployment: &dyn Deployment, name: &str) -> Result<(), PraasError> {
        let mut swapped = self.swapped.write();
        let process = swapped
            .get(name)
            .cloned()
            .ok_or_else(|| PraasError::ObjectDoesNotExist(format!("no swapped process named {name}")))?;

        if let Some(location) = process.swap_state().swap_location {
            deployment.delete_swap(&location)?;
        }
        swapped.remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_process_for_unknown_name_does_not_panic() {
        let app = Application::new("myapp", "code");
        app.closed_process("does-not-exist");
    }

    #[test]
    fn delete_process_requires_swapped_state() {
        let app = Application::new("myapp", "code");
        let deployment = crate::control_plane::deployment::LocalDeployment::new("/tmp/swaps");
        let err = app.delete_process(&deployment, "missing").unwrap_err();
        assert!(matches!(err, PraasError::ObjectDoesNotExist(_)));
    }
}

//! # Control-plane Process
//!
//! One sandbox's control-plane-side bookkeeping: its status state
//! machine, metrics, owned TCP connection, and swap state (§3, §4.11),
//! grounded in
//! `original_source/control-plane/include/praas/control-plane/process.hpp`.
//! A `Process` is a reference cell for one sandbox: writers take the
//! exclusive lock, readers the shared one, matching the original's
//! `std::shared_mutex` usage translated to `parking_lot::RwLock`.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::common::message::{ApplicationUpdate as WireApplicationUpdate, SwapRequest};
use crate::common::Message as WireMessage;
use crate::control_plane::deployment::SwapLocation;
use crate::control_plane::resources::{BackendInstance, Resources};
use crate::control_plane::tcp_server::ProcessConnectionHandle;
use crate::error::PraasError;
use crate::util::current_timestamp_ms;

/// The state machine in spec.md §3: `ALLOCATING -> ALLOCATED ->
/// {SWAPPING_OUT -> SWAPPED_OUT -> SWAPPING_IN -> ALLOCATED} -> CLOSED`,
/// with any state able to move to `FAILURE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Allocating,
    Allocated,
    SwappingOut,
    SwappedOut,
    SwappingIn,
    Closed,
    Failure,
}

impl ProcessStatus {
    fn name(&self) -> &'static str {
        match self {
            ProcessStatus::Allocating => "ALLOCATING",
            ProcessStatus::Allocated => "ALLOCATED",
            ProcessStatus::SwappingOut => "SWAPPING_OUT",
            ProcessStatus::SwappedOut => "SWAPPED_OUT",
            ProcessStatus::SwappingIn => "SWAPPING_IN",
            ProcessStatus::Closed => "CLOSED",
            ProcessStatus::Failure => "FAILURE",
        }
    }

    /// Whether `self -> next` is one of the allowed edges in spec.md §3.
    /// `Failure` is reachable from any non-terminal state; `Closed` is
    /// reachable only from `Allocated` (graceful close) per the original's
    /// `closed_process` handling.
    fn can_transition_to(&self, next: ProcessStatus) -> bool {
        use ProcessStatus::*;
        if next == Failure {
            return !matches!(self, Closed | Failure);
        }
        matches!(
            (self, next),
            (Allocating, Allocated)
                | (Allocated, SwappingOut)
                | (SwappingOut, SwappedOut)
                | (SwappedOut, SwappingIn)
                | (SwappingIn, Allocated)
                | (Allocated, Closed)
                | (SwappedOut, Closed)
        )
    }
}

/// Per-process invocation counters, reported periodically over
/// `DATAPLANE_METRICS` frames (§3). Behind its own mutex, separate from
/// the status lock, per §5's "Process internals: one reader/writer lock +
/// a separate mutex for metrics".
#[derive(Debug, Clone, Copy, Default)]
pub struct DataPlaneMetrics {
    pub invocations: u64,
    pub computation_time_ms: u64,
    pub last_invocation_ms: Option<u64>,
    pub last_report_ms: Option<u64>,
}

/// Swap-related state carried by a process: its in-memory size estimate,
/// the location it was last swapped to (if any), and a session id that
/// changes across swap-ins, matching spec.md §3's `state` field.
#[derive(Debug, Clone, Default)]
pub struct ProcessSwapState {
    pub size: u64,
    pub swap_location: Option<SwapLocation>,
    pub session_id: String,
}

struct ProcessInner {
    status: ProcessStatus,
    connection: Option<ProcessConnectionHandle>,
    handle: Option<BackendInstance>,
    state: ProcessSwapState,
}

/// A control-plane handle for one sandboxed process.
pub struct Process {
    pub name: String,
    pub resources: Resources,
    metrics: Mutex<DataPlaneMetrics>,
    inner: RwLock<ProcessInner>,
}

impl Process {
    pub fn new(name: impl Into<String>, resources: Resources) -> Arc<Self> {
        Arc::new(Process {
            name: name.into(),
            resources,
            metrics: Mutex::new(DataPlaneMetrics::default()),
            inner: RwLock::new(ProcessInner {
                status: ProcessStatus::Allocating,
                connection: None,
                handle: None,
                state: ProcessSwapState {
                    session_id: Uuid::new_v4().to_string(),
                    ..Default::default()
                },
            }),
        })
    }

    pub fn status(&self) -> ProcessStatus {
        self.inner.read().status
    }

    fn transition(&self, next: ProcessStatus) -> Result<(), PraasError> {
        let mut inner = self.inner.write();
        if !inner.status.can_transition_to(next) {
            return Err(PraasError::InvalidProcessState {
                current: inner.status.name().to_string(),
                attempted: next.name().to_string(),
            });
        }
        inner.status = next;
        Ok(())
    }

    /// Only valid from `ALLOCATING`; records the backend instance and the
    /// live TCP connection, then transitions to `ALLOCATED` (§4.11).
    pub fn connect(&self, handle: BackendInstance, connection: ProcessConnectionHandle) -> Result<(), PraasError> {
        {
            let mut inner = self.inner.write();
            if inner.status != ProcessStatus::Allocating {
                return Err(PraasError::InvalidProcessState {
                    current: inner.status.name().to_string(),
                    attempted: ProcessStatus::Allocated.name().to_string(),
                });
            }
            inner.handle = Some(handle);
            inner.connection = Some(connection);
            inner.status = ProcessStatus::Allocated;
        }
        Ok(())
    }

    pub fn connection(&self) -> Option<ProcessConnectionHandle> {
        self.inner.read().connection.clone()
    }

    pub fn backend_instance(&self) -> Option<BackendInstance> {
        self.inner.read().handle.clone()
    }

    pub fn swap_state(&self) -> ProcessSwapState {
        self.inner.read().state.clone()
    }

    /// Sends a `SWAP_REQUEST` for `location` and marks the process
    /// `SWAPPING_OUT`. Requires `ALLOCATED` (§4.12 `swap_process`).
    pub fn swap(&self, location: SwapLocation) -> Result<(), PraasError> {
        self.transition(ProcessStatus::SwappingOut)?;
        let connection = {
            let mut inner = self.inner.write();
            inner.state.swap_location = Some(location.clone());
            inner.connection.clone()
        };
        let connection = connection.ok_or_else(|| {
            PraasError::InvalidProcessState {
                current: "ALLOCATED".to_string(),
                attempted: "SWAPPING_OUT".to_string(),
            }
        })?;
        let request = SwapRequest::new(&location.as_uri())?;
        connection.send(WireMessage::SwapRequest(request), Vec::new())
    }

    /// Requires `SWAPPING_OUT`; called once the process reports
    /// `SWAP_CONFIRMATION` and has been moved from `active` to `swapped`
    /// by the owning `Application`.
    pub fn mark_swapped_out(&self) -> Result<(), PraasError> {
        self.transition(ProcessStatus::SwappedOut)?;
        let mut inner = self.inner.write();
        inner.connection = None;
        Ok(())
    }

    pub fn begin_swap_in(&self) -> Result<(), PraasError> {
        self.transition(ProcessStatus::SwappingIn)
    }

    pub fn finish_swap_in(&self, handle: BackendInstance, connection: ProcessConnectionHandle) -> Result<(), PraasError> {
        self.transition(ProcessStatus::Allocated)?;
        let mut inner = self.inner.write();
        inner.handle = Some(handle);
        inner.connection = Some(connection);
        inner.state.session_id = Uuid::new_v4().to_string();
        Ok(())
    }

    /// Sends an `APPLICATION_UPDATE` frame if this process still has a
    /// live connection (§4.8 step 2).
    pub fn notify_membership_change(&self, peer_id: &str, ip: &str, port: i32, status_change: i32) -> Result<(), PraasError> {
        if let Some(connection) = self.connection() {
            let update = WireApplicationUpdate::new(peer_id, ip, status_change, port)?;
            connection.send(WireMessage::ApplicationUpdate(update), Vec::new())?;
        }
        Ok(())
    }

    pub fn update_metrics(&self, invocations: u64, computation_time_ms: u64, last_invocation_ms: u64) {
        let mut metrics = self.metrics.lock();
        metrics.invocations += invocations;
        metrics.computation_time_ms += computation_time_ms;
        metrics.last_invocation_ms = Some(last_invocation_ms);
        metrics.last_report_ms = Some(current_timestamp_ms());
    }

    pub fn metrics(&self) -> DataPlaneMetrics {
        *self.metrics.lock()
    }

    /// Drops the socket and marks the process `CLOSED`. Valid from
    /// `ALLOCATED` or `SWAPPED_OUT` (graceful close, §4.11).
    pub fn close_connection(&self) -> Result<(), PraasError> {
        self.transition(ProcessStatus::Closed)?;
        let mut inner = self.inner.write();
        inner.connection = None;
        Ok(())
    }

    pub fn mark_failed(&self) {
        let mut inner = self.inner.write();
        if inner.status.can_transition_to(ProcessStatus::Failure) {
            inner.status = ProcessStatus::Failure;
            inner.connection = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resources() -> Resources {
        Resources { vcpus: 1, memory: 256 }
    }

    #[test]
    fn valid_transition_sequence_succeeds() {
        let process = Process::new("p0", resources());
        assert_eq!(process.status(), ProcessStatus::Allocating);
        assert!(process.transition(ProcessStatus::Allocated).is_ok());
        assert!(process.transition(ProcessStatus::SwappingOut).is_ok());
        assert!(process.transition(ProcessStatus::SwappedOut).is_ok());
        assert!(process.transition(ProcessStatus::SwappingIn).is_ok());
        assert!(process.transition(ProcessStatus::Allocated).is_ok());
    }

    #[test]
    fn invalid_transition_is_rejected() {
        let process = Process::new("p0", resources());
        let err = process.transition(ProcessStatus::SwappingOut).unwrap_err();
        assert!(matches!(err, PraasError::InvalidProcessState { .. }));
    }

    #[test]
    fn any_state_can_fail_except_terminal() {
        let process = Process::new("p0", resources());
        process.mark_failed();
        assert_eq!(process.status(), ProcessStatus::Failure);
    }

    #[test]
    fn metrics_accumulate_across_reports() {
        let process = Process::new("p0", resources());
        process.update_metrics(3, 120, 1000);
        process.update_metrics(2, 80, 2000);
        let metrics = process.metrics();
        assert_eq!(metrics.invocations, 5);
        assert_eq!(metrics.computation_time_ms, 200);
        assert_eq!(metrics.last_invocation_ms, Some(2000));
    }
}

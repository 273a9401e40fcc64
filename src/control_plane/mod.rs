//! # Control plane
//!
//! Everything that runs inside `praas-controlplane` (§4.2, §4.11-§4.15):
//! application/process bookkeeping, backend allocation, swap-location
//! deployment, the TCP server processes register with, the worker pool
//! that dispatches HTTP-originated invocations, the downscaler, and the
//! HTTP surface itself.

pub mod application;
pub mod deployment;
pub mod downscaler;
pub mod http_server;
pub mod process;
pub mod resources;
pub mod tcp_server;
pub mod worker_pool;

pub use application::{Application, Environment};
pub use deployment::{Deployment, LocalDeployment, SwapLocation};
pub use downscaler::Downscaler;
pub use process::{DataPlaneMetrics, Process, ProcessStatus, ProcessSwapState};
pub use resources::{AllocatedProcess, Backend, BackendInstance, LocalBackend, ResourceBounds, Resources};
pub use tcp_server::{ControlPlaneTcpServer, InboundEvent, ProcessConnectionHandle};
pub use worker_pool::{ControlPlaneWorkerPool, InvocationOutcome};

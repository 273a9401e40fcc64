//! # praas
//!
//! A serverless compute control plane and in-sandbox process controller:
//! the control plane allocates and scales per-application processes
//! (`praas-controlplane`), and each process runs its own controller
//! (`praas-controller`) that dispatches invocations to a pool of function
//! workers over a fixed-framing IPC protocol.

pub mod common;
pub mod config;
pub mod control_plane;
pub mod controller;
pub mod error;
pub mod ipc_channel;
pub mod ipc_proto;
pub mod logging;
pub mod mailbox;
pub mod registry;
pub mod sdk;
pub mod swapper;
pub mod util;
pub mod worker_pool;
pub mod workqueue;

pub use common::{Buffer, BufferPool};
pub use config::{ControlPlaneConfig, ProcessConfig};
pub use error::{PraasError, Result};

/// The current version of the crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

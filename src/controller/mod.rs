//! # Process controller (§4.8, §4.10)
//!
//! The in-sandbox half of the system: [`tcp_server`] is the wire listener
//! a process uses to talk to the control plane and its peers; [`event_loop`]
//! is the single task that ties it together with the worker pool, mailbox,
//! work queue, and swapper.

pub mod event_loop;
pub mod tcp_server;

pub use event_loop::ProcessController;
pub use tcp_server::{ExternalEvent, ExternalSignal, PeerRole, ProcessTcpServer};

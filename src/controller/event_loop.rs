//! # Process controller event loop
//!
//! The single task named in §5 "the process controller's main loop is a
//! single task cooperatively polling": one `tokio::select!` draining the
//! worker pool's IPC events and the wire server's external signals, feeding
//! both into the work queue and mailbox, and pumping ready invocations out
//! to idle workers (§4.8 steps 1-2). Grounded in
//! `original_source/process/controller/include/praas/process/controller/controller.hpp`'s
//! `Controller::poll` loop, translated from an epoll readiness loop into
//! `tokio::select!` over two channels per DESIGN NOTES' "task + channel"
//! guidance.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::common::message as wire;
use crate::common::{Buffer, Message as WireMessage};
use crate::config::ProcessConfig;
use crate::controller::tcp_server::{ExternalEvent, ExternalSignal, PeerRole, ProcessTcpServer};
use crate::error::PraasError;
use crate::ipc_proto;
use crate::mailbox::Mailbox;
use crate::registry::FunctionRegistry;
use crate::swapper::{DiskSwapper, Swapper, FILES_DIRECTORY};
use crate::util::current_timestamp_ms;
use crate::worker_pool::{WorkerEvent, Workers};
use crate::workqueue::{InvocationSource, WorkQueue};

/// Splits a concatenated worker-issued payload back into its per-buffer
/// pieces using the length table the worker itself supplied (§4.2's
/// `InvocationRequest::buffers`).
fn split_payload(payload: &[u8], lengths: &[i32]) -> Vec<Buffer> {
    let mut out = Vec::with_capacity(lengths.len());
    let mut offset = 0usize;
    for &len in lengths {
        let len = len.max(0) as usize;
        let end = (offset + len).min(payload.len());
        out.push(Buffer::from(payload[offset..end].to_vec()));
        offset = end;
    }
    out
}

/// Drives one process: the worker pool, the wire connection to the control
/// plane and peers, the mailbox, and the work queue.
pub struct ProcessController {
    config: ProcessConfig,
    tcp: Arc<ProcessTcpServer>,
    workers: Workers,
    worker_events: mpsc::UnboundedReceiver<WorkerEvent>,
    signals: mpsc::UnboundedReceiver<ExternalSignal>,
    work_queue: WorkQueue,
    mailbox: Mailbox,
    swapper: Box<dyn Swapper>,
    /// Invocation id -> the worker waiting on its result, for invocations a
    /// worker itself started (a `SELF` recursion or a call forwarded to a
    /// peer). Top-level invocations from the wire need no such entry: their
    /// waiter is the control plane or peer that sent them, identified by
    /// the invocation's recorded [`InvocationSource`] instead.
    pending_nested: HashMap<String, usize>,
}

impl ProcessController {
    pub fn new(
        config: ProcessConfig,
        registry: FunctionRegistry,
        workers: Workers,
        worker_events: mpsc::UnboundedReceiver<WorkerEvent>,
        tcp: Arc<ProcessTcpServer>,
        signals: mpsc::UnboundedReceiver<ExternalSignal>,
    ) -> Self {
        ProcessController {
            config,
            tcp,
            workers,
            worker_events,
            signals,
            work_queue: WorkQueue::new(registry),
            mailbox: Mailbox::new(),
            swapper: Box::new(DiskSwapper::new()),
            pending_nested: HashMap::new(),
        }
    }

    /// Restores mailbox contents from a prior swap-out, returning the
    /// restored files tree (if any) so the caller can point the worker
    /// pool's working directory at it (§6 `SWAPIN_LOCATION`).
    pub fn restore_from_swap(&mut self, location: &str) -> Result<Option<PathBuf>, PraasError> {
        let (entries, files_dir) = self.swapper.swap_in(location)?;
        self.mailbox.restore(entries);
        Ok(files_dir)
    }

    /// Runs until a worker or wire shutdown, or a completed swap-out, ends
    /// the process's life, then waits for every worker child to exit.
    pub async fn run(mut self) -> Result<(), PraasError> {
        self.pump().await?;
        loop {
            tokio::select! {
                event = self.worker_events.recv() => {
                    match event {
                        Some(WorkerEvent::Message(idx, msg)) => {
                            if let Err(e) = self.handle_worker_message(idx, msg).await {
                                error!(worker = idx, error = %e, "failed to handle worker message");
                            }
                        }
                        Some(WorkerEvent::Closed(idx)) => {
                            warn!(worker = idx, "worker pipe closed unexpectedly");
                            self.workers.finish(idx);
                        }
                        None => {
                            warn!("all workers disconnected, shutting down");
                            break;
                        }
                    }
                }
                signal = self.signals.recv() => {
                    match signal {
                        Some(ExternalSignal::Message(event)) => {
                            match self.handle_external_event(event).await {
                                Ok(true) => break,
                                Ok(false) => {}
                                Err(e) => error!(error = %e, "failed to handle external event"),
                            }
                        }
                        Some(ExternalSignal::Closed(role)) => {
                            warn!(?role, "peer connection closed");
                        }
                        None => {
                            warn!("wire server shut down, shutting down");
                            break;
                        }
                    }
                }
            }
        }
        self.workers.shutdown().await
    }

    /// Dispatches every ready invocation to an idle worker, repeating until
    /// either no worker is idle or nothing is ready (§4.8 step 2).
    async fn pump(&mut self) -> Result<(), PraasError> {
        while self.workers.has_idle() {
            let key = match self.work_queue.next()? {
                Some(key) => key,
                None => break,
            };
            let invocation = self
                .work_queue
                .get(&key)
                .expect("next() only returns keys of live invocations");
            if let Err(e) = self.workers.submit(invocation).await {
                error!(key = %key, error = %e, "failed to dispatch invocation to a worker");
                self.work_queue.finish(&key);
            }
        }
        Ok(())
    }

    async fn handle_worker_message(
        &mut self,
        idx: usize,
        msg: crate::ipc_channel::ReceivedMessage,
    ) -> Result<(), PraasError> {
        let payload = msg.payload;
        match ipc_proto::Message::parse(msg.header)? {
            ipc_proto::Message::GetRequest(req) => self.handle_get(idx, req).await,
            ipc_proto::Message::PutRequest(req) => {
                self.handle_put(req, payload);
                Ok(())
            }
            ipc_proto::Message::InvocationRequest(ir) => {
                self.handle_nested_invocation(idx, ir, payload.into_vec()).await
            }
            ipc_proto::Message::InvocationResult(res) => {
                self.handle_invocation_result(idx, res, payload.into_vec()).await
            }
            ipc_proto::Message::StateKeysRequest(_) => self.handle_state_keys(idx).await,
            ipc_proto::Message::ApplicationUpdate(_) | ipc_proto::Message::StateKeysResult(_) => {
                warn!(worker = idx, "worker sent a controller-to-worker-only message type");
                Ok(())
            }
        }
    }

    /// A `GET_REQUEST`, answered inline as a `PUT_REQUEST` reply carrying
    /// either the found payload or a negative `data_len` sentinel when
    /// nothing matches, since the internal protocol has no dedicated
    /// not-found variant (§9 Open Questions, see DESIGN.md).
    async fn handle_get(&mut self, idx: usize, req: ipc_proto::GetRequest) -> Result<(), PraasError> {
        let found = if req.state() {
            self.mailbox.try_state(&req.name())
        } else {
            self.mailbox.try_get(&req.name(), &req.process_id())
        };
        let (data_len, payload) = match found {
            Some(buf) => (buf.len() as i32, buf.into_vec()),
            None => (-1, Vec::new()),
        };
        let reply = ipc_proto::PutRequest::new(&req.process_id(), &req.name(), data_len, req.state())?;
        if let Some(worker) = self.workers.worker_mut(idx) {
            worker.send_frame(reply.frame(), &payload).await?;
        }
        Ok(())
    }

    fn handle_put(&mut self, req: ipc_proto::PutRequest, payload: Buffer) {
        let result = if req.state() {
            self.mailbox.state(&req.name(), payload);
            Ok(())
        } else {
            self.mailbox.put(&req.name(), &req.process_id(), payload)
        };
        if let Err(e) = result {
            warn!(error = %e, "worker PUT_REQUEST failed");
        }
    }

    async fn handle_state_keys(&mut self, idx: usize) -> Result<(), PraasError> {
        let keys = self.mailbox.state_keys();
        let encoded = bincode::serialize(&keys)
            .map_err(|e| PraasError::InvalidMessage(format!("failed to encode state keys: {e}")))?;
        let reply = ipc_proto::StateKeysResult::new(encoded.len() as i32);
        if let Some(worker) = self.workers.worker_mut(idx) {
            worker.send_frame(reply.frame(), &encoded).await?;
        }
        Ok(())
    }

    /// A worker-issued `INVOCATION_REQUEST`: either a local recursive call
    /// (`process_id == "SELF"`, the `power` demo scenario) enqueued onto
    /// this process's own work queue, or a call forwarded to a named peer
    /// over the wire (the `remote_invocation` demo scenario, §8 scenario 6).
    async fn handle_nested_invocation(
        &mut self,
        idx: usize,
        ir: ipc_proto::InvocationRequest,
        payload: Vec<u8>,
    ) -> Result<(), PraasError> {
        let target = ir.process_id();
        if target.is_empty() || target == "SELF" {
            let lengths = ir.buffer_lengths();
            let buffers = if lengths.is_empty() {
                vec![Buffer::from(payload)]
            } else {
                split_payload(&payload, &lengths)
            };
            for buf in buffers {
                self.work_queue
                    .add_payload(&ir.function_name(), &ir.invocation_id(), buf, InvocationSource::Local)?;
            }
            self.pending_nested.insert(ir.invocation_id(), idx);
            self.pump().await?;
        } else {
            let wire_request =
                wire::InvocationRequest::new(&ir.function_name(), &ir.invocation_id(), payload.len() as i32)?;
            self.tcp
                .send_to_peer(&target, WireMessage::InvocationRequest(wire_request), payload)
                .await?;
            self.pending_nested.insert(ir.invocation_id(), idx);
        }
        Ok(())
    }

    /// A worker reporting that it finished executing one of its dispatched
    /// invocations. Every invocation a worker executes came through the
    /// work queue, whatever its origin, so this always completes one.
    async fn handle_invocation_result(
        &mut self,
        idx: usize,
        res: ipc_proto::InvocationResult,
        payload: Vec<u8>,
    ) -> Result<(), PraasError> {
        self.workers.finish(idx);
        let invocation_id = res.invocation_id();
        let completed = match self.work_queue.finish(&invocation_id) {
            Some(c) => c,
            None => {
                warn!(%invocation_id, "worker reported a result for an invocation we weren't tracking");
                self.pump().await?;
                return Ok(());
            }
        };

        match completed.invocation.source {
            InvocationSource::Local => {
                if let Some(waiter_idx) = self.pending_nested.remove(&invocation_id) {
                    let frame =
                        ipc_proto::InvocationResult::new(&invocation_id, payload.len() as i32, res.return_code())?;
                    if let Some(worker) = self.workers.worker_mut(waiter_idx) {
                        worker.send_frame(frame.frame(), &payload).await?;
                    }
                } else {
                    debug!(%invocation_id, elapsed_ms = completed.elapsed_ms, "locally-issued invocation completed with no waiter");
                }
            }
            InvocationSource::DataPlane => {
                self.reply_over_wire(&PeerRole::DataPlane, &invocation_id, res.return_code(), payload)?;
            }
            InvocationSource::ControlPlane => {
                self.reply_over_wire(&PeerRole::ControlPlane, &invocation_id, res.return_code(), payload)?;
            }
            InvocationSource::Peer(peer_id) => {
                self.reply_over_wire(&PeerRole::Peer(peer_id), &invocation_id, res.return_code(), payload)?;
            }
        }

        self.pump().await?;
        Ok(())
    }

    fn reply_over_wire(
        &self,
        role: &PeerRole,
        invocation_id: &str,
        return_code: i32,
        payload: Vec<u8>,
    ) -> Result<(), PraasError> {
        let wire_result = wire::InvocationResult::new(invocation_id, return_code, payload.len() as i32)?;
        self.tcp.send_to(role, WireMessage::InvocationResult(wire_result), payload)
    }

    /// Returns `true` once the swap-out this event completes, signalling
    /// the caller to end the event loop (the backend reclaims the sandbox
    /// once `SwapConfirmation` is on the wire).
    async fn handle_external_event(&mut self, event: ExternalEvent) -> Result<bool, PraasError> {
        match event.message {
            WireMessage::InvocationRequest(ir) => {
                let source = match &event.role {
                    PeerRole::DataPlane => InvocationSource::DataPlane,
                    PeerRole::ControlPlane => InvocationSource::ControlPlane,
                    PeerRole::Peer(id) => InvocationSource::Peer(id.clone()),
                };
                self.work_queue
                    .add_payload(&ir.function_name(), &ir.invocation_id(), Buffer::from(event.payload), source)?;
                self.pump().await?;
                Ok(false)
            }
            WireMessage::SwapRequest(req) => {
                self.perform_swap_out(&req.path()).await?;
                Ok(true)
            }
            WireMessage::PutMessage(pm) => {
                if let Err(e) = self
                    .mailbox
                    .put(&pm.name(), &pm.source_process_id(), Buffer::from(event.payload))
                {
                    warn!(error = %e, "PUT_MESSAGE from a peer failed");
                }
                Ok(false)
            }
            WireMessage::ApplicationUpdate(au) => {
                self.tcp.record_peer_address(&au.process_id(), &au.ip_address(), au.port() as u16);
                let update = ipc_proto::ApplicationUpdate::new(&au.process_id(), au.status_change())?;
                for idx in 0..self.workers.len() {
                    if let Some(worker) = self.workers.worker_mut(idx) {
                        let _ = worker.send_frame(update.frame(), &[]).await;
                    }
                }
                Ok(false)
            }
            WireMessage::InvocationResult(res) => {
                if let Some(waiter_idx) = self.pending_nested.remove(&res.invocation_id()) {
                    let frame = ipc_proto::InvocationResult::new(
                        &res.invocation_id(),
                        event.payload.len() as i32,
                        res.return_code(),
                    )?;
                    if let Some(worker) = self.workers.worker_mut(waiter_idx) {
                        worker.send_frame(frame.frame(), &event.payload).await?;
                    }
                } else {
                    warn!(invocation_id = %res.invocation_id(), "received a result for an invocation we weren't waiting on");
                }
                Ok(false)
            }
            WireMessage::ProcessConnection(_)
            | WireMessage::SwapConfirmation(_)
            | WireMessage::DataplaneMetrics(_)
            | WireMessage::ProcessClosure(_) => {
                warn!(role = ?event.role, "unexpected message at process controller");
                Ok(false)
            }
        }
    }

    async fn perform_swap_out(&mut self, location: &str) -> Result<(), PraasError> {
        let started = current_timestamp_ms();
        let entries = self.mailbox.all_state();
        let files_root = PathBuf::from(&self.config.code_location).join(FILES_DIRECTORY);
        let files_root = if files_root.is_dir() { Some(files_root) } else { None };
        let swap_size = self.swapper.swap_out(location, &entries, files_root.as_deref())?;
        let elapsed_ms = current_timestamp_ms().saturating_sub(started) as f64;

        let confirmation = wire::SwapConfirmation::new(swap_size as i32, elapsed_ms);
        self.tcp
            .send_to(&PeerRole::ControlPlane, WireMessage::SwapConfirmation(confirmation), Vec::new())?;
        info!(location, swap_size, elapsed_ms, "process swapped out");
        Ok(())
    }
}

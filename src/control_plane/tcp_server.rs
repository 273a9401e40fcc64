//! # Control-plane TCP server
//!
//! Listens for process registrations and demultiplexes subsequent frames
//! to whichever control-plane component cares about them (§4.2 "TCP
//! server (control-plane)"), grounded in the teacher's
//! `ipc::tcp_socket::TcpSocketTransport` connection-table pattern
//! (`Arc<Mutex<HashMap<ConnectionId, TcpStream>>>`), adapted to key
//! connections by process name instead of a generated connection id,
//! since every connection here is always a specific named process.
//!
//! A process controller dials this server once at startup and sends a
//! [`ProcessConnection`] frame naming itself; this server replies
//! `PROCESS_CONNECTION{name: "CORRECT"}` and from then on treats the
//! socket as that process's channel for [`SwapRequest`],
//! [`ApplicationUpdate`], and [`InvocationRequest`]/[`PutMessage`] frames
//! forwarded by the control-plane worker pool (§4.13). Frames arriving
//! from the process (`DATAPLANE_METRICS`, `SWAP_CONFIRMATION`,
//! `PROCESS_CLOSURE`, `INVOCATION_RESULT`) are pushed onto `inbound` for
//! the worker pool to drain.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::common::message::{BUF_SIZE, ProcessConnection};
use crate::common::Message as WireMessage;
use crate::error::PraasError;

const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// A live handle for sending frames to one registered process.
#[derive(Clone)]
pub struct ProcessConnectionHandle {
    outbound: mpsc::UnboundedSender<(WireMessage, Vec<u8>)>,
}

impl ProcessConnectionHandle {
    pub fn send(&self, message: WireMessage, payload: Vec<u8>) -> Result<(), PraasError> {
        self.outbound
            .send((message, payload))
            .map_err(|_| PraasError::ObjectDoesNotExist("process connection is closed".into()))
    }
}

/// A frame received from a registered process, handed to the worker pool.
#[derive(Debug)]
pub enum InboundEvent {
    Message {
        process_name: String,
        message: WireMessage,
        payload: Vec<u8>,
    },
    Closed {
        process_name: String,
    },
}

enum Slot {
    Pending(oneshot::Sender<ProcessConnectionHandle>),
    Connected(ProcessConnectionHandle),
}

/// Listens for process registrations on `tcpserver.port` (§6 config).
pub struct ControlPlaneTcpServer {
    connections: Arc<RwLock<HashMap<String, Slot>>>,
    inbound_tx: mpsc::UnboundedSender<InboundEvent>,
}

impl ControlPlaneTcpServer {
    pub fn new(inbound_tx: mpsc::UnboundedSender<InboundEvent>) -> Self {
        ControlPlaneTcpServer {
            connections: Arc::new(RwLock::new(HashMap::new())),
            inbound_tx,
        }
    }

    /// Registers that `process_name` is about to be allocated and returns
    /// a future that resolves once that process dials in and registers
    /// (`Application::add_process` calling this before the backend
    /// finishes allocating matches spec.md §4.12's ordering).
    pub fn expect_process(&self, process_name: &str) -> oneshot::Receiver<ProcessConnectionHandle> {
        let (tx, rx) = oneshot::channel();
        self.connections
            .write()
            .insert(process_name.to_string(), Slot::Pending(tx));
        rx
    }

    pub fn remove_process(&self, process_name: &str) {
        self.connections.write().remove(process_name);
    }

    pub fn send_to(&self, process_name: &str, message: WireMessage, payload: Vec<u8>) -> Result<(), PraasError> {
        let guard = self.connections.read();
        match guard.get(process_name) {
            Some(Slot::Connected(handle)) => handle.send(message, payload),
            _ => Err(PraasError::ObjectDoesNotExist(format!(
                "no live connection for process {process_name}"
            ))),
        }
    }

    pub fn is_connected(&self, process_name: &str) -> bool {
        matches!(self.connections.read().get(process_name), Some(Slot::Connected(_)))
    }

    /// Binds and runs the accept loop. Each connection's first frame must
    /// be a `PROCESS_CONNECTION` naming the process; anything else closes
    /// the connection with `InvalidMessage`.
    pub async fn run(self: Arc<Self>, addr: SocketAddr) -> Result<(), PraasError> {
        let listener = TcpListener::bind(addr).await.map_err(PraasError::Io)?;
        info!(%addr, "control-plane tcp server listening");

        loop {
            let (stream, peer) = listener.accept().await.map_err(PraasError::Io)?;
            let this = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = this.handle_connection(stream, peer).await {
                    warn!(%peer, error = %e, "control-plane connection ended");
                }
            });
        }
    }

    async fn handle_connection(&self, mut stream: TcpStream, peer: SocketAddr) -> Result<(), PraasError> {
        let mut header = [0u8; BUF_SIZE];
        stream.read_exact(&mut header).await.map_err(PraasError::Io)?;
        let frame = crate::common::message::Frame::from_bytes(header);
        let registration = match WireMessage::parse(frame)? {
            WireMessage::ProcessConnection(p) => p,
            _ => {
                return Err(PraasError::InvalidMessage(
                    "first frame on a connection must be PROCESS_CONNECTION".into(),
                ))
            }
        };
        let process_name = registration.peer_name();
        debug!(%peer, %process_name, "process registered");

        let reply = ProcessConnection::new("CORRECT")?;
        write_frame(&mut stream, reply.frame().as_bytes(), &[]).await?;

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<(WireMessage, Vec<u8>)>();
        let handle = ProcessConnectionHandle { outbound: outbound_tx };

        {
            let mut guard = self.connections.write();
            match guard.remove(&process_name) {
                Some(Slot::Pending(tx)) => {
                    let _ = tx.send(handle.clone());
                }
                _ => {}
            }
            guard.insert(process_name.clone(), Slot::Connected(handle));
        }

        let (mut read_half, mut write_half) = stream.into_split();

        let writer_task = tokio::spawn(async move {
            while let Some((message, payload)) = outbound_rx.recv().await {
                let frame = message.as_frame();
                if write_frame(&mut write_half, frame.as_bytes(), &payload).await.is_err() {
                    break;
                }
            }
        });

        loop {
            let mut header = [0u8; BUF_SIZE];
            match read_half.read_exact(&mut header).await {
                Ok(_) => {}
                Err(_) => break,
            }
            let frame = crate::common::message::Frame::from_bytes(header);
            let message = match WireMessage::parse(frame) {
                Ok(m) => m,
                Err(e) => {
                    warn!(%process_name, error = %e, "invalid message, closing connection");
                    break;
                }
            };
            let remaining = message.total_length() as usize;
            let payload = if remaining > 0 {
                let mut payload = vec![0u8; remaining];
                if read_half.read_exact(&mut payload).await.is_err() {
                    break;
                }
                payload
            } else {
                Vec::new()
            };

            let _ = self.inbound_tx.send(InboundEvent::Message {
                process_name: process_name.clone(),
                message,
                payload,
            });
        }

        writer_task.abort();
        self.connections.write().remove(&process_name);
        let _ = self.inbound_tx.send(InboundEvent::Closed { process_name });
        Ok(())
    }
}

async fn write_frame<W: tokio::io::AsyncWrite + Unpin>(
    sink: &mut W,
    header: &[u8],
    payload: &[u8],
) -> Result<(), PraasError> {
    timeout(WRITE_TIMEOUT, async {
        sink.write_all(header).await?;
        if !payload.is_empty() {
            sink.write_all(payload).await?;
        }
        sink.flush().await
    })
    .await
    .map_err(|_| PraasError::Backpressure("control-plane tcp write timed out".into()))?
    .map_err(PraasError::Io)
}

//! # Process-side TCP wire server
//!
//! The process controller's half of §4.10: a listener that accepts
//! `DATAPLANE`, `CONTROLPLANE`, and named-peer connections, plus the
//! ability to dial a peer on demand once its address is known from an
//! `APPLICATION_UPDATE` (§4.8 step 2). Grounded in the same connection-table
//! pattern as `control_plane::tcp_server::ControlPlaneTcpServer`, which in
//! turn follows the teacher's `ipc::tcp_socket::TcpSocketTransport`
//! connection table; the one addition here is the outbound-dial path,
//! since a process (unlike the control plane) also initiates connections
//! to its peers.
//!
//! Every registered connection looks the same from the controller's point
//! of view once established: frames it sends go out over an unbounded
//! channel a dedicated writer task drains, and frames it receives are
//! pushed onto one shared [`ExternalSignal`] channel the process controller
//! event loop (§4.8) drains, tagged with the [`PeerRole`] they arrived on.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::common::message::{Frame, ProcessConnection, BUF_SIZE};
use crate::common::Message as WireMessage;
use crate::error::PraasError;

const WRITE_TIMEOUT: Duration = Duration::from_secs(5);
const DATAPLANE_NAME: &str = "DATAPLANE";

/// Which flavor of peer a connection belongs to (§4.10).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PeerRole {
    DataPlane,
    ControlPlane,
    Peer(String),
}

impl PeerRole {
    /// Only ever called on an *inbound* connection's announced name; the
    /// control plane never dials into a process (the process dials it, see
    /// [`ProcessTcpServer::connect_to_control_plane`]), so `CONTROLPLANE` is
    /// not a name this ever needs to recognize on accept.
    fn from_name(name: &str) -> PeerRole {
        match name {
            DATAPLANE_NAME => PeerRole::DataPlane,
            other => PeerRole::Peer(other.to_string()),
        }
    }

    fn wire_name(&self, own_name: &str) -> String {
        match self {
            PeerRole::DataPlane => DATAPLANE_NAME.to_string(),
            PeerRole::ControlPlane => own_name.to_string(),
            PeerRole::Peer(id) => id.clone(),
        }
    }
}

/// One frame received on a registered connection, handed to the process
/// controller's external queue (§4.8).
pub struct ExternalEvent {
    pub role: PeerRole,
    pub message: WireMessage,
    pub payload: Vec<u8>,
}

/// Either a frame or a connection loss, drained by the controller's event
/// loop alongside worker events and app updates.
pub enum ExternalSignal {
    Message(ExternalEvent),
    Closed(PeerRole),
}

struct Conn {
    outbound: mpsc::UnboundedSender<(WireMessage, Vec<u8>)>,
}

/// Listens on this process's own port and dials peers on demand. `own_name`
/// is this process's id, used both to answer a control-plane dial-back and
/// to introduce itself when dialing a peer.
pub struct ProcessTcpServer {
    own_name: String,
    connections: RwLock<HashMap<PeerRole, Conn>>,
    known_peers: RwLock<HashMap<String, (String, u16)>>,
    signal_tx: mpsc::UnboundedSender<ExternalSignal>,
}

impl ProcessTcpServer {
    pub fn new(own_name: impl Into<String>, signal_tx: mpsc::UnboundedSender<ExternalSignal>) -> Arc<Self> {
        Arc::new(ProcessTcpServer {
            own_name: own_name.into(),
            connections: RwLock::new(HashMap::new()),
            known_peers: RwLock::new(HashMap::new()),
            signal_tx,
        })
    }

    /// Records a peer's address from an `APPLICATION_UPDATE` (§4.8 step 2),
    /// so a later [`ProcessTcpServer::send_to`] can dial it on demand.
    pub fn record_peer_address(&self, peer_id: &str, ip: &str, port: u16) {
        self.known_peers.write().insert(peer_id.to_string(), (ip.to_string(), port));
    }

    pub fn is_connected(&self, role: &PeerRole) -> bool {
        self.connections.read().contains_key(role)
    }

    /// Binds `addr` and accepts inbound connections forever. Each
    /// connection's first frame must be `PROCESS_CONNECTION` naming the
    /// peer; this server always replies `PROCESS_CONNECTION{"CORRECT"}`.
    pub async fn run(self: Arc<Self>, addr: SocketAddr) -> Result<(u16, impl std::future::Future<Output = Result<(), PraasError>>), PraasError> {
        let listener = TcpListener::bind(addr).await.map_err(PraasError::Io)?;
        let bound_port = listener.local_addr().map_err(PraasError::Io)?.port();
        info!(%addr, port = bound_port, "process tcp server listening");

        let this = self;
        let accept_loop = async move {
            loop {
                let (stream, peer) = listener.accept().await.map_err(PraasError::Io)?;
                let this = Arc::clone(&this);
                tokio::spawn(async move {
                    if let Err(e) = this.accept_connection(stream, peer).await {
                        warn!(%peer, error = %e, "process connection ended");
                    }
                });
            }
        };
        Ok((bound_port, accept_loop))
    }

    async fn accept_connection(self: Arc<Self>, mut stream: TcpStream, peer: SocketAddr) -> Result<(), PraasError> {
        let mut header = [0u8; BUF_SIZE];
        stream.read_exact(&mut header).await.map_err(PraasError::Io)?;
        let registration = match WireMessage::parse(Frame::from_bytes(header))? {
            WireMessage::ProcessConnection(p) => p,
            _ => {
                return Err(PraasError::InvalidMessage(
                    "first frame on a connection must be PROCESS_CONNECTION".into(),
                ))
            }
        };
        let role = PeerRole::from_name(&registration.peer_name());
        debug!(%peer, ?role, "peer registered");

        let reply = ProcessConnection::new("CORRECT")?;
        write_frame(&mut stream, reply.frame().as_bytes(), &[]).await?;

        self.run_connection(role, stream).await
    }

    /// Dials `addr`, introduces itself, and waits for the `CORRECT` reply
    /// before handing the connection to [`ProcessTcpServer::run_connection`].
    async fn dial(self: &Arc<Self>, addr: &str, role: PeerRole) -> Result<(), PraasError> {
        let mut stream = TcpStream::connect(addr).await.map_err(PraasError::Io)?;
        let announce_name = role.wire_name(&self.own_name);
        let announce = ProcessConnection::new(&announce_name)?;
        write_frame(&mut stream, announce.frame().as_bytes(), &[]).await?;

        let mut header = [0u8; BUF_SIZE];
        stream.read_exact(&mut header).await.map_err(PraasError::Io)?;
        match WireMessage::parse(Frame::from_bytes(header))? {
            WireMessage::ProcessConnection(reply) if reply.peer_name() == "CORRECT" => {}
            _ => return Err(PraasError::InvalidMessage("peer did not reply PROCESS_CONNECTION(CORRECT)".into())),
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.run_connection(role, stream).await {
                warn!(error = %e, "dialed connection ended");
            }
        });
        Ok(())
    }

    /// Dials the control plane's TCP server at `addr` and registers as
    /// `CONTROLPLANE` (§4.10; the process always initiates this one
    /// connection at startup, matching
    /// `control_plane::tcp_server::ControlPlaneTcpServer`'s expectation
    /// that "a process controller dials this server once at startup").
    pub async fn connect_to_control_plane(self: &Arc<Self>, addr: &str) -> Result<(), PraasError> {
        self.dial(addr, PeerRole::ControlPlane).await
    }

    fn register(&self, role: PeerRole, outbound: mpsc::UnboundedSender<(WireMessage, Vec<u8>)>) {
        self.connections.write().insert(role, Conn { outbound });
    }

    async fn run_connection(self: Arc<Self>, role: PeerRole, stream: TcpStream) -> Result<(), PraasError> {
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<(WireMessage, Vec<u8>)>();
        self.register(role.clone(), outbound_tx);

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
            if read_half.read_exact(&mut header).await.is_err() {
                break;
            }
            let message = match WireMessage::parse(Frame::from_bytes(header)) {
                Ok(m) => m,
                Err(e) => {
                    warn!(?role, error = %e, "invalid message, closing connection");
                    break;
                }
            };
            let remaining = message.total_length() as usize;
            let payload = if remaining > 0 {
                let mut buf = vec![0u8; remaining];
                if read_half.read_exact(&mut buf).await.is_err() {
                    break;
                }
                buf
            } else {
                Vec::new()
            };

            let _ = self.signal_tx.send(ExternalSignal::Message(ExternalEvent {
                role: role.clone(),
                message,
                payload,
            }));
        }

        writer_task.abort();
        self.connections.write().remove(&role);
        let _ = self.signal_tx.send(ExternalSignal::Closed(role));
        Ok(())
    }

    /// Sends `message` on an already-registered connection for `role`.
    pub fn send_to(&self, role: &PeerRole, message: WireMessage, payload: Vec<u8>) -> Result<(), PraasError> {
        let guard = self.connections.read();
        let conn = guard
            .get(role)
            .ok_or_else(|| PraasError::ObjectDoesNotExist(format!("no live connection for {role:?}")))?;
        conn.outbound
            .send((message, payload))
            .map_err(|_| PraasError::ObjectDoesNotExist("connection is closed".into()))
    }

    /// Sends `message` to a peer process, dialing it first if there is no
    /// live connection yet and its address is known from a prior
    /// `APPLICATION_UPDATE` (§4.8 step 1 "PUT_REQUEST: ... else forward
    /// remotely", and the `remote_invocation` scenario in spec.md §8).
    pub async fn send_to_peer(self: &Arc<Self>, peer_id: &str, message: WireMessage, payload: Vec<u8>) -> Result<(), PraasError> {
        let role = PeerRole::Peer(peer_id.to_string());
        if !self.is_connected(&role) {
            let (ip, port) = self
                .known_peers
                .read()
                .get(peer_id)
                .cloned()
                .ok_or_else(|| PraasError::ObjectDoesNotExist(format!("no known address for peer {peer_id}")))?;
            self.dial(&format!("{ip}:{port}"), role.clone()).await?;
        }
        self.send_to(&role, message, payload)
    }
}

async fn write_frame<W: tokio::io::AsyncWrite + Unpin>(sink: &mut W, header: &[u8], payload: &[u8]) -> Result<(), PraasError> {
    timeout(WRITE_TIMEOUT, async {
        sink.write_all(header).await?;
        if !payload.is_empty() {
            sink.write_all(payload).await?;
        }
        sink.flush().await
    })
    .await
    .map_err(|_| PraasError::Backpressure("process tcp write timed out".into()))?
    .map_err(PraasError::Io)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_role_from_name_recognizes_reserved_names() {
        assert_eq!(PeerRole::from_name("DATAPLANE"), PeerRole::DataPlane);
        assert_eq!(PeerRole::from_name("proc-1"), PeerRole::Peer("proc-1".to_string()));
    }

    #[tokio::test]
    async fn record_and_check_peer_address() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let server = ProcessTcpServer::new("proc-0", tx);
        server.record_peer_address("proc-1", "127.0.0.1", 9100);
        assert!(!server.is_connected(&PeerRole::Peer("proc-1".to_string())));
    }
}

//! End-to-end exercises of the control-plane surface against a fake
//! backend that dials the real [`ControlPlaneTcpServer`] over a loopback
//! socket instead of spawning a real `praas-controller` child, standing in
//! for the process side of spec.md §8's walkthrough scenarios without
//! needing the compiled binaries.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use praas::common::message::{
    BUF_SIZE, Frame, InvocationResult, ProcessConnection, SwapConfirmation,
};
use praas::common::Message as WireMessage;
use praas::control_plane::{
    AllocatedProcess, Backend, BackendInstance, ControlPlaneTcpServer, ControlPlaneWorkerPool,
    LocalDeployment, ResourceBounds, Resources,
};
use praas::error::PraasError;

/// A [`Backend`] that, instead of spawning a real OS process, dials the
/// control plane's own TCP server to stand in for one — just enough of
/// `original_source/process/controller/main.cpp`'s registration handshake
/// to drive `Application::add_process` through a real round trip.
struct FakeBackend;

#[async_trait::async_trait]
impl Backend for FakeBackend {
    fn bounds(&self) -> ResourceBounds {
        ResourceBounds::default()
    }

    async fn allocate_process(
        &self,
        controlplane_addr: &str,
        process_name: &str,
        _resources: Resources,
        _code_location: &str,
        _config_location: &str,
    ) -> Result<AllocatedProcess, PraasError> {
        let addr: SocketAddr = controlplane_addr.parse().map_err(|e| {
            PraasError::FailedAllocation(format!("bad control-plane address: {e}"))
        })?;
        let process_name = process_name.to_string();
        tokio::spawn(async move {
            if let Err(e) = run_fake_process(addr, &process_name).await {
                eprintln!("fake process {process_name} ended: {e}");
            }
        });

        Ok(AllocatedProcess::new(BackendInstance {
            sandbox_id: "fake-sandbox".to_string(),
            ip_address: "127.0.0.1".to_string(),
            port: 0,
        }))
    }

    async fn deallocate_process(&self, _instance: &mut AllocatedProcess) -> Result<(), PraasError> {
        Ok(())
    }
}

/// Registers as `process_name`, then answers exactly one `SWAP_REQUEST`
/// with a `SWAP_CONFIRMATION` and exactly one `INVOCATION_REQUEST` for
/// `"add"` with the sum of its two little-endian i32 operands, matching
/// the demo invoker's own `add` semantics closely enough to validate the
/// round trip end to end.
async fn run_fake_process(addr: SocketAddr, process_name: &str) -> anyhow::Result<()> {
    let mut stream = TcpStream::connect(addr).await?;

    let registration = ProcessConnection::new(process_name)?;
    stream.write_all(registration.frame().as_bytes()).await?;
    stream.flush().await?;

    let mut reply = [0u8; BUF_SIZE];
    stream.read_exact(&mut reply).await?;

    loop {
        let mut header = [0u8; BUF_SIZE];
        if stream.read_exact(&mut header).await.is_err() {
            return Ok(());
        }
        let frame = Frame::from_bytes(header);
        let total_length = frame.total_length() as usize;
        let message = WireMessage::parse(frame)?;

        let mut payload = vec![0u8; total_length];
        if total_length > 0 {
            stream.read_exact(&mut payload).await?;
        }

        match message {
            WireMessage::SwapRequest(_) => {
                let confirmation = SwapConfirmation::new(7, 3.5);
                stream.write_all(confirmation.frame().as_bytes()).await?;
                stream.flush().await?;
            }
            WireMessage::InvocationRequest(req) => {
                let a = i32::from_le_bytes(payload[0..4].try_into()?);
                let b = i32::from_le_bytes(payload[4..8].try_into()?);
                let sum = (a + b).to_le_bytes();
                let result = InvocationResult::new(&req.invocation_id(), 0, sum.len() as i32)?;
                stream.write_all(result.frame().as_bytes()).await?;
                stream.write_all(&sum).await?;
                stream.flush().await?;
            }
            _ => {}
        }
    }
}

async fn spawn_pool() -> (Arc<ControlPlaneWorkerPool>, Arc<ControlPlaneTcpServer>) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let tcp = Arc::new(ControlPlaneTcpServer::new(inbound_tx));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let deployment = Arc::new(LocalDeployment::new(std::env::temp_dir().join("praas-test-swaps")));
    let pool = Arc::new(ControlPlaneWorkerPool::new(
        Arc::new(FakeBackend),
        Arc::clone(&tcp),
        deployment,
        addr.to_string(),
        "./code".to_string(),
        "./config".to_string(),
    ));

    let tcp_for_accept = Arc::clone(&tcp);
    tokio::spawn(async move {
        let _ = tcp_for_accept.run(addr).await;
    });
    tokio::spawn(Arc::clone(&pool).run_inbound_loop(inbound_rx));

    // Give the accept loop a moment to actually be listening.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    (pool, tcp)
}

#[tokio::test]
async fn create_process_registers_and_lists_as_active() {
    let (pool, _tcp) = spawn_pool().await;

    pool.create_application("myapp", "code.tar").unwrap();
    assert!(matches!(
        pool.create_application("myapp", "code.tar").unwrap_err(),
        PraasError::ObjectExists(_)
    ));

    let instance = pool
        .create_process("myapp", "proc-1", Resources { vcpus: 1, memory: 256 })
        .await
        .unwrap();
    assert_eq!(instance.ip_address, "127.0.0.1");

    let (active, swapped) = pool.list_processes("myapp").unwrap();
    assert_eq!(active, vec!["proc-1".to_string()]);
    assert!(swapped.is_empty());

    pool.stop_process("myapp", "proc-1").unwrap();
    let (active, _) = pool.list_processes("myapp").unwrap();
    assert!(active.is_empty());
}

#[tokio::test]
async fn swap_process_round_trips_through_the_fake_process() {
    let (pool, _tcp) = spawn_pool().await;

    pool.create_application("swapapp", "code.tar").unwrap();
    pool.create_process("swapapp", "proc-swap", Resources { vcpus: 1, memory: 256 })
        .await
        .unwrap();

    let (size, time_ms) = pool.swap_process("swapapp", "proc-swap").await.unwrap();
    assert_eq!(size, 7);
    assert!((time_ms - 3.5).abs() < f64::EPSILON);

    let (active, swapped) = pool.list_processes("swapapp").unwrap();
    assert!(active.is_empty());
    assert_eq!(swapped, vec!["proc-swap".to_string()]);
}

#[tokio::test]
async fn handle_invocation_round_trips_through_the_fake_process() {
    let (pool, _tcp) = spawn_pool().await;

    pool.create_application("invokeapp", "code.tar").unwrap();
    pool.create_process("invokeapp", "proc-invoke", Resources { vcpus: 1, memory: 256 })
        .await
        .unwrap();

    let mut payload = Vec::new();
    payload.extend_from_slice(&4i32.to_le_bytes());
    payload.extend_from_slice(&5i32.to_le_bytes());

    let outcome = pool.handle_invocation("invokeapp", "add", payload).await.unwrap();
    assert_eq!(outcome.return_code, 0);
    assert_eq!(i32::from_le_bytes(outcome.result[0..4].try_into().unwrap()), 9);
}

#[tokio::test]
async fn create_process_for_unknown_application_fails() {
    let (pool, _tcp) = spawn_pool().await;
    let err = pool
        .create_process("no-such-app", "proc", Resources { vcpus: 1, memory: 256 })
        .await
        .unwrap_err();
    assert!(matches!(err, PraasError::ObjectDoesNotExist(_)));
}

//! `praas-controller`: the process-side binary.
//!
//! Launched by a [`praas::control_plane::resources::Backend`] (in this
//! implementation, [`praas::control_plane::resources::LocalBackend`]) once
//! per allocated process, parameterized entirely through environment
//! variables per §6 — there is no CLI surface here, matching how
//! `original_source/process/controller/main.cpp` is bootstrapped by its own
//! supervisor rather than invoked by a human.

use std::fs;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info};

use praas::config::ProcessConfig;
use praas::controller::{ExternalSignal, ProcessController, ProcessTcpServer};
use praas::registry::FunctionRegistry;
use praas::worker_pool::Workers;

/// The manifest language key this port's single demo invoker registers
/// itself under, since "language" as the original manifest format uses it
/// (cpp/python source trees) doesn't apply to a single Rust binary hosting
/// every demo function (see DESIGN.md).
const MANIFEST_LANGUAGE: &str = "native";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    praas::logging::init();

    let config = ProcessConfig::from_env()?;
    info!(process_id = %config.process_id, "process controller starting");

    let manifest_json = fs::read_to_string(&config.config_location)
        .map_err(|e| anyhow::anyhow!("failed to read function manifest at {}: {e}", config.config_location))?;
    let registry = FunctionRegistry::load(&manifest_json, MANIFEST_LANGUAGE)?;
    info!(functions = registry.len(), "function manifest loaded");

    let (workers, worker_events) = Workers::spawn(config.worker_count, &config.invoker_path, &config.process_id)?;

    let (signal_tx, signals) = mpsc::unbounded_channel::<ExternalSignal>();
    let tcp = ProcessTcpServer::new(config.process_id.clone(), signal_tx);

    let bind_addr: SocketAddr = format!("0.0.0.0:{}", config.tcp_port).parse()?;
    let (bound_port, accept_loop) = Arc::clone(&tcp).run(bind_addr).await?;
    info!(port = bound_port, "process tcp server bound");
    tokio::spawn(async move {
        if let Err(e) = accept_loop.await {
            error!(error = %e, "process tcp accept loop ended");
        }
    });

    tcp.connect_to_control_plane(&config.controlplane_addr).await?;
    info!(addr = %config.controlplane_addr, "registered with control plane");

    let mut controller = ProcessController::new(config.clone(), registry, workers, worker_events, Arc::clone(&tcp), signals);

    if let Some(location) = &config.swapin_location {
        info!(location, "restoring from swap");
        controller.restore_from_swap(location)?;
    }

    controller.run().await?;
    info!("process controller exiting");
    Ok(())
}

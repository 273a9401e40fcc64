//! `praas-controlplane`: the control-plane binary.
//!
//! Wires together every piece under [`praas::control_plane`]: the local
//! backend that spawns `praas-controller` children, the disk-backed
//! deployment that hands out swap locations, the TCP server processes
//! register with, the worker pool that dispatches HTTP-originated
//! invocations, the downscaler, and the HTTP surface itself (§4.2, §4.11-
//! §4.15). Grounded in the teacher's `cli::Args` -> config -> run-loop
//! shape, generalized from a benchmark driver into a long-running server.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info};

use praas::config::ControlPlaneConfig;
use praas::control_plane::{ControlPlaneTcpServer, ControlPlaneWorkerPool, Downscaler, LocalBackend, LocalDeployment};

#[derive(Parser, Debug)]
#[command(author, version, about = "The praas control plane", long_about = None)]
struct Args {
    /// Path to a JSON config file (§6 "Config"); falls back to defaults
    /// with env overrides when omitted.
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Path (or bare name resolved on `$PATH`) to the `praas-controller`
    /// binary the local backend spawns per allocated process.
    #[arg(long, default_value = "praas-controller")]
    controller_path: String,

    /// First port handed out to spawned processes' own wire servers; each
    /// successive allocation gets the next one.
    #[arg(long, default_value_t = 30000)]
    process_port_base: u16,

    /// Directory containing the function code bundles spawned processes
    /// are pointed at via `CODE_LOCATION` (§6).
    #[arg(long, default_value = "./code")]
    code_location: String,

    /// Directory (or file) containing the function manifest spawned
    /// processes are pointed at via `CONFIG_LOCATION` (§6).
    #[arg(long, default_value = "./config")]
    config_location: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    praas::logging::init();

    let args = Args::parse();
    let config = ControlPlaneConfig::load(args.config.as_deref())?;
    info!(?config, "control plane starting");

    let controlplane_addr = format!("{}:{}", config.ip_address, config.tcpserver.port);

    let backend = Arc::new(LocalBackend::new(args.controller_path, args.process_port_base));
    let deployment = Arc::new(LocalDeployment::new(config.swaps_location.clone()));

    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let tcp = Arc::new(ControlPlaneTcpServer::new(inbound_tx));

    let pool = Arc::new(ControlPlaneWorkerPool::new(
        backend,
        Arc::clone(&tcp),
        deployment.clone(),
        controlplane_addr.clone(),
        args.code_location,
        args.config_location,
    ));

    let tcp_addr: SocketAddr = controlplane_addr.parse()?;
    tokio::spawn(async move {
        if let Err(e) = tcp.run(tcp_addr).await {
            error!(error = %e, "control-plane tcp server ended");
        }
    });

    tokio::spawn(Arc::clone(&pool).run_inbound_loop(inbound_rx));

    let downscaler = Downscaler::new(
        Arc::clone(&pool),
        deployment,
        config.downscaler.polling_interval,
        config.downscaler.swapping_threshold,
    );
    tokio::spawn(downscaler.run());

    let http_addr: SocketAddr = format!("{}:{}", config.ip_address, config.http.port).parse()?;
    let listener = TcpListener::bind(http_addr).await?;
    info!(%http_addr, "control plane http server listening");

    let router = praas::control_plane::http_server::router(pool);
    axum::serve(listener, router).await?;

    Ok(())
}

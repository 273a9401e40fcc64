//! # Configuration
//!
//! JSON config file plus environment-variable overrides (§6 "Config"),
//! grounded in the teacher's `cli::Args` -> `BenchmarkConfiguration`
//! pattern: a plain struct with a `Default` impl, loaded from a file and
//! then selectively overridden from the process environment for test
//! isolation (`PRAAS_TCP_PORT`/`PRAAS_HTTP_PORT`, per SPEC_FULL §6).

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::PraasError;

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_port")]
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            port: default_http_port(),
        }
    }
}

fn default_http_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkersConfig {
    #[serde(default = "default_worker_threads")]
    pub threads: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        WorkersConfig {
            threads: default_worker_threads(),
        }
    }
}

fn default_worker_threads() -> usize {
    num_cpus::get().max(1)
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownscalerConfig {
    #[serde(default = "default_polling_interval")]
    pub polling_interval: u64,
    #[serde(default = "default_swapping_threshold")]
    pub swapping_threshold: u64,
}

impl Default for DownscalerConfig {
    fn default() -> Self {
        DownscalerConfig {
            polling_interval: default_polling_interval(),
            swapping_threshold: default_swapping_threshold(),
        }
    }
}

fn default_polling_interval() -> u64 {
    5
}

fn default_swapping_threshold() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct TcpServerConfig {
    #[serde(default = "default_tcp_port")]
    pub port: u16,
    #[serde(default = "default_io_threads")]
    pub io_threads: usize,
}

impl Default for TcpServerConfig {
    fn default() -> Self {
        TcpServerConfig {
            port: default_tcp_port(),
            io_threads: default_io_threads(),
        }
    }
}

fn default_tcp_port() -> u16 {
    9000
}

fn default_io_threads() -> usize {
    2
}

/// The control plane's top-level config, covering §6's `http`,
/// `workers.threads`, `downscaler.*`, `tcpserver.*`, `ip-address`, and
/// `http-client-io-threads` sections. Backend/deployment-specific
/// sections are out of scope (this implementation only ever runs the
/// local backend and the disk swapper, see DESIGN.md).
#[derive(Debug, Clone, Deserialize)]
pub struct ControlPlaneConfig {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub downscaler: DownscalerConfig,
    #[serde(default)]
    pub tcpserver: TcpServerConfig,
    #[serde(default = "default_ip_address")]
    pub ip_address: String,
    #[serde(default = "default_http_client_io_threads")]
    pub http_client_io_threads: usize,
    #[serde(default = "default_swaps_location")]
    pub swaps_location: String,
}

fn default_ip_address() -> String {
    "127.0.0.1".to_string()
}

fn default_http_client_io_threads() -> usize {
    1
}

fn default_swaps_location() -> String {
    "./swaps".to_string()
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        ControlPlaneConfig {
            http: HttpConfig::default(),
            workers: WorkersConfig::default(),
            downscaler: DownscalerConfig::default(),
            tcpserver: TcpServerConfig::default(),
            ip_address: default_ip_address(),
            http_client_io_threads: default_http_client_io_threads(),
            swaps_location: default_swaps_location(),
        }
    }
}

impl ControlPlaneConfig {
    /// Loads from `path` if it exists, else falls back to defaults, then
    /// applies `PRAAS_TCP_PORT`/`PRAAS_HTTP_PORT` overrides from the
    /// environment (SPEC_FULL §6, for test isolation across parallel runs).
    pub fn load(path: Option<&Path>) -> Result<Self, PraasError> {
        let mut config = match path {
            Some(p) if p.exists() => {
                let raw = fs::read_to_string(p).map_err(PraasError::Io)?;
                serde_json::from_str(&raw)
                    .map_err(|e| PraasError::InvalidConfiguration(format!("malformed config: {e}")))?
            }
            _ => ControlPlaneConfig::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("PRAAS_TCP_PORT") {
            if let Ok(port) = port.parse() {
                self.tcpserver.port = port;
            }
        }
        if let Ok(port) = std::env::var("PRAAS_HTTP_PORT") {
            if let Ok(port) = port.parse() {
                self.http.port = port;
            }
        }
    }
}

/// The in-process process controller's config: which process id it is,
/// where its function manifest and code live, and where to swap in from
/// on start if `SWAPIN_LOCATION` is set (§6 "Environment variables").
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub controlplane_addr: String,
    pub process_id: String,
    pub code_location: String,
    pub config_location: String,
    pub swapin_location: Option<String>,
    pub worker_count: usize,
    pub tcp_port: u16,
    pub invoker_path: String,
}

impl ProcessConfig {
    /// Reads the environment variables named in §6 directly; unlike the
    /// control plane's JSON config, the process controller is launched
    /// per-sandbox by the backend, which hands it parameters as env vars
    /// rather than a config file (matches `original_source`'s
    /// `process/controller/main.cpp` bootstrap).
    ///
    /// `PRAAS_TCP_PORT` here is the same env var name
    /// [`ControlPlaneConfig::apply_env_overrides`] reads, but the two never
    /// collide: `LocalBackend::allocate_process` sets it only in the
    /// spawned `praas-controller` child's environment, telling that
    /// process which port its own wire server (§4.10) should listen on,
    /// while the control plane reads it from its own process environment
    /// to override its registration server's port. `0` (the default) asks
    /// the OS for an ephemeral port, which is then reported back to the
    /// control plane in the `PROCESS_CONNECTION` handshake.
    pub fn from_env() -> Result<Self, PraasError> {
        let controlplane_addr = std::env::var("CONTROLPLANE_ADDR")
            .map_err(|_| PraasError::InvalidConfiguration("CONTROLPLANE_ADDR is not set".into()))?;
        let process_id = std::env::var("PROCESS_ID")
            .map_err(|_| PraasError::InvalidConfiguration("PROCESS_ID is not set".into()))?;
        let code_location = std::env::var("CODE_LOCATION")
            .map_err(|_| PraasError::InvalidConfiguration("CODE_LOCATION is not set".into()))?;
        let config_location = std::env::var("CONFIG_LOCATION")
            .map_err(|_| PraasError::InvalidConfiguration("CONFIG_LOCATION is not set".into()))?;
        let swapin_location = std::env::var("SWAPIN_LOCATION").ok();
        let worker_count = std::env::var("PRAAS_WORKER_COUNT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(4);
        let tcp_port = std::env::var("PRAAS_TCP_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let invoker_path = std::env::var("PRAAS_INVOKER_PATH").unwrap_or_else(|_| "praas-demo-invoker".to_string());

        Ok(ProcessConfig {
            controlplane_addr,
            process_id,
            code_location,
            config_location,
            swapin_location,
            worker_count,
            tcp_port,
            invoker_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = ControlPlaneConfig::default();
        assert_eq!(config.http.port, 8080);
        assert_eq!(config.tcpserver.port, 9000);
        assert!(config.workers.threads >= 1);
    }

    #[test]
    fn loads_partial_json_and_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"http": {"port": 9090}}"#).unwrap();

        let config = ControlPlaneConfig::load(Some(&path)).unwrap();
        assert_eq!(config.http.port, 9090);
        assert_eq!(config.tcpserver.port, 9000);
    }

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let config = ControlPlaneConfig::load(Some(Path::new("/nonexistent/path.json"))).unwrap();
        assert_eq!(config.http.port, 8080);
    }
}

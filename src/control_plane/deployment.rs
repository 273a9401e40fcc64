//! # Deployment (swap location allocation)
//!
//! The control-plane half of swapping: hands each `swap_process` call a
//! fresh [`SwapLocation`] and later reclaims it on `delete_process`
//! (§4.12, §4.7), grounded in
//! `original_source/control-plane/include/praas/control-plane/deployment.hpp`.
//! The matching in-process half is [`crate::swapper::Swapper`]; this type
//! only hands out and deletes the opaque location string, it never touches
//! the swapped bytes itself (those live on whatever host runs the process).

use std::path::Path;

use crate::error::PraasError;

/// An opaque swap destination, e.g. `local:///swaps/<app>/<proc>`
/// (SPEC_FULL §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapLocation {
    pub scheme: String,
    pub path: String,
}

impl SwapLocation {
    pub fn as_uri(&self) -> String {
        format!("{}://{}", self.scheme, self.path)
    }
}

pub trait Deployment: Send + Sync {
    /// Allocates a fresh swap location for `app`/`process_name`.
    fn new_swap_location(&self, app: &str, process_name: &str) -> SwapLocation;

    /// Reclaims a swap location once its process has been deleted.
    fn delete_swap(&self, location: &SwapLocation) -> Result<(), PraasError>;
}

/// Swaps under a local filesystem root, matching [`crate::swapper::DiskSwapper`].
pub struct LocalDeployment {
    root: String,
}

impl LocalDeployment {
    pub fn new(root: impl Into<String>) -> Self {
        LocalDeployment { root: root.into() }
    }
}

impl Deployment for LocalDeployment {
    fn new_swap_location(&self, app: &str, process_name: &str) -> SwapLocation {
        SwapLocation {
            scheme: "local".to_string(),
            path: format!("{}/{app}/{process_name}", self.root.trim_end_matches('/')),
        }
    }

    fn delete_swap(&self, location: &SwapLocation) -> Result<(), PraasError> {
        let path = Path::new(&location.path);
        if path.exists() {
            std::fs::remove_dir_all(path).map_err(PraasError::Io)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_deployment_builds_a_path_under_its_root() {
        let deployment = LocalDeployment::new("/swaps");
        let loc = deployment.new_swap_location("myapp", "proc-0");
        assert_eq!(loc.path, "/swaps/myapp/proc-0");
        assert_eq!(loc.as_uri(), "local:///swaps/myapp/proc-0");
    }
}

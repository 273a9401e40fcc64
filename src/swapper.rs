//! # Swapper
//!
//! Persists a process's mailbox, state, and worker-local files to a swap
//! location, and restores them symmetrically on swap-in (§4.7), grounded
//! in `original_source/process/controller/include/praas/process/controller/swapper.hpp`'s
//! `Swapper`/`DiskSwapper` pair. Unlike the original's `swap_out`
//! signature (destination + mailbox tuples only), this port also accepts
//! an optional worker files root, since the recursive file copy the
//! original performs against its hardcoded `FILES_DIRECTORY` constant
//! needs a concrete source directory to copy from.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::PraasError;
use crate::mailbox::MailboxSnapshotEntry;

/// Subdirectory, under a process's worker-local filesystem, that gets
/// mirrored into the swap location's `files/` tree.
pub const FILES_DIRECTORY: &str = "state";

/// Strips the `local://` scheme off a swap location URI
/// (`crate::control_plane::deployment::SwapLocation::as_uri`), returning
/// the filesystem path underneath (§4.7). `DiskSwapper` only understands
/// the `local` scheme; anything else is rejected rather than silently
/// treated as a relative path.
fn local_path(location: &str) -> Result<&Path, PraasError> {
    location
        .strip_prefix("local://")
        .map(Path::new)
        .ok_or_else(|| {
            PraasError::InvalidConfiguration(format!(
                "DiskSwapper only understands local:// swap locations, got: {location}"
            ))
        })
}

pub trait Swapper: Send + Sync {
    /// Writes `entries` and, if given, everything under `files_root`, to
    /// `location`. Returns the total number of bytes written.
    fn swap_out(
        &self,
        location: &str,
        entries: &[MailboxSnapshotEntry],
        files_root: Option<&Path>,
    ) -> Result<u64, PraasError>;

    /// Reads back everything previously written to `location` by
    /// `swap_out`. Returns the restored mailbox entries and, if a
    /// `files/` tree exists, its path (the caller points `SWAPIN_LOCATION`
    /// at it directly rather than copying again).
    fn swap_in(&self, location: &str) -> Result<(Vec<MailboxSnapshotEntry>, Option<PathBuf>), PraasError>;
}

/// Swaps to the local filesystem: `<location>/state/<key>`,
/// `<location>/messages/<key>`, `<location>/files/<original-tree>`.
#[derive(Debug, Default)]
pub struct DiskSwapper;

impl DiskSwapper {
    pub fn new() -> Self {
        DiskSwapper
    }
}

fn message_filename(name: &str, source: &str) -> String {
    format!("{name}__{source}")
}

impl Swapper for DiskSwapper {
    fn swap_out(
        &self,
        location: &str,
        entries: &[MailboxSnapshotEntry],
        files_root: Option<&Path>,
    ) -> Result<u64, PraasError> {
        let root = local_path(location)?;
        let state_dir = root.join("state");
        let messages_dir = root.join("messages");
        fs::create_dir_all(&state_dir).map_err(PraasError::Io)?;
        fs::create_dir_all(&messages_dir).map_err(PraasError::Io)?;

        let mut bytes_written: u64 = 0;
        for entry in entries {
            match entry {
                MailboxSnapshotEntry::State { name, payload, .. } => {
                    fs::write(state_dir.join(name), payload.as_slice()).map_err(PraasError::Io)?;
                    bytes_written += payload.len() as u64;
                }
                MailboxSnapshotEntry::Message { name, source, payload } => {
                    let filename = message_filename(name, source);
                    fs::write(messages_dir.join(filename), payload.as_slice()).map_err(PraasError::Io)?;
                    bytes_written += payload.len() as u64;
                }
            }
        }

        if let Some(src) = files_root {
            if src.is_dir() {
                let dest = root.join("files");
                fs::create_dir_all(&dest).map_err(PraasError::Io)?;
                bytes_written += copy_dir_recursive(src, &dest)?;
            }
        }

        Ok(bytes_written)
    }

    fn swap_in(&self, location: &str) -> Result<(Vec<MailboxSnapshotEntry>, Option<PathBuf>), PraasError> {
        let root = local_path(location)?;
        let mut entries = Vec::new();

        let state_dir = root.join("state");
        if state_dir.is_dir() {
            for entry in fs::read_dir(&state_dir).map_err(PraasError::Io)? {
                let entry = entry.map_err(PraasError::Io)?;
                let name = entry.file_name().to_string_lossy().into_owned();
                let payload = fs::read(entry.path()).map_err(PraasError::Io)?;
                entries.push(MailboxSnapshotEntry::State {
                    name,
                    payload: payload.into(),
                    last_modified: 0,
                });
            }
        }

        let messages_dir = root.join("messages");
        if messages_dir.is_dir() {
            for entry in fs::read_dir(&messages_dir).map_err(PraasError::Io)? {
                let entry = entry.map_err(PraasError::Io)?;
                let filename = entry.file_name().to_string_lossy().into_owned();
                let (name, source) = filename
                    .split_once("__")
                    .map(|(n, s)| (n.to_string(), s.to_string()))
                    .ok_or_else(|| {
                        PraasError::InvalidConfiguration(format!(
                            "swapped message filename is not in <name>__<source> form: {filename}"
                        ))
                    })?;
                let payload = fs::read(entry.path()).map_err(PraasError::Io)?;
                entries.push(MailboxSnapshotEntry::Message {
                    name,
                    source,
                    payload: payload.into(),
                });
            }
        }

        let files_dir = root.join("files");
        let files_dir = if files_dir.is_dir() { Some(files_dir) } else { None };

        Ok((entries, files_dir))
    }
}

fn copy_dir_recursive(src: &Path, dest: &Path) -> Result<u64, PraasError> {
    let mut bytes = 0u64;
    for entry in fs::read_dir(src).map_err(PraasError::Io)? {
        let entry = entry.map_err(PraasError::Io)?;
        let file_type = entry.file_type().map_err(PraasError::Io)?;
        let dest_path = dest.join(entry.file_name());
        if file_type.is_dir() {
            fs::create_dir_all(&dest_path).map_err(PraasError::Io)?;
            bytes += copy_dir_recursive(&entry.path(), &dest_path)?;
        } else {
            bytes += fs::copy(entry.path(), &dest_path).map_err(PraasError::Io)?;
        }
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Buffer;

    #[test]
    fn swap_out_then_swap_in_round_trips_state_and_messages() {
        let dir = tempfile::tempdir().unwrap();
        let location = dir.path().join("proc-0");
        let location = format!("local://{}", location.to_str().unwrap());
        let location = location.as_str();

        let entries = vec![
            MailboxSnapshotEntry::State {
                name: "counter".into(),
                payload: Buffer::from(vec![1, 2, 3]),
                last_modified: 42,
            },
            MailboxSnapshotEntry::Message {
                name: "greeting".into(),
                source: "proc-a".into(),
                payload: Buffer::from(b"hi".to_vec()),
            },
        ];

        let swapper = DiskSwapper::new();
        let written = swapper.swap_out(location, &entries, None).unwrap();
        assert_eq!(written, 5);

        let (restored, files_dir) = swapper.swap_in(location).unwrap();
        assert_eq!(restored.len(), 2);
        assert!(files_dir.is_none());

        let has_state = restored.iter().any(|e| matches!(
            e,
            MailboxSnapshotEntry::State { name, payload, .. } if name == "counter" && payload.as_slice() == [1, 2, 3]
        ));
        assert!(has_state);
    }

    #[test]
    fn swap_out_copies_worker_files_tree() {
        let swap_dir = tempfile::tempdir().unwrap();
        let files_dir = tempfile::tempdir().unwrap();
        fs::write(files_dir.path().join("a.txt"), b"contents").unwrap();

        let location = swap_dir.path().join("proc-1");
        let location_str = format!("local://{}", location.to_str().unwrap());

        let swapper = DiskSwapper::new();
        let written = swapper.swap_out(&location_str, &[], Some(files_dir.path())).unwrap();
        assert_eq!(written, 8);
        assert!(location.join("files").join("a.txt").exists());
    }

    #[test]
    fn swap_out_rejects_a_location_with_no_local_scheme() {
        let swapper = DiskSwapper::new();
        let err = swapper.swap_out("/swaps/myapp/proc-0", &[], None).unwrap_err();
        assert!(matches!(err, PraasError::InvalidConfiguration(_)));
    }
}

//! Single instance lock using Unix socket.
//!
//! Prevents two monitors from appending to the same storage directory. Uses
//! a Unix socket which is automatically cleaned up by the OS when the
//! process dies, avoiding stale lock files.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error types for instance lock operations.
#[derive(Debug, Error)]
pub enum InstanceLockError {
    /// Another monitor already writes to this storage directory.
    #[error("another instance is already writing to {0:?}")]
    AlreadyRunning(PathBuf),

    /// I/O error during lock acquisition.
    #[error("failed to acquire instance lock: {0}")]
    Io(#[from] io::Error),
}

/// Per-storage-directory lock.
///
/// The lock is held as long as this struct exists. When dropped, the socket
/// file is removed.
#[derive(Debug)]
pub struct InstanceLock {
    _listener: UnixListener,
    path: PathBuf,
}

impl InstanceLock {
    /// Lock `storage_dir`, placing the socket in `$XDG_RUNTIME_DIR` (or `/tmp`).
    pub fn acquire(storage_dir: &Path) -> Result<Self, InstanceLockError> {
        Self::acquire_in(&runtime_dir(), storage_dir)
    }

    /// Lock `storage_dir`, placing the socket in `runtime_dir`.
    pub fn acquire_in(runtime_dir: &Path, storage_dir: &Path) -> Result<Self, InstanceLockError> {
        let path = socket_path(runtime_dir, storage_dir);

        // A socket nobody answers on was left by a killed process.
        if path.exists() {
            match UnixStream::connect(&path) {
                Ok(_) => return Err(InstanceLockError::AlreadyRunning(storage_dir.to_path_buf())),
                Err(_) => {
                    let _ = std::fs::remove_file(&path);
                }
            }
        }

        match UnixListener::bind(&path) {
            Ok(listener) => Ok(Self {
                _listener: listener,
                path,
            }),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                Err(InstanceLockError::AlreadyRunning(storage_dir.to_path_buf()))
            }
            Err(e) => Err(InstanceLockError::Io(e)),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn runtime_dir() -> PathBuf {
    std::env::var("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

/// Socket path for `storage_dir`. Equivalent spellings of the same
/// directory map to the same socket once it exists.
fn socket_path(runtime_dir: &Path, storage_dir: &Path) -> PathBuf {
    let key = storage_dir
        .canonicalize()
        .unwrap_or_else(|_| storage_dir.to_path_buf());
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    runtime_dir.join(format!("sensor-monitor-{:016x}.sock", hasher.finish()))
}

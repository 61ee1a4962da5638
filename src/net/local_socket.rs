//! Local socket creation with a scoped file-creation mask.
//!
//! The process umask is global, so every socket creation goes through one
//! factory that holds a lock for the save → set → bind → restore sequence.
//! The previous mask is restored by a drop guard, so early returns and
//! bind errors restore it too.

use nix::sys::stat::{umask, Mode};
use std::os::unix::fs::FileTypeExt;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tokio::net::UnixListener;

use super::listener::ListenerError;

/// Mask applied while the socket file is created: no access for others.
pub const SOCKET_UMASK: Mode = Mode::S_IRWXO;

/// Serialized creator of local listening sockets.
#[derive(Debug, Clone, Default)]
pub struct LocalSocketFactory {
    lock: Arc<Mutex<()>>,
}

struct UmaskGuard {
    previous: Mode,
}

impl UmaskGuard {
    fn set(mask: Mode) -> Self {
        Self {
            previous: umask(mask),
        }
    }
}

impl Drop for UmaskGuard {
    fn drop(&mut self) {
        umask(self.previous);
    }
}

impl LocalSocketFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory shared by everything in this process.
    pub fn shared() -> &'static LocalSocketFactory {
        static SHARED: OnceLock<LocalSocketFactory> = OnceLock::new();
        SHARED.get_or_init(LocalSocketFactory::new)
    }

    /// Bind a listening socket at `path`, replacing a stale socket file.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(&self, path: &Path) -> Result<UnixListener, ListenerError> {
        let socket_err = |source| ListenerError::LocalSocket {
            path: path.to_path_buf(),
            source,
        };

        let _lock = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        match std::fs::symlink_metadata(path) {
            Ok(meta) if meta.file_type().is_socket() => {
                std::fs::remove_file(path).map_err(socket_err)?;
                tracing::debug!(path = %path.display(), "Removed stale socket file");
            }
            Ok(_) => {
                return Err(socket_err(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "path exists and is not a socket",
                )))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(socket_err(e)),
        }

        let _mask = UmaskGuard::set(SOCKET_UMASK);
        let listener = UnixListener::bind(path).map_err(socket_err)?;

        tracing::info!(path = %path.display(), "Local socket bound");
        Ok(listener)
    }

    /// Read the process umask without disturbing concurrent creations.
    pub fn current_umask(&self) -> Mode {
        let _lock = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let guard = UmaskGuard::set(Mode::S_IWGRP | Mode::S_IWOTH);
        guard.previous
    }
}

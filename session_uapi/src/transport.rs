//! Control socket transport.
//!
//! This module defines the error type shared by the listener and the
//! client, the socket naming convention, and the Unix socket listener that
//! plugs into the session controller as its configuration channel.

use async_trait::async_trait;
use nix::errno::Errno;
use nix::fcntl::{FlockArg, flock};
use session_core::ControllerConfig;
use session_core::session::{
    BackendError, BackendResult, ConfigListener, ConfigStream, ListenerFactory,
};
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Suffix of every control socket file.
pub const SOCKET_SUFFIX: &str = "sock";

/// Result type for control socket operations
pub type UapiResult<T> = Result<T, UapiError>;

/// Error type for control socket operations
#[derive(Error, Debug)]
pub enum UapiError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Interface name cannot be turned into a socket path
    #[error("Invalid interface name: {0:?}")]
    InvalidName(String),

    /// Another process is already serving this interface
    #[error("Control socket already in use: {0}")]
    InUse(PathBuf),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Malformed exchange
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The engine answered with a non-zero errno
    #[error("Engine returned errno={0}")]
    Remote(i64),

    /// Timeout error
    #[error("Timeout error: {0}")]
    Timeout(String),
}

impl From<UapiError> for BackendError {
    fn from(err: UapiError) -> Self {
        match err {
            UapiError::Io(e) => BackendError::Io(e),
            other => BackendError::Listener(other.to_string()),
        }
    }
}

/// Path of the control socket for `interface_name` under `socket_dir`.
pub fn socket_path(socket_dir: &Path, interface_name: &str) -> UapiResult<PathBuf> {
    let valid = !interface_name.is_empty()
        && interface_name != "."
        && interface_name != ".."
        && !interface_name.contains(['/', '\0']);
    if !valid {
        return Err(UapiError::InvalidName(interface_name.to_string()));
    }
    Ok(socket_dir.join(format!("{interface_name}.{SOCKET_SUFFIX}")))
}

/// Suffix of the lock file held next to each bound socket.
pub const LOCK_SUFFIX: &str = "lock";

/// Unix domain socket listener for one interface.
///
/// While bound it holds an exclusive `flock` on `<interface>.lock` beside
/// the socket; that lock, not the socket, decides whether the interface is
/// taken. [`close`](ConfigListener::close) cancels any pending accept and
/// removes both files.
pub struct UapiListener {
    listener: UnixListener,
    socket_path: PathBuf,
    lock_path: PathBuf,
    _lock: File,
    shutdown: CancellationToken,
}

impl UapiListener {
    /// Bind a listener at `path`.
    ///
    /// Fails with [`UapiError::InUse`] while another listener, in this
    /// process or any other, holds the lock for `path`. A socket file left
    /// behind without a lock holder is replaced.
    pub fn bind<P: AsRef<Path>>(path: P) -> UapiResult<Self> {
        let path = path.as_ref();
        let lock_path = path.with_extension(LOCK_SUFFIX);
        let lock = acquire_lock(path, &lock_path)?;

        if path.exists() {
            debug!(path = %path.display(), "Removing stale control socket");
            std::fs::remove_file(path).map_err(|e| {
                UapiError::Connection(format!("Failed to remove existing socket: {}", e))
            })?;
        }

        let listener = UnixListener::bind(path)
            .map_err(|e| UapiError::Connection(format!("Failed to bind to socket: {}", e)))?;

        // Owner only: the protocol can rewrite keys and peers
        let mut permissions = std::fs::metadata(path)?.permissions();
        permissions.set_mode(0o600);
        std::fs::set_permissions(path, permissions)?;

        Ok(Self {
            listener,
            socket_path: path.to_path_buf(),
            lock_path,
            _lock: lock,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Unlink the socket, then the lock file. The lock itself is released
    /// when the listener is dropped.
    fn remove_files(&self) {
        for path in [&self.socket_path, &self.lock_path] {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "Failed to remove control socket file");
                }
            }
        }
    }
}

/// Open `lock_path` and take an exclusive non-blocking `flock` on it.
fn acquire_lock(socket_path: &Path, lock_path: &Path) -> UapiResult<File> {
    let lock = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .mode(0o600)
        .open(lock_path)?;

    match flock(lock.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
        Ok(()) => Ok(lock),
        Err(Errno::EWOULDBLOCK) => Err(UapiError::InUse(socket_path.to_path_buf())),
        Err(e) => Err(UapiError::Io(e.into())),
    }
}

#[async_trait]
impl ConfigListener for UapiListener {
    async fn accept(&self) -> BackendResult<ConfigStream> {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(BackendError::Closed),
            accepted = self.listener.accept() => {
                let (stream, _) = accepted?;
                Ok(Box::new(stream))
            }
        }
    }

    async fn close(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        self.remove_files();
    }
}

impl Drop for UapiListener {
    fn drop(&mut self) {
        if !self.shutdown.is_cancelled() {
            self.remove_files();
        }
    }
}

/// Opens `<socket_dir>/<interface>.sock` listeners.
#[derive(Debug, Clone)]
pub struct UapiListenerFactory {
    socket_dir: PathBuf,
}

impl UapiListenerFactory {
    pub fn new<P: Into<PathBuf>>(socket_dir: P) -> Self {
        Self {
            socket_dir: socket_dir.into(),
        }
    }

    pub fn from_config(config: &ControllerConfig) -> Self {
        Self::new(config.uapi.socket_dir.clone())
    }

    fn ensure_socket_dir(&self) -> UapiResult<()> {
        if !self.socket_dir.exists() {
            std::fs::create_dir_all(&self.socket_dir)?;
            let mut permissions = std::fs::metadata(&self.socket_dir)?.permissions();
            permissions.set_mode(0o755);
            std::fs::set_permissions(&self.socket_dir, permissions)?;
        }
        Ok(())
    }
}

#[async_trait]
impl ListenerFactory for UapiListenerFactory {
    async fn listen(&self, interface_name: &str) -> BackendResult<Arc<dyn ConfigListener>> {
        let path = socket_path(&self.socket_dir, interface_name)?;
        self.ensure_socket_dir()?;

        let listener = UapiListener::bind(&path)?;
        debug!(interface = %interface_name, path = %path.display(), "Control socket listening");
        Ok(Arc::new(listener))
    }
}

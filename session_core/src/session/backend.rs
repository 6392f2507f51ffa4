//! Collaborator interfaces.
//!
//! The controller never touches a device, an engine or a socket directly.
//! It drives them through these traits, which the embedding program
//! implements (or, for the control socket, takes from `session_uapi`).

use async_trait::async_trait;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

use crate::logging::Logger;
use crate::session::types::{AddressFamily, AttachmentDescriptor, LinkId};

/// Result type for collaborator operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Error type reported by collaborators.
#[derive(Debug, Error)]
pub enum BackendError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Device driver error
    #[error("Device error: {0}")]
    Device(String),

    /// Protocol engine error
    #[error("Engine error: {0}")]
    Engine(String),

    /// Control socket error
    #[error("Listener error: {0}")]
    Listener(String),

    /// Interface watcher error
    #[error("Watcher error: {0}")]
    Watcher(String),

    /// The resource has been closed; no further operations will succeed
    #[error("Closed")]
    Closed,

    /// Other error
    #[error("Other error: {0}")]
    Other(String),
}

impl BackendError {
    pub fn is_closed(&self) -> bool {
        matches!(self, BackendError::Closed)
    }
}

/// Virtual network device driver.
#[async_trait]
pub trait DeviceDriver: Send + Sync {
    /// Create an interface, asking for `name` and tagging it with `identity`.
    /// The driver may assign a different name.
    async fn create(
        &self,
        name: &str,
        identity: Uuid,
        mtu: u32,
    ) -> BackendResult<Arc<dyn TunDevice>>;
}

/// A created virtual network device.
#[async_trait]
pub trait TunDevice: Send + Sync {
    /// Name the driver actually assigned.
    fn name(&self) -> BackendResult<String>;

    /// OS identifier used to watch for attachment.
    fn link_id(&self) -> LinkId;

    /// Destroy the device. Must tolerate being called more than once.
    async fn close(&self);
}

/// Builds protocol engine instances bound to a device.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    /// Engine version reported to the host.
    fn version(&self) -> String;

    /// Construct an engine that owns `device` from now on.
    async fn create(
        &self,
        device: Arc<dyn TunDevice>,
        logger: Logger,
    ) -> BackendResult<Arc<dyn ProtocolEngine>>;
}

/// Byte stream carrying one control socket conversation.
pub trait ConfigConnection: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> ConfigConnection for T {}

/// Owned control socket connection handed to the engine.
pub type ConfigStream = Box<dyn ConfigConnection>;

/// The tunnel protocol engine.
///
/// Implementations synchronize internally: configuration requests and
/// socket rebinds may arrive concurrently.
#[async_trait]
pub trait ProtocolEngine: Send + Sync {
    /// Apply configuration text in the get/set protocol.
    async fn apply_config(&self, settings: &str) -> BackendResult<()>;

    /// Start packet processing.
    async fn up(&self);

    /// Serve one control socket connection to completion.
    async fn handle_connection(&self, connection: ConfigStream);

    /// Bind the outbound socket of `family` to a physical interface;
    /// `blackhole` drops that family's traffic instead.
    fn bind_socket_to_interface(
        &self,
        family: AddressFamily,
        interface_index: u32,
        blackhole: bool,
    ) -> BackendResult<()>;

    /// Stop the engine and release its device.
    async fn close(&self);
}

/// Opens the control socket for an interface.
#[async_trait]
pub trait ListenerFactory: Send + Sync {
    async fn listen(&self, interface_name: &str) -> BackendResult<Arc<dyn ConfigListener>>;
}

/// Control socket listener.
#[async_trait]
pub trait ConfigListener: Send + Sync {
    /// Wait for the next connection. Returns [`BackendError::Closed`] once
    /// [`close`](ConfigListener::close) has been called, including for a
    /// call that was already waiting.
    async fn accept(&self) -> BackendResult<ConfigStream>;

    /// Stop listening.
    async fn close(&self);
}

/// Starts interface attachment watchers.
#[async_trait]
pub trait WatcherFactory: Send + Sync {
    async fn start(&self) -> BackendResult<Box<dyn AttachmentWatcher>>;
}

/// Observes OS interface attachment events from the moment it was started.
#[async_trait]
pub trait AttachmentWatcher: Send + Sync {
    /// Wait until every descriptor has attached. `false` on timeout.
    async fn join(&self, descriptors: &[AttachmentDescriptor], timeout: Duration) -> bool;

    /// Stop observing.
    fn stop(&self);
}

/// The set of collaborators a controller drives.
#[derive(Clone)]
pub struct Backend {
    pub driver: Arc<dyn DeviceDriver>,
    pub engines: Arc<dyn EngineFactory>,
    pub listeners: Arc<dyn ListenerFactory>,
    pub watchers: Arc<dyn WatcherFactory>,
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("engine_version", &self.engines.version())
            .finish_non_exhaustive()
    }
}

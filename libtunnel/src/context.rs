//! Process-wide state behind the C functions.

use session_core::session::{DeviceDriver, EngineFactory, WatcherFactory};
use session_core::{Backend, ControllerConfig, SessionController, SessionError};
use session_uapi::UapiListenerFactory;
use std::io;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use thiserror::Error;
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, warn};

/// Errors from installing a backend or starting the context.
#[derive(Debug, Error)]
pub enum InitError {
    /// Tunnels already run on the installed backend
    #[error("Tunnel backend already in use")]
    AlreadyRunning,

    /// Nothing was installed before the first bring-up
    #[error("No tunnel backend installed")]
    NoBackend,

    /// The async runtime could not be built
    #[error("Failed to start tunnel runtime: {0}")]
    Runtime(#[from] io::Error),
}

impl InitError {
    /// Code returned to the host; every variant means no tunnel can be
    /// brought up.
    pub fn code(&self) -> i32 {
        SessionError::NoBackend.code()
    }
}

pub(crate) struct Context {
    pub(crate) runtime: Runtime,
    pub(crate) controller: SessionController,
}

static CONFIG: OnceLock<ControllerConfig> = OnceLock::new();
static PENDING: Mutex<Option<Backend>> = Mutex::new(None);
static CONTEXT: OnceLock<Context> = OnceLock::new();

/// Configuration for this process, resolved on first use.
///
/// An unreadable or invalid file is reported and replaced by defaults, so
/// the host still gets working tunnels.
pub fn config() -> &'static ControllerConfig {
    CONFIG.get_or_init(|| {
        ControllerConfig::from_env().unwrap_or_else(|e| {
            warn!(error = %e, "Ignoring tunnel configuration");
            ControllerConfig::default()
        })
    })
}

/// Install the collaborators used by every later bring-up.
///
/// May be called again to replace the backend until the first tunnel has
/// been brought up.
pub fn install_backend(backend: Backend) -> Result<(), InitError> {
    let mut pending = PENDING.lock().unwrap_or_else(PoisonError::into_inner);
    if CONTEXT.get().is_some() {
        return Err(InitError::AlreadyRunning);
    }
    debug!(backend = ?backend, "Tunnel backend installed");
    *pending = Some(backend);
    Ok(())
}

/// Install the platform collaborators and serve each session's
/// configuration on a Unix control socket under the configured directory.
pub fn install_collaborators(
    driver: Arc<dyn DeviceDriver>,
    engines: Arc<dyn EngineFactory>,
    watchers: Arc<dyn WatcherFactory>,
) -> Result<(), InitError> {
    install_backend(Backend {
        driver,
        engines,
        listeners: Arc::new(UapiListenerFactory::from_config(config())),
        watchers,
    })
}

/// The running context, created from the installed backend on first use.
pub(crate) fn context() -> Result<&'static Context, InitError> {
    if let Some(context) = CONTEXT.get() {
        return Ok(context);
    }

    let mut pending = PENDING.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(context) = CONTEXT.get() {
        return Ok(context);
    }
    let backend = pending.clone().ok_or(InitError::NoBackend)?;

    let runtime = Builder::new_multi_thread()
        .enable_all()
        .thread_name("tunnel-worker")
        .build()?;
    let controller = SessionController::from_config(backend, config());
    *pending = None;

    Ok(CONTEXT.get_or_init(|| Context {
        runtime,
        controller,
    }))
}

/// The context if a tunnel has ever been brought up.
pub(crate) fn running() -> Option<&'static Context> {
    CONTEXT.get()
}

/// Version of the installed protocol engine, or of this library when no
/// backend has been installed yet.
pub fn engine_version() -> String {
    if let Some(context) = CONTEXT.get() {
        return context.controller.engine_version();
    }
    PENDING
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .as_ref()
        .map(|backend| backend.engines.version())
        .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string())
}

//! Shared session lifecycle core for tunnel interfaces.
//!
//! This crate owns the pieces that sit between a host application and the
//! tunnel collaborators (device driver, protocol engine, configuration
//! channel, interface watcher): per-session logging, configuration, the
//! handle table, ordered bring-up with unwind, teardown and socket rebind.

pub mod config;
pub mod logging;
pub mod session;

// Re-export commonly used types for convenience
pub use config::{ConfigError, ControllerConfig};
pub use logging::{LogDestination, Logger, Severity};
pub use session::{
    AddressFamily, Backend, BackendError, BackendResult, SessionController, SessionError,
    SessionHandle, SessionRequest, SessionResult,
};

//! Error types for session bring-up.

use std::time::Duration;
use thiserror::Error;

use crate::session::backend::BackendError;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Reasons a bring-up can fail.
///
/// Every variant is local to one bring-up attempt: by the time it is
/// returned, everything the attempt opened has been closed and its handle
/// reservation released.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A required input was missing or malformed
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Every handle value is in use
    #[error("Handle table is full")]
    HandleSpaceExhausted,

    /// The interface watcher could not be started
    #[error("Failed to watch interfaces: {0}")]
    WatcherFailed(#[source] BackendError),

    /// The device driver refused to create the interface
    #[error("Failed to create tunnel: {0}")]
    DeviceCreationFailed(#[source] BackendError),

    /// The driver picked a different name, meaning one was already taken
    #[error("Failed to create adapter with specific name {requested:?} (driver assigned {assigned:?})")]
    NameCollision { requested: String, assigned: String },

    /// The protocol engine could not be constructed
    #[error("Failed to create protocol engine: {0}")]
    EngineCreationFailed(#[source] BackendError),

    /// The control socket could not be opened
    #[error("Failed to start UAPI: {0}")]
    ConfigChannelError(#[source] BackendError),

    /// The engine rejected the configuration text
    #[error("Failed to set device configuration: {0}")]
    ConfigApplyError(#[source] BackendError),

    /// The interface did not attach for both address families in time
    #[error("Failed to wait for IP interfaces to become available within {0:?}")]
    AttachmentTimeout(Duration),

    /// No collaborators have been installed
    #[error("No tunnel backend installed")]
    NoBackend,
}

impl SessionError {
    /// Stable negative code reported across the host boundary.
    pub fn code(&self) -> i32 {
        match self {
            SessionError::InvalidArgument(_) => -1,
            SessionError::HandleSpaceExhausted => -2,
            SessionError::WatcherFailed(_) => -3,
            SessionError::DeviceCreationFailed(_) => -4,
            SessionError::NameCollision { .. } => -5,
            SessionError::EngineCreationFailed(_) => -6,
            SessionError::ConfigChannelError(_) => -7,
            SessionError::ConfigApplyError(_) => -8,
            SessionError::AttachmentTimeout(_) => -9,
            SessionError::NoBackend => -10,
        }
    }
}

//! Control socket plumbing for tunnel sessions.
//!
//! Every session exposes a Unix domain socket named after its interface
//! (`<socket_dir>/<interface>.sock`). The protocol engine speaks a
//! line-oriented get/set protocol on it; this crate only provides the
//! listener the session controller needs and a small client for tools.

pub mod client;
pub mod transport;

/// Re-export common types for convenience
pub use client::UapiClient;
pub use transport::{UapiError, UapiListener, UapiListenerFactory, UapiResult, socket_path};

//! C ABI for tunnel sessions.
//!
//! A host application links this library and drives tunnels through the
//! `tunnel_*` functions in [`ffi`]. The collaborators doing the actual work
//! (device driver, protocol engine, interface watcher) are supplied by the
//! embedding Rust program before the host calls in, either as a complete
//! [`Backend`] or as the three platform pieces, in which case sessions are
//! reconfigured through Unix control sockets.
//!
//! The first successful call creates a process-wide context holding a
//! multi-threaded tokio runtime and the session controller. Configuration
//! is read once from the file named by `TUNNEL_CONFIG`, or from defaults
//! plus `TUNNEL_*` environment overrides.

mod context;
pub mod ffi;

pub use context::{InitError, config, engine_version, install_backend, install_collaborators};
pub use session_core::Backend;

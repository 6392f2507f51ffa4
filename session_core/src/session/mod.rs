//! Tunnel session lifecycle.
//!
//! A session is one tunnel interface: a device, the protocol engine driving
//! it, and the control socket listener through which the engine is
//! reconfigured at runtime. The [`SessionController`] brings sessions up in
//! a fixed order, unwinding on failure, keeps them in a [`HandleTable`] and
//! tears them down again.

mod backend;
mod context;
mod controller;
mod error;
mod rebind;
mod service;
mod table;
pub mod types;

pub use backend::{
    AttachmentWatcher, Backend, BackendError, BackendResult, ConfigConnection, ConfigListener,
    ConfigStream, DeviceDriver, EngineFactory, ListenerFactory, ProtocolEngine, TunDevice,
    WatcherFactory,
};
pub use context::Session;
pub use controller::{SessionController, SessionPolicy};
pub use error::{SessionError, SessionResult};
pub use table::HandleTable;
pub use types::{AddressFamily, AttachmentDescriptor, LinkId, SessionHandle, SessionRequest};

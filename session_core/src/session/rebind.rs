//! Socket rebind broadcast.

use tracing::{error, info};

use crate::session::controller::SessionController;
use crate::session::types::AddressFamily;

impl SessionController {
    /// Ask every registered session's engine to bind its `family` socket to
    /// the physical interface `interface_index`; `0` blackholes the family.
    ///
    /// A failing session is logged and skipped; the rest are still rebound.
    pub fn rebind(&self, family: AddressFamily, interface_index: u32) {
        let blackhole = interface_index == 0;

        self.sessions.for_each(|handle, session| {
            session.logger().in_scope(|| {
                info!(
                    handle = %handle,
                    "Binding {family} socket to interface {interface_index} (blackhole={blackhole})"
                );
                let result = session
                    .engine()
                    .bind_socket_to_interface(family, interface_index, blackhole);
                if let Err(e) = result {
                    error!(handle = %handle, error = %e, "Failed to bind {family} socket");
                }
            });
        });
    }
}

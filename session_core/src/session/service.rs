//! Control socket service loop.
//!
//! One loop runs per registered session. It accepts connections and hands
//! each one to the engine in its own task. The loop has no stop signal of
//! its own: closing the listener makes `accept` return
//! [`BackendError::Closed`](crate::session::BackendError::Closed), which ends
//! it. Connections still being handled at that point are aborted, so none
//! outlives the session's engine.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::instrument::WithSubscriber;
use tracing::{debug, info};

use crate::session::backend::{ConfigListener, ProtocolEngine};

/// Pause after a failed accept so a persistently broken listener cannot
/// spin the loop.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(20);

pub(crate) async fn serve_config_channel(
    interface: String,
    listener: Arc<dyn ConfigListener>,
    engine: Arc<dyn ProtocolEngine>,
) {
    debug!(interface = %interface, "Control socket service loop started");
    let mut connections = JoinSet::new();

    loop {
        match listener.accept().await {
            Ok(connection) => {
                // Reap finished connections
                while connections.try_join_next().is_some() {}

                let engine = engine.clone();
                connections.spawn(
                    async move { engine.handle_connection(connection).await }
                        .with_current_subscriber(),
                );
            }
            Err(e) if e.is_closed() => break,
            Err(e) => {
                info!(interface = %interface, error = %e, "UAPI Accept() failed");
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
            }
        }
    }

    if !connections.is_empty() {
        debug!(interface = %interface, pending = connections.len(), "Aborting unfinished connections");
    }
    connections.shutdown().await;
    debug!(interface = %interface, "Control socket service loop stopped");
}

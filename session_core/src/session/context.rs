//! A registered session and its shutdown sequence.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::logging::Logger;
use crate::session::backend::{ConfigListener, ProtocolEngine};
use crate::session::service::serve_config_channel;

/// How long teardown waits for the service loop to notice its listener
/// closed before aborting it.
const SERVICE_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// One fully constructed tunnel session.
pub struct Session {
    interface_name: String,
    engine: Arc<dyn ProtocolEngine>,
    listener: Arc<dyn ConfigListener>,
    logger: Logger,
    service: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    pub(crate) fn new(
        interface_name: String,
        engine: Arc<dyn ProtocolEngine>,
        listener: Arc<dyn ConfigListener>,
        logger: Logger,
    ) -> Self {
        Session {
            interface_name,
            engine,
            listener,
            logger,
            service: Mutex::new(None),
        }
    }

    pub fn interface_name(&self) -> &str {
        &self.interface_name
    }

    pub fn engine(&self) -> &Arc<dyn ProtocolEngine> {
        &self.engine
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Whether the control socket service loop is still running.
    pub fn is_serving(&self) -> bool {
        self.service
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Spawn the control socket service loop. Called once, after the
    /// session has been registered.
    pub(crate) fn start_service(&self) {
        let task = tokio::spawn(self.logger.attach(serve_config_channel(
            self.interface_name.clone(),
            self.listener.clone(),
            self.engine.clone(),
        )));
        *self.service.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
    }

    /// Close the listener, let the service loop exit, then close the engine
    /// (which releases the device).
    pub(crate) async fn shutdown(&self) {
        debug!(interface = %self.interface_name, "Closing control socket");
        self.listener.close().await;

        let task = self
            .service
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut task) = task {
            if tokio::time::timeout(SERVICE_STOP_TIMEOUT, &mut task)
                .await
                .is_err()
            {
                warn!(interface = %self.interface_name, "Service loop did not stop after listener close, aborting");
                task.abort();
            }
        }

        debug!(interface = %self.interface_name, "Closing engine");
        self.engine.close().await;
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("interface_name", &self.interface_name)
            .field("serving", &self.is_serving())
            .finish_non_exhaustive()
    }
}

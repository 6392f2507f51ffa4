//! Session bring-up and teardown.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::{ControllerConfig, DEFAULT_INTERFACE_IDENTITY};
use crate::logging::Logger;
use crate::session::backend::{AttachmentWatcher, Backend};
use crate::session::context::Session;
use crate::session::error::{SessionError, SessionResult};
use crate::session::table::HandleTable;
use crate::session::types::{AttachmentDescriptor, SessionHandle, SessionRequest};

/// Fixed parameters applied to every bring-up.
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    /// Bound on the wait for both address families to attach
    pub attachment_timeout: Duration,
    /// Identity token stamped on created interfaces
    pub interface_identity: Uuid,
    /// Exclusive upper bound of the handle space
    pub max_handles: i32,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        SessionPolicy {
            attachment_timeout: Duration::from_secs(5),
            interface_identity: DEFAULT_INTERFACE_IDENTITY,
            max_handles: i32::MAX,
        }
    }
}

impl From<&ControllerConfig> for SessionPolicy {
    fn from(config: &ControllerConfig) -> Self {
        SessionPolicy {
            attachment_timeout: config.session.attachment_timeout(),
            interface_identity: config.session.interface_identity,
            max_handles: config.session.max_handles,
        }
    }
}

/// Stops the attachment watcher on every exit path of a bring-up.
struct WatcherGuard(Box<dyn AttachmentWatcher>);

impl Drop for WatcherGuard {
    fn drop(&mut self) {
        self.0.stop();
    }
}

/// Owns the handle table and drives collaborators through bring-up,
/// teardown and socket rebind.
pub struct SessionController {
    pub(crate) sessions: HandleTable<Arc<Session>>,
    backend: Backend,
    policy: SessionPolicy,
}

impl SessionController {
    pub fn new(backend: Backend, policy: SessionPolicy) -> Self {
        SessionController {
            sessions: HandleTable::with_limit(policy.max_handles),
            backend,
            policy,
        }
    }

    pub fn from_config(backend: Backend, config: &ControllerConfig) -> Self {
        Self::new(backend, SessionPolicy::from(config))
    }

    /// Version string of the installed protocol engine.
    pub fn engine_version(&self) -> String {
        self.backend.engines.version()
    }

    /// Bring a session up and register it.
    ///
    /// Nothing is registered unless every stage succeeds; on failure all
    /// collaborators opened by this call have been closed and the error is
    /// logged to `logger`.
    pub async fn bring_up(
        &self,
        request: SessionRequest,
        logger: Logger,
    ) -> SessionResult<SessionHandle> {
        logger.attach(self.bring_up_logged(request, &logger)).await
    }

    async fn bring_up_logged(
        &self,
        request: SessionRequest,
        logger: &Logger,
    ) -> SessionResult<SessionHandle> {
        let result = self.try_bring_up(request, logger).await;
        if let Err(e) = &result {
            error!(error = %e, code = e.code(), "Failed to bring up tunnel");
        }
        result
    }

    async fn try_bring_up(
        &self,
        request: SessionRequest,
        logger: &Logger,
    ) -> SessionResult<SessionHandle> {
        request.validate()?;

        let handle = self.sessions.allocate()?;
        let session = match self.open_session(&request, logger).await {
            Ok(session) => Arc::new(session),
            Err(e) => {
                self.sessions.release(handle);
                return Err(e);
            }
        };

        self.sessions.register(handle, session.clone());
        session.start_service();

        info!(handle = %handle, interface = %request.interface_name, "Tunnel is up");
        Ok(handle)
    }

    /// Stages between handle allocation and registration. Each failure
    /// closes what the earlier stages opened, newest first.
    async fn open_session(
        &self,
        request: &SessionRequest,
        logger: &Logger,
    ) -> SessionResult<Session> {
        let name = request.interface_name.as_str();

        // Watch before the device exists so an early attachment is not missed
        let watcher = WatcherGuard(
            self.backend
                .watchers
                .start()
                .await
                .map_err(SessionError::WatcherFailed)?,
        );

        let device = self
            .backend
            .driver
            .create(name, self.policy.interface_identity, request.mtu)
            .await
            .map_err(SessionError::DeviceCreationFailed)?;

        let assigned = match device.name() {
            Ok(assigned) => assigned,
            Err(e) => {
                device.close().await;
                return Err(SessionError::DeviceCreationFailed(e));
            }
        };
        if assigned != name {
            device.close().await;
            return Err(SessionError::NameCollision {
                requested: name.to_string(),
                assigned,
            });
        }
        let link = device.link_id();
        debug!(interface = %name, link = %link, "Device created");

        let engine = match self
            .backend
            .engines
            .create(device.clone(), logger.clone())
            .await
        {
            Ok(engine) => engine,
            Err(e) => {
                device.close().await;
                return Err(SessionError::EngineCreationFailed(e));
            }
        };

        let listener = match self.backend.listeners.listen(name).await {
            Ok(listener) => listener,
            Err(e) => {
                engine.close().await;
                return Err(SessionError::ConfigChannelError(e));
            }
        };

        if let Err(e) = engine.apply_config(&request.settings).await {
            listener.close().await;
            engine.close().await;
            return Err(SessionError::ConfigApplyError(e));
        }

        engine.up().await;

        debug!(interface = %name, "Waiting for interfaces to attach");
        let descriptors = AttachmentDescriptor::both_families(link);
        let bound = self.policy.attachment_timeout;
        let attached = tokio::time::timeout(bound, watcher.0.join(&descriptors, bound))
            .await
            .unwrap_or(false);
        if !attached {
            listener.close().await;
            engine.close().await;
            return Err(SessionError::AttachmentTimeout(bound));
        }
        debug!(interface = %name, "Interfaces OK");

        Ok(Session::new(
            name.to_string(),
            engine,
            listener,
            logger.clone(),
        ))
    }

    /// Tear a session down. Unknown handles are ignored.
    pub async fn teardown(&self, handle: SessionHandle) {
        let Some(session) = self.sessions.remove(handle) else {
            return;
        };

        let logger = session.logger().clone();
        logger
            .attach(async {
                session.shutdown().await;
                info!(handle = %handle, interface = %session.interface_name(), "Tunnel is down");
            })
            .await;
    }

    /// Tear down every registered session.
    pub async fn teardown_all(&self) {
        for handle in self.sessions.handles() {
            self.teardown(handle).await;
        }
    }

    pub fn lookup(&self, handle: SessionHandle) -> Option<Arc<Session>> {
        self.sessions.lookup(handle)
    }

    pub fn handles(&self) -> Vec<SessionHandle> {
        self.sessions.handles()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

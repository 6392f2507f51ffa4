//! Stub collaborators that count every open and close.

#![allow(dead_code)]

use async_trait::async_trait;
use session_core::session::{
    AttachmentDescriptor, AttachmentWatcher, Backend, BackendError, BackendResult,
    ConfigListener, ConfigStream, DeviceDriver, EngineFactory, LinkId, ListenerFactory,
    ProtocolEngine, TunDevice, WatcherFactory,
};
use session_core::{AddressFamily, LogDestination, Logger, Severity};
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use uuid::Uuid;

#[derive(Default)]
pub struct Counters {
    pub devices_opened: AtomicUsize,
    pub devices_closed: AtomicUsize,
    pub engines_created: AtomicUsize,
    pub engines_closed: AtomicUsize,
    pub listeners_opened: AtomicUsize,
    pub listeners_closed: AtomicUsize,
    pub watchers_started: AtomicUsize,
    pub watchers_stopped: AtomicUsize,
    pub connections_handled: AtomicUsize,
}

impl Counters {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    /// Every collaborator opened so far has been closed again.
    pub fn balanced(&self) -> bool {
        Self::get(&self.devices_opened) == Self::get(&self.devices_closed)
            && Self::get(&self.engines_created) == Self::get(&self.engines_closed)
            && Self::get(&self.listeners_opened) == Self::get(&self.listeners_closed)
            && Self::get(&self.watchers_started) == Self::get(&self.watchers_stopped)
    }
}

/// Knobs that make a stub misbehave.
#[derive(Debug, Clone, Default)]
pub struct Behavior {
    pub fail_watcher: bool,
    pub fail_device: bool,
    /// Name reported by the device instead of the requested one
    pub assigned_name: Option<String>,
    pub fail_engine: bool,
    pub fail_listen: bool,
    pub fail_apply: Option<String>,
    pub never_attach: bool,
    /// Interfaces whose engine fails socket binds
    pub fail_bind_for: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindCall {
    pub interface: String,
    pub family: AddressFamily,
    pub interface_index: u32,
    pub blackhole: bool,
}

type Incoming = mpsc::UnboundedSender<BackendResult<ConfigStream>>;

#[derive(Default)]
pub struct Harness {
    pub counters: Arc<Counters>,
    pub behavior: Arc<Mutex<Behavior>>,
    pub events: Arc<Mutex<Vec<String>>>,
    pub binds: Arc<Mutex<Vec<BindCall>>>,
    pub identities: Arc<Mutex<Vec<Uuid>>>,
    incoming: Arc<Mutex<HashMap<String, Incoming>>>,
    next_link: Arc<AtomicU64>,
}

impl Harness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behavior(behavior: Behavior) -> Self {
        let harness = Self::default();
        *harness.behavior.lock().unwrap() = behavior;
        harness
    }

    pub fn behavior(&self) -> Behavior {
        self.behavior.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn binds(&self) -> Vec<BindCall> {
        self.binds.lock().unwrap().clone()
    }

    /// Queue an accept result on the listener of `interface`.
    pub fn push_incoming(&self, interface: &str, item: BackendResult<ConfigStream>) {
        let incoming = self.incoming.lock().unwrap();
        let sender = incoming.get(interface).expect("listener not opened");
        let _ = sender.send(item);
    }

    pub fn backend(self: &Arc<Self>) -> Backend {
        Backend {
            driver: Arc::new(StubDriver(self.clone())),
            engines: Arc::new(StubEngineFactory(self.clone())),
            listeners: Arc::new(StubListenerFactory(self.clone())),
            watchers: Arc::new(StubWatcherFactory(self.clone())),
        }
    }

    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

pub struct StubDriver(Arc<Harness>);

#[async_trait]
impl DeviceDriver for StubDriver {
    async fn create(
        &self,
        name: &str,
        identity: Uuid,
        _mtu: u32,
    ) -> BackendResult<Arc<dyn TunDevice>> {
        let behavior = self.0.behavior();
        if behavior.fail_device {
            return Err(BackendError::Device("driver refused".to_string()));
        }
        self.0.identities.lock().unwrap().push(identity);
        self.0.counters.devices_opened.fetch_add(1, Ordering::SeqCst);

        Ok(Arc::new(StubDevice {
            harness: self.0.clone(),
            name: behavior.assigned_name.unwrap_or_else(|| name.to_string()),
            link: LinkId(self.0.next_link.fetch_add(1, Ordering::SeqCst) + 1),
            closed: AtomicBool::new(false),
        }))
    }
}

pub struct StubDevice {
    harness: Arc<Harness>,
    name: String,
    link: LinkId,
    closed: AtomicBool,
}

#[async_trait]
impl TunDevice for StubDevice {
    fn name(&self) -> BackendResult<String> {
        Ok(self.name.clone())
    }

    fn link_id(&self) -> LinkId {
        self.link
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.harness
                .counters
                .devices_closed
                .fetch_add(1, Ordering::SeqCst);
            self.harness.record(format!("device.close:{}", self.name));
        }
    }
}

pub struct StubEngineFactory(Arc<Harness>);

#[async_trait]
impl EngineFactory for StubEngineFactory {
    fn version(&self) -> String {
        "0.0.0-stub".to_string()
    }

    async fn create(
        &self,
        device: Arc<dyn TunDevice>,
        _logger: Logger,
    ) -> BackendResult<Arc<dyn ProtocolEngine>> {
        if self.0.behavior().fail_engine {
            return Err(BackendError::Engine("out of memory".to_string()));
        }
        self.0.counters.engines_created.fetch_add(1, Ordering::SeqCst);
        let interface = device.name()?;
        Ok(Arc::new(StubEngine {
            harness: self.0.clone(),
            interface,
            device,
            closed: AtomicBool::new(false),
        }))
    }
}

pub struct StubEngine {
    harness: Arc<Harness>,
    interface: String,
    device: Arc<dyn TunDevice>,
    closed: AtomicBool,
}

#[async_trait]
impl ProtocolEngine for StubEngine {
    async fn apply_config(&self, _settings: &str) -> BackendResult<()> {
        match self.harness.behavior().fail_apply {
            Some(message) => Err(BackendError::Engine(message)),
            None => Ok(()),
        }
    }

    async fn up(&self) {
        self.harness.record(format!("engine.up:{}", self.interface));
    }

    async fn handle_connection(&self, mut connection: ConfigStream) {
        let mut buf = [0u8; 64];
        let _ = connection.read(&mut buf).await;
        let _ = connection.write_all(b"errno=0\n\n").await;
        self.harness
            .counters
            .connections_handled
            .fetch_add(1, Ordering::SeqCst);
    }

    fn bind_socket_to_interface(
        &self,
        family: AddressFamily,
        interface_index: u32,
        blackhole: bool,
    ) -> BackendResult<()> {
        self.harness.binds.lock().unwrap().push(BindCall {
            interface: self.interface.clone(),
            family,
            interface_index,
            blackhole,
        });
        if self.harness.behavior().fail_bind_for.contains(&self.interface) {
            return Err(BackendError::Io(io::Error::other("bind failed")));
        }
        Ok(())
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.harness
                .counters
                .engines_closed
                .fetch_add(1, Ordering::SeqCst);
            self.harness
                .record(format!("engine.close:{}", self.interface));
            self.device.close().await;
        }
    }
}

pub struct StubListenerFactory(Arc<Harness>);

#[async_trait]
impl ListenerFactory for StubListenerFactory {
    async fn listen(&self, interface_name: &str) -> BackendResult<Arc<dyn ConfigListener>> {
        if self.0.behavior().fail_listen {
            return Err(BackendError::Listener("address in use".to_string()));
        }
        self.0.counters.listeners_opened.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = mpsc::unbounded_channel();
        self.0
            .incoming
            .lock()
            .unwrap()
            .insert(interface_name.to_string(), tx);
        let (closed, _) = watch::channel(false);

        Ok(Arc::new(StubListener {
            harness: self.0.clone(),
            interface: interface_name.to_string(),
            incoming: tokio::sync::Mutex::new(rx),
            closed,
        }))
    }
}

pub struct StubListener {
    harness: Arc<Harness>,
    interface: String,
    incoming: tokio::sync::Mutex<mpsc::UnboundedReceiver<BackendResult<ConfigStream>>>,
    closed: watch::Sender<bool>,
}

#[async_trait]
impl ConfigListener for StubListener {
    async fn accept(&self) -> BackendResult<ConfigStream> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            return Err(BackendError::Closed);
        }
        let mut incoming = self.incoming.lock().await;
        tokio::select! {
            _ = closed.wait_for(|closed| *closed) => Err(BackendError::Closed),
            item = incoming.recv() => item.unwrap_or(Err(BackendError::Closed)),
        }
    }

    async fn close(&self) {
        if !self.closed.send_replace(true) {
            self.harness
                .counters
                .listeners_closed
                .fetch_add(1, Ordering::SeqCst);
            self.harness
                .record(format!("listener.close:{}", self.interface));
        }
    }
}

pub struct StubWatcherFactory(Arc<Harness>);

#[async_trait]
impl WatcherFactory for StubWatcherFactory {
    async fn start(&self) -> BackendResult<Box<dyn AttachmentWatcher>> {
        if self.0.behavior().fail_watcher {
            return Err(BackendError::Watcher("notification registration failed".to_string()));
        }
        self.0.counters.watchers_started.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StubWatcher(self.0.clone())))
    }
}

pub struct StubWatcher(Arc<Harness>);

#[async_trait]
impl AttachmentWatcher for StubWatcher {
    async fn join(&self, descriptors: &[AttachmentDescriptor], _timeout: Duration) -> bool {
        assert_eq!(descriptors.len(), 2);
        if self.0.behavior().never_attach {
            std::future::pending::<()>().await;
        }
        true
    }

    fn stop(&self) {
        self.0.counters.watchers_stopped.fetch_add(1, Ordering::SeqCst);
    }
}

/// In-memory log sink.
#[derive(Clone, Default)]
pub struct Capture(Arc<Mutex<Vec<u8>>>);

impl Capture {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    pub fn logger(&self, severity: Severity) -> Logger {
        Logger::build(
            LogDestination::Writer(BoxMakeWriter::new(self.clone())),
            severity,
        )
    }
}

impl io::Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for Capture {
    type Writer = Capture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

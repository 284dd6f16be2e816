//! Async INDI client
//!
//! Wraps the synchronous [`Dispatcher`] in a shared lock and feeds it from a
//! reader task, with outbound commands going through a writer task:
//! - connection timeout, reconnection with exponential backoff and jitter
//! - framer reset when an element stays incomplete for too long
//! - keepalive pings
//! - permission and range checks before writes
//! - a broadcast event stream next to the injected observer

use crate::command;
use crate::device::Device;
use crate::dispatcher::{ClientObserver, DispatchOutcome, Dispatcher, NoopObserver};
use crate::element::ProtocolElement;
use crate::error::{IndiError, IndiResult};
use crate::framer::StreamFramer;
use crate::property::{
    BlobElement, Permission, PropertyKind, PropertyState, SwitchRule, SwitchState, VectorProperty,
};
use crate::protocol::{standard_properties as sp, tags, INDI_PROTOCOL_VERSION};
use crate::watch::{BlobHandling, DeviceCallback};
use crate::{IndiTimeoutConfig, IndiTimeoutError, INDI_DEFAULT_PORT};
use rand::Rng;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::{sleep, sleep_until, timeout, Instant};

const READ_CHUNK_SIZE: usize = 64 * 1024;
const COMMAND_CHANNEL_CAPACITY: usize = 100;

/// INDI client event
///
/// Published on the broadcast channel for every observer notification.
#[derive(Debug, Clone)]
pub enum IndiEvent {
    /// First command seen for a watched device
    DeviceDefined(String),
    /// Device deleted by the server
    DeviceRemoved(String),
    PropertyDefined {
        device: String,
        property: String,
        kind: PropertyKind,
    },
    PropertyUpdated {
        device: String,
        property: String,
        state: PropertyState,
    },
    PropertyDeleted {
        device: String,
        property: String,
    },
    /// A BLOB element received new data (already decoded and inflated)
    BlobReceived {
        device: String,
        property: String,
        element: String,
        format: String,
        size: usize,
        data: Vec<u8>,
    },
    /// Device message, or a server-wide one when `device` is `None`
    Message {
        device: Option<String>,
        message: String,
    },
    PingReply(String),
    ServerConnected,
    /// `0` for a requested disconnect, `-1` when the connection was lost
    ServerDisconnected(i32),
    /// A rejected command or a framing problem; the connection stays up
    Error(String),
}

/// Reconnection configuration with jitter support
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectionConfig {
    /// Base delay for exponential backoff
    pub base_delay_secs: u64,
    /// Maximum delay cap
    pub max_delay_secs: u64,
    pub max_attempts: u32,
    /// Add randomness so many clients do not retry in lockstep
    pub use_jitter: bool,
    /// Jitter factor (0.0 to 1.0, default 0.3 = 30% variation)
    pub jitter_factor: f64,
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: 1,
            max_delay_secs: 30,
            max_attempts: 5,
            use_jitter: true,
            jitter_factor: 0.3,
        }
    }
}

impl ReconnectionConfig {
    /// Delay before attempt `attempt` (1-based): `base * 2^(attempt-1)`, capped
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base = Duration::from_secs(self.base_delay_secs);
        let max = Duration::from_secs(self.max_delay_secs);

        let exponential_delay = 2u32
            .checked_pow(attempt.saturating_sub(1))
            .and_then(|factor| base.checked_mul(factor))
            .unwrap_or(max)
            .min(max);

        if self.use_jitter && self.jitter_factor > 0.0 {
            // Spread over [delay * (1 - f/2), delay * (1 + f/2)]
            let jitter_range = exponential_delay.as_secs_f64() * self.jitter_factor;
            let random_factor = rand::thread_rng().gen::<f64>() * jitter_range - jitter_range / 2.0;
            let jittered_secs = (exponential_delay.as_secs_f64() + random_factor).max(0.1);
            Duration::from_secs_f64(jittered_secs.min(max.as_secs_f64()))
        } else {
            exponential_delay
        }
    }
}

/// Everything an [`IndiClient`] needs to know up front
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Sent in every `getProperties`
    pub protocol_version: String,
    /// Capacity of the broadcast event channel
    pub event_capacity: usize,
    pub timeouts: IndiTimeoutConfig,
    pub reconnection: ReconnectionConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: INDI_DEFAULT_PORT,
            protocol_version: INDI_PROTOCOL_VERSION.to_string(),
            event_capacity: 100,
            timeouts: IndiTimeoutConfig::default(),
            reconnection: ReconnectionConfig::default(),
        }
    }
}

/// Forwards notifications to the injected observer and the event channel
struct EventBridge<'a> {
    observer: &'a dyn ClientObserver,
    events: &'a broadcast::Sender<IndiEvent>,
    /// The command being dispatched, used to tell which BLOBs changed
    command: Option<&'a ProtocolElement>,
}

impl<'a> EventBridge<'a> {
    fn new(observer: &'a dyn ClientObserver, events: &'a broadcast::Sender<IndiEvent>) -> Self {
        Self {
            observer,
            events,
            command: None,
        }
    }

    fn for_command(
        observer: &'a dyn ClientObserver,
        events: &'a broadcast::Sender<IndiEvent>,
        command: &'a ProtocolElement,
    ) -> Self {
        Self {
            command: Some(command),
            ..Self::new(observer, events)
        }
    }

    fn emit(&self, event: IndiEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn emit_blobs(&self, property: &VectorProperty) {
        let Some(command) = self.command else {
            return;
        };
        for child in command.children.iter().filter(|c| c.tag_name == tags::ONE_BLOB) {
            if child.attribute("size").map(str::trim) == Some("0") {
                continue;
            }
            if let Some(blob) = child.name().and_then(|name| property.blob(name)) {
                self.emit(IndiEvent::BlobReceived {
                    device: property.device().to_string(),
                    property: property.name().to_string(),
                    element: blob.name.clone(),
                    format: blob.format.clone(),
                    size: blob.size,
                    data: blob.data.clone(),
                });
            }
        }
    }
}

impl ClientObserver for EventBridge<'_> {
    fn new_device(&self, device: &Device) {
        self.observer.new_device(device);
        self.emit(IndiEvent::DeviceDefined(device.name().to_string()));
    }

    fn remove_device(&self, device: &Device) {
        self.observer.remove_device(device);
        self.emit(IndiEvent::DeviceRemoved(device.name().to_string()));
    }

    fn new_property(&self, property: &VectorProperty) {
        self.observer.new_property(property);
        self.emit(IndiEvent::PropertyDefined {
            device: property.device().to_string(),
            property: property.name().to_string(),
            kind: property.kind(),
        });
    }

    fn update_property(&self, property: &VectorProperty) {
        self.observer.update_property(property);
        self.emit(IndiEvent::PropertyUpdated {
            device: property.device().to_string(),
            property: property.name().to_string(),
            state: property.state(),
        });
        if property.kind() == PropertyKind::Blob {
            self.emit_blobs(property);
        }
    }

    fn remove_property(&self, property: &VectorProperty) {
        self.observer.remove_property(property);
        self.emit(IndiEvent::PropertyDeleted {
            device: property.device().to_string(),
            property: property.name().to_string(),
        });
    }

    fn new_message(&self, device: &Device, message: &str) {
        self.observer.new_message(device, message);
        self.emit(IndiEvent::Message {
            device: Some(device.name().to_string()),
            message: message.to_string(),
        });
    }

    fn universal_message(&self, message: &str) {
        self.observer.universal_message(message);
        self.emit(IndiEvent::Message {
            device: None,
            message: message.to_string(),
        });
    }

    fn server_connected(&self) {
        self.observer.server_connected();
        self.emit(IndiEvent::ServerConnected);
    }

    fn server_disconnected(&self, exit_code: i32) {
        self.observer.server_disconnected(exit_code);
        self.emit(IndiEvent::ServerDisconnected(exit_code));
    }

    fn ping_reply(&self, uid: &str) {
        self.observer.ping_reply(uid);
        self.emit(IndiEvent::PingReply(uid.to_string()));
    }
}

enum ReaderExit {
    Requested,
    RemoteClosed,
}

/// State shared with the reader task
struct ReaderContext {
    state: Arc<RwLock<Dispatcher>>,
    observer: Arc<dyn ClientObserver>,
    event_tx: broadcast::Sender<IndiEvent>,
    /// Replies such as `pingReply` go straight to the writer
    replies: mpsc::Sender<String>,
    connected: Arc<AtomicBool>,
    /// Cleared when the client ends this session; nothing is dispatched after
    session_active: Arc<AtomicBool>,
    last_ping_reply_ms: Arc<AtomicU64>,
    timeouts: IndiTimeoutConfig,
}

impl ReaderContext {
    async fn run<R: AsyncRead + Unpin>(self, reader: R, shutdown_rx: oneshot::Receiver<()>) {
        match self.read_loop(reader, shutdown_rx).await {
            Ok(ReaderExit::Requested) => tracing::info!("INDI reader task stopped on request"),
            Ok(ReaderExit::RemoteClosed) => {
                tracing::info!("INDI server closed the connection");
                self.connection_lost();
            }
            Err(e) => {
                tracing::error!("INDI reader task failed: {}", e);
                let _ = self.event_tx.send(IndiEvent::Error(e.to_string()));
                self.connection_lost();
            }
        }
    }

    fn connection_lost(&self) {
        // A superseded session must not touch the shared connection flag
        if !self.session_active.swap(false, Ordering::SeqCst) {
            return;
        }
        self.connected.store(false, Ordering::SeqCst);
        EventBridge::new(&*self.observer, &self.event_tx).server_disconnected(-1);
    }

    async fn read_loop<R: AsyncRead + Unpin>(
        &self,
        mut reader: R,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) -> IndiResult<ReaderExit> {
        let mut framer = StreamFramer::new();
        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        let mut incomplete_since: Option<Instant> = None;

        loop {
            let deadline =
                incomplete_since.map(|since| since + incomplete_limit(&self.timeouts, &framer));

            let read = tokio::select! {
                biased;
                _ = &mut shutdown_rx => {
                    if framer.is_mid_element() {
                        tracing::debug!(
                            "Dropping {} buffered bytes of an incomplete INDI element",
                            framer.buffered_len()
                        );
                    }
                    return Ok(ReaderExit::Requested);
                }
                read = reader.read(&mut buf) => Some(read),
                _ = wait_until(deadline) => None,
            };

            let Some(read) = read else {
                let limit = incomplete_limit(&self.timeouts, &framer);
                tracing::warn!(
                    "INDI element incomplete after {:?} ({} bytes buffered), resetting parser",
                    limit,
                    framer.buffered_len()
                );
                let _ = self.event_tx.send(IndiEvent::Error(format!(
                    "Parse timeout after {:?}: incomplete <{}>",
                    limit,
                    framer.current_tag().unwrap_or("?")
                )));
                framer.reset();
                incomplete_since = None;
                continue;
            };

            let n = read.map_err(|e| IndiError::ConnectionFailed(format!("read failed: {}", e)))?;
            if n == 0 {
                return Ok(ReaderExit::RemoteClosed);
            }

            framer.push(&buf[..n]);
            let completed = self.drain(&mut framer).await;
            incomplete_since = if !framer.is_mid_element() {
                None
            } else if completed > 0 {
                Some(Instant::now())
            } else {
                incomplete_since.or_else(|| Some(Instant::now()))
            };
        }
    }

    async fn drain(&self, framer: &mut StreamFramer) -> usize {
        let mut completed = 0;
        loop {
            if !self.session_active.load(Ordering::SeqCst) {
                tracing::debug!(
                    "INDI session ended, dropping {} buffered bytes",
                    framer.buffered_len()
                );
                framer.reset();
                return completed;
            }
            match framer.next_element() {
                Ok(Some(element)) => {
                    completed += 1;
                    self.dispatch(&element).await;
                }
                Ok(None) => return completed,
                Err(e) => {
                    let _ = self.event_tx.send(IndiEvent::Error(e.to_string()));
                }
            }
        }
    }

    async fn dispatch(&self, element: &ProtocolElement) {
        tracing::debug!(
            "INDI <{}> {}.{}",
            element.tag_name,
            element.device().unwrap_or(""),
            element.name().unwrap_or("")
        );

        let outcome = {
            let mut state = self.state.write().await;
            // Checked under the lock so a concurrent reset always wins
            if !self.session_active.load(Ordering::SeqCst) {
                tracing::debug!("INDI session ended, <{}> dropped", element.tag_name);
                return;
            }
            let bridge = EventBridge::for_command(&*self.observer, &self.event_tx, element);
            state.dispatch(element, &bridge)
        };

        match outcome {
            Ok(DispatchOutcome::Reply(reply)) => {
                if self.replies.send(reply.to_xml()).await.is_err() {
                    tracing::warn!("INDI writer closed, <{}> not sent", reply.tag_name);
                }
            }
            Ok(_) => {}
            Err(e) => {
                let _ = self.event_tx.send(IndiEvent::Error(e.to_string()));
            }
        }

        if element.tag_name == tags::PING_REPLY {
            self.last_ping_reply_ms
                .store(current_time_ms(), Ordering::SeqCst);
        }
    }
}

/// How long a partial element may sit in the framer
fn incomplete_limit(timeouts: &IndiTimeoutConfig, framer: &StreamFramer) -> Duration {
    let in_blob = framer.in_blob_payload()
        || matches!(
            framer.current_tag(),
            Some(tags::ONE_BLOB) | Some(tags::SET_BLOB_VECTOR)
        );
    if in_blob {
        timeouts.blob_timeout()
    } else {
        timeouts.message_timeout()
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Writer task - sends commands to the INDI server
async fn writer_task<W: AsyncWrite + Unpin>(mut writer: W, mut rx: mpsc::Receiver<String>) {
    while let Some(cmd) = rx.recv().await {
        if let Err(e) = writer.write_all(cmd.as_bytes()).await {
            tracing::error!("INDI write error: {}", e);
            break;
        }
        if let Err(e) = writer.flush().await {
            tracing::error!("INDI write error: {}", e);
            break;
        }
    }
}

fn check_write_permission(property: &VectorProperty) -> IndiResult<()> {
    if property.kind() == PropertyKind::Light || !property.permission().is_writable() {
        return Err(IndiError::PermissionDenied(format!(
            "Property '{}.{}' is read-only",
            property.device(),
            property.name()
        )));
    }
    Ok(())
}

/// INDI client for communicating with an INDI server
pub struct IndiClient {
    config: ClientConfig,
    state: Arc<RwLock<Dispatcher>>,
    observer: Arc<dyn ClientObserver>,
    connected: Arc<AtomicBool>,
    tx: Option<mpsc::Sender<String>>,
    event_tx: broadcast::Sender<IndiEvent>,
    /// Last keepalive ping sent (milliseconds since UNIX epoch)
    last_keepalive_ms: Arc<AtomicU64>,
    /// Last `pingReply` received, 0 if none yet
    last_ping_reply_ms: Arc<AtomicU64>,
    reconnect_attempts: Arc<AtomicU32>,
    /// Stops the reader task of the current session
    shutdown_tx: Option<oneshot::Sender<()>>,
    /// Shared with the current reader task, replaced on every `start`
    session_active: Arc<AtomicBool>,
}

impl IndiClient {
    pub fn new(host: &str, port: Option<u16>) -> Self {
        Self::with_config(ClientConfig {
            host: host.to_string(),
            port: port.unwrap_or(INDI_DEFAULT_PORT),
            ..ClientConfig::default()
        })
    }

    pub fn with_config(config: ClientConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            config,
            state: Arc::new(RwLock::new(Dispatcher::new())),
            observer: Arc::new(NoopObserver),
            connected: Arc::new(AtomicBool::new(false)),
            tx: None,
            event_tx,
            last_keepalive_ms: Arc::new(AtomicU64::new(0)),
            last_ping_reply_ms: Arc::new(AtomicU64::new(0)),
            reconnect_attempts: Arc::new(AtomicU32::new(0)),
            shutdown_tx: None,
            session_active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Install an observer; it is called inside the dispatch critical section
    pub fn with_observer(mut self, observer: Arc<dyn ClientObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn timeout_config(&self) -> &IndiTimeoutConfig {
        &self.config.timeouts
    }

    pub fn set_timeout_config(&mut self, config: IndiTimeoutConfig) {
        self.config.timeouts = config;
    }

    pub fn reconnection_config(&self) -> &ReconnectionConfig {
        &self.config.reconnection
    }

    pub fn set_reconnection_config(&mut self, config: ReconnectionConfig) {
        self.config.reconnection = config;
    }

    /// Subscribe to INDI events
    pub fn subscribe(&self) -> broadcast::Receiver<IndiEvent> {
        self.event_tx.subscribe()
    }

    /// Connect to the INDI server over TCP
    pub async fn connect(&mut self) -> IndiResult<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let connection_timeout = self.config.timeouts.connection_timeout();

        let stream = match timeout(connection_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(IndiError::ConnectionFailed(format!(
                    "Failed to connect to INDI server at {}: {}. Check that the server is running and the address is correct.",
                    addr, e
                )));
            }
            Err(_) => {
                return Err(IndiError::ConnectionTimeout {
                    host: self.config.host.clone(),
                    port: self.config.port,
                    duration: connection_timeout,
                });
            }
        };

        let (read_half, write_half) = stream.into_split();
        self.start(read_half, write_half).await
    }

    /// Run a session over an already established stream
    pub async fn connect_with_stream<S>(&mut self, stream: S) -> IndiResult<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        self.start(read_half, write_half).await
    }

    async fn start<R, W>(&mut self, reader: R, writer: W) -> IndiResult<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        self.end_session();
        // The server redefines everything after getProperties
        self.state.write().await.reset_devices();
        self.session_active = Arc::new(AtomicBool::new(true));

        let (tx, rx) = mpsc::channel::<String>(COMMAND_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(writer_task(writer, rx));

        let context = ReaderContext {
            state: self.state.clone(),
            observer: self.observer.clone(),
            event_tx: self.event_tx.clone(),
            replies: tx.clone(),
            connected: self.connected.clone(),
            session_active: self.session_active.clone(),
            last_ping_reply_ms: self.last_ping_reply_ms.clone(),
            timeouts: self.config.timeouts.clone(),
        };
        tokio::spawn(context.run(reader, shutdown_rx));

        self.tx = Some(tx);
        self.shutdown_tx = Some(shutdown_tx);
        self.connected.store(true, Ordering::SeqCst);
        self.last_keepalive_ms
            .store(current_time_ms(), Ordering::SeqCst);
        tracing::info!(
            "Connected to INDI server {}:{}",
            self.config.host,
            self.config.port
        );
        EventBridge::new(&*self.observer, &self.event_tx).server_connected();

        let initial = {
            let state = self.state.read().await;
            let mut commands =
                command::get_properties_for_watch(state.watch(), &self.config.protocol_version);
            commands.extend(
                state
                    .blob_modes()
                    .iter()
                    .map(|(device, property, mode)| command::enable_blob(device, property, mode)),
            );
            commands
        };
        for request in &initial {
            self.send_command(request).await?;
        }
        Ok(())
    }

    /// Disconnect, stop the tasks and drop every mirrored device
    ///
    /// The watch list and BLOB policy survive for the next `connect`.
    pub async fn disconnect(&mut self) -> IndiResult<()> {
        tracing::info!(
            "Disconnecting from INDI server {}:{}",
            self.config.host,
            self.config.port
        );

        self.end_session();
        self.tx = None;
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        self.reconnect_attempts.store(0, Ordering::SeqCst);

        let mut state = self.state.write().await;
        if was_connected {
            EventBridge::new(&*self.observer, &self.event_tx).server_disconnected(0);
        }
        state.reset_devices();
        Ok(())
    }

    /// Stop the current reader; must run before any state reset
    fn end_session(&mut self) {
        self.session_active.store(false, Ordering::SeqCst);
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Send a protocol element
    pub async fn send_command(&self, command: &ProtocolElement) -> IndiResult<()> {
        self.send_raw(command.to_xml()).await
    }

    /// Send raw INDI text
    pub async fn send_raw(&self, text: String) -> IndiResult<()> {
        let tx = match &self.tx {
            Some(tx) if self.is_connected() => tx,
            _ => return Err(IndiError::NotConnected),
        };
        tx.send(text).await.map_err(|e| {
            IndiError::ChannelClosed(format!(
                "Failed to send INDI command to {}:{}: {}. The connection may have been lost.",
                self.config.host, self.config.port, e
            ))
        })
    }

    // =========================================================================
    // WATCH LIST AND BLOB POLICY
    // =========================================================================

    /// Track `device`; asks the server for its properties when connected
    pub async fn watch_device(&self, device: &str) -> IndiResult<()> {
        self.state.write().await.watch_mut().watch_device(device);
        self.request_properties(Some(device), None).await
    }

    pub async fn watch_device_with_callback(
        &self,
        device: &str,
        callback: DeviceCallback,
    ) -> IndiResult<()> {
        self.state
            .write()
            .await
            .watch_mut()
            .watch_device_with_callback(device, callback);
        self.request_properties(Some(device), None).await
    }

    pub async fn watch_property(&self, device: &str, property: &str) -> IndiResult<()> {
        self.state
            .write()
            .await
            .watch_mut()
            .watch_property(device, property);
        self.request_properties(Some(device), Some(property)).await
    }

    async fn request_properties(&self, device: Option<&str>, property: Option<&str>) -> IndiResult<()> {
        if !self.is_connected() {
            return Ok(());
        }
        let request = command::get_properties(&self.config.protocol_version, device, property);
        self.send_command(&request).await
    }

    /// Change the BLOB policy and tell the server with `enableBLOB`
    pub async fn set_blob_mode(
        &self,
        device: &str,
        property: Option<&str>,
        mode: BlobHandling,
    ) -> IndiResult<()> {
        self.state
            .write()
            .await
            .set_blob_mode(device, property, mode);
        if self.is_connected() {
            self.send_command(&command::enable_blob(device, property, mode))
                .await?;
        }
        Ok(())
    }

    pub async fn blob_mode(&self, device: &str, property: Option<&str>) -> BlobHandling {
        self.state.read().await.blob_modes().resolve(device, property)
    }

    // =========================================================================
    // SNAPSHOTS
    // =========================================================================

    /// Run `f` against a consistent view of the client state
    pub async fn with_state<R>(&self, f: impl FnOnce(&Dispatcher) -> R) -> R {
        let state = self.state.read().await;
        f(&state)
    }

    pub async fn device_names(&self) -> Vec<String> {
        self.with_state(|s| s.devices().map(|d| d.name().to_string()).collect())
            .await
    }

    pub async fn get_device(&self, device: &str) -> Option<Device> {
        self.with_state(|s| s.device(device).cloned()).await
    }

    pub async fn get_property(&self, device: &str, property: &str) -> Option<VectorProperty> {
        self.with_state(|s| s.property(device, property).cloned())
            .await
    }

    pub async fn has_property(&self, device: &str, property: &str) -> bool {
        self.with_state(|s| s.property(device, property).is_some())
            .await
    }

    pub async fn get_number(&self, device: &str, property: &str, element: &str) -> Option<f64> {
        self.with_state(|s| s.property(device, property)?.number(element).map(|n| n.value))
            .await
    }

    pub async fn get_switch(
        &self,
        device: &str,
        property: &str,
        element: &str,
    ) -> Option<SwitchState> {
        self.with_state(|s| s.property(device, property)?.switch(element).map(|e| e.state))
            .await
    }

    pub async fn get_text(&self, device: &str, property: &str, element: &str) -> Option<String> {
        self.with_state(|s| {
            s.property(device, property)?
                .text(element)
                .map(|e| e.text.clone())
        })
        .await
    }

    pub async fn get_light(
        &self,
        device: &str,
        property: &str,
        element: &str,
    ) -> Option<PropertyState> {
        self.with_state(|s| s.property(device, property)?.light(element).map(|e| e.state))
            .await
    }

    pub async fn get_blob(&self, device: &str, property: &str, element: &str) -> Option<BlobElement> {
        self.with_state(|s| s.property(device, property)?.blob(element).cloned())
            .await
    }

    pub async fn get_property_state(&self, device: &str, property: &str) -> Option<PropertyState> {
        self.with_state(|s| s.property(device, property).map(|p| p.state()))
            .await
    }

    pub async fn get_property_permission(
        &self,
        device: &str,
        property: &str,
    ) -> Option<Permission> {
        self.with_state(|s| s.property(device, property).map(|p| p.permission()))
            .await
    }

    pub async fn is_property_busy(&self, device: &str, property: &str) -> bool {
        self.get_property_state(device, property).await == Some(PropertyState::Busy)
    }

    /// True when the device's `CONNECTION` switch reports connected
    pub async fn is_device_connected(&self, device: &str) -> bool {
        self.with_state(|s| s.device(device).is_some_and(Device::is_connected))
            .await
    }

    pub async fn messages(&self, device: &str) -> Vec<String> {
        self.with_state(|s| s.device(device).map(|d| d.messages().to_vec()).unwrap_or_default())
            .await
    }

    pub async fn universal_messages(&self) -> Vec<String> {
        self.with_state(|s| s.universal_messages().to_vec()).await
    }

    // =========================================================================
    // OUTBOUND COMMANDS
    // =========================================================================

    /// Copy of a property the caller may write to
    async fn writable_copy(&self, device: &str, property: &str) -> IndiResult<VectorProperty> {
        let state = self.state.read().await;
        if state.device(device).is_none() {
            return Err(IndiError::DeviceNotFound(device.to_string()));
        }
        let copy = state
            .property(device, property)
            .cloned()
            .ok_or_else(|| IndiError::PropertyNotFound {
                device: device.to_string(),
                property: property.to_string(),
            })?;
        check_write_permission(&copy)?;
        Ok(copy)
    }

    /// Send a locally modified property copy as a `new*Vector` command
    pub async fn send_new_property(&self, property: &VectorProperty) -> IndiResult<()> {
        check_write_permission(property)?;
        let command = command::new_property_command(property)?;
        tracing::debug!("INDI <{}> {}.{}", command.tag_name, property.device(), property.name());
        self.send_command(&command).await
    }

    /// Set number elements, checking each against its declared range
    pub async fn send_new_number(
        &self,
        device: &str,
        property: &str,
        values: &[(&str, f64)],
    ) -> IndiResult<()> {
        let mut copy = self.writable_copy(device, property).await?;
        for &(element, value) in values {
            if let Some(number) = copy.number(element) {
                if number.out_of_range(value) {
                    return Err(IndiError::ValueOutOfRange {
                        device: device.to_string(),
                        property: property.to_string(),
                        element: element.to_string(),
                        value,
                        min: number.min,
                        max: number.max,
                    });
                }
            }
            copy.set_number(element, value)?;
        }
        self.send_new_property(&copy).await
    }

    /// Set one switch; turning one On in an exclusive vector turns the others Off
    pub async fn send_new_switch(
        &self,
        device: &str,
        property: &str,
        element: &str,
        state: SwitchState,
    ) -> IndiResult<()> {
        let mut copy = self.writable_copy(device, property).await?;
        match (copy.switch_rule(), state) {
            (Some(SwitchRule::OneOfMany | SwitchRule::AtMostOne), SwitchState::On) => {
                copy.select_switch(element)?
            }
            _ => copy.set_switch(element, state)?,
        }
        self.send_new_property(&copy).await
    }

    pub async fn send_new_text(
        &self,
        device: &str,
        property: &str,
        values: &[(&str, &str)],
    ) -> IndiResult<()> {
        let mut copy = self.writable_copy(device, property).await?;
        for &(element, text) in values {
            copy.set_text(element, text)?;
        }
        self.send_new_property(&copy).await
    }

    pub async fn send_new_blob(
        &self,
        device: &str,
        property: &str,
        element: &str,
        data: Vec<u8>,
        format: &str,
    ) -> IndiResult<()> {
        let mut copy = self.writable_copy(device, property).await?;
        copy.set_blob(element, data, format)?;
        self.send_new_property(&copy).await
    }

    /// Turn on the device's standard `CONNECTION` switch
    pub async fn connect_device(&self, device: &str) -> IndiResult<()> {
        self.send_new_switch(device, sp::CONNECTION, sp::CONNECT, SwitchState::On)
            .await
    }

    pub async fn disconnect_device(&self, device: &str) -> IndiResult<()> {
        self.send_new_switch(device, sp::CONNECTION, sp::DISCONNECT, SwitchState::On)
            .await
    }

    // =========================================================================
    // TIMEOUT AND RELIABILITY METHODS
    // =========================================================================

    /// Wait for a property to reach a specific state with timeout
    ///
    /// Returns early with an error if the property goes to Alert.
    pub async fn wait_for_property_state(
        &self,
        device: &str,
        property: &str,
        expected_state: PropertyState,
        timeout_duration: Duration,
    ) -> Result<(), IndiTimeoutError> {
        let start = Instant::now();
        let poll_interval = Duration::from_millis(self.config.timeouts.property_poll_interval_ms);
        let mut last_state = None;

        loop {
            if let Some(state) = self.get_property_state(device, property).await {
                last_state = Some(state);
                if state == expected_state {
                    return Ok(());
                }
                if state == PropertyState::Alert {
                    return Err(IndiTimeoutError {
                        device: device.to_string(),
                        property: property.to_string(),
                        context: format!(
                            "Property entered Alert state while waiting for {}",
                            expected_state
                        ),
                        last_state,
                    });
                }
            }

            if start.elapsed() >= timeout_duration {
                return Err(IndiTimeoutError {
                    device: device.to_string(),
                    property: property.to_string(),
                    context: format!(
                        "Timed out waiting for state {} after {:?}",
                        expected_state, timeout_duration
                    ),
                    last_state,
                });
            }
            sleep(poll_interval).await;
        }
    }

    /// Wait until a property is Ok or Idle
    pub async fn wait_for_property_not_busy(
        &self,
        device: &str,
        property: &str,
        timeout_duration: Duration,
    ) -> Result<(), IndiTimeoutError> {
        let start = Instant::now();
        let poll_interval = Duration::from_millis(self.config.timeouts.property_poll_interval_ms);
        let mut last_state = None;

        loop {
            if let Some(state) = self.get_property_state(device, property).await {
                last_state = Some(state);
                match state {
                    PropertyState::Ok | PropertyState::Idle => return Ok(()),
                    PropertyState::Alert => {
                        return Err(IndiTimeoutError {
                            device: device.to_string(),
                            property: property.to_string(),
                            context: "Property entered Alert state".to_string(),
                            last_state,
                        })
                    }
                    PropertyState::Busy => {}
                }
            }

            if start.elapsed() >= timeout_duration {
                return Err(IndiTimeoutError {
                    device: device.to_string(),
                    property: property.to_string(),
                    context: format!(
                        "Timed out waiting for property to finish (not Busy) after {:?}",
                        timeout_duration
                    ),
                    last_state,
                });
            }
            sleep(poll_interval).await;
        }
    }

    async fn send_keepalive(&self) -> IndiResult<()> {
        // Stamp before sending so concurrent checks do not double-ping
        self.last_keepalive_ms
            .store(current_time_ms(), Ordering::SeqCst);
        let uid = uuid::Uuid::new_v4().to_string();
        tracing::debug!("INDI keepalive ping {}", uid);
        self.send_command(&command::ping_request(&uid)).await
    }

    /// Send a `pingRequest` if the keepalive interval has elapsed
    pub async fn check_keepalive(&self) -> IndiResult<()> {
        let keepalive_interval_ms = self.config.timeouts.keepalive_interval_secs * 1000;
        let last_ms = self.last_keepalive_ms.load(Ordering::SeqCst);

        if current_time_ms().saturating_sub(last_ms) >= keepalive_interval_ms && self.is_connected()
        {
            self.send_keepalive().await?;
        }
        Ok(())
    }

    /// Time since the last `pingReply`, `None` before the first one
    pub fn last_ping_reply_age(&self) -> Option<Duration> {
        match self.last_ping_reply_ms.load(Ordering::SeqCst) {
            0 => None,
            ms => Some(Duration::from_millis(current_time_ms().saturating_sub(ms))),
        }
    }

    /// Attempt to reconnect with exponential backoff and jitter
    pub async fn reconnect_with_backoff(&mut self) -> IndiResult<()> {
        let max_attempts = self.config.reconnection.max_attempts;
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            self.reconnect_attempts.store(attempt, Ordering::SeqCst);
            tracing::info!(
                "Reconnection attempt {}/{} to {}:{}",
                attempt,
                max_attempts,
                self.config.host,
                self.config.port
            );

            match self.connect().await {
                Ok(()) => {
                    tracing::info!(
                        "Successfully reconnected to {}:{}",
                        self.config.host,
                        self.config.port
                    );
                    self.reconnect_attempts.store(0, Ordering::SeqCst);
                    return Ok(());
                }
                Err(e) => {
                    last_error = e.to_string();
                    tracing::warn!("Reconnection attempt {} failed: {}", attempt, last_error);
                    if attempt < max_attempts {
                        let delay = self.config.reconnection.calculate_delay(attempt);
                        tracing::info!("Waiting {:?} before next reconnection attempt", delay);
                        sleep(delay).await;
                    }
                }
            }
        }

        Err(IndiError::ReconnectionFailed {
            attempts: max_attempts,
            last_error,
        })
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }
}

impl Default for IndiClient {
    fn default() -> Self {
        Self::with_config(ClientConfig::default())
    }
}

/// Current time in milliseconds since UNIX epoch
fn current_time_ms() -> u64 {
    use std::time::SystemTime;
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

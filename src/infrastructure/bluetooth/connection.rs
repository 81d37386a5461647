//! Device Connection Module
//!
//! Opens the duplex byte stream to a bonded HxM, runs the background read
//! loop and reports every lifecycle transition to the observer.

use crate::domain::models::{
    ConnectionState, DeviceDescriptor, MessageSeverity, MonitorEvent, StatusMessage,
};
use crate::infrastructure::bluetooth::error::{MonitorError, Result};
use crate::infrastructure::bluetooth::protocol::{self, FRAME_LEN};
use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

/// Address scheme for serial-over-TCP bridges
pub const TCP_SCHEME: &str = "tcp://";

/// Line speed requested from RFCOMM ttys. The radio link ignores it.
const TTY_BAUD_RATE: u32 = 115_200;

/// Read half of an open device link
pub trait DeviceStream: AsyncRead + Send + Unpin {}

impl<T: AsyncRead + Send + Unpin> DeviceStream for T {}

pub type BoxedStream = Box<dyn DeviceStream>;

/// Opens a byte stream to a device address (the platform socket API)
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, address: &str) -> Result<BoxedStream>;
}

/// Connector for RFCOMM links exposed by the OS.
///
/// `address` is either the tty an HxM is bound to (`/dev/rfcomm0`) or
/// `tcp://host:port` for a serial bridge.
#[derive(Debug, Clone, Default)]
pub struct RfcommConnector;

#[async_trait]
impl Connector for RfcommConnector {
    async fn open(&self, address: &str) -> Result<BoxedStream> {
        let connect_failed = |source: std::io::Error| MonitorError::ConnectFailed {
            address: address.to_string(),
            source,
        };

        if let Some(endpoint) = address.strip_prefix(TCP_SCHEME) {
            if endpoint.is_empty() {
                return Err(MonitorError::InvalidAddress(address.to_string()));
            }
            debug!("Opening TCP bridge at {}", endpoint);
            let stream = tokio::net::TcpStream::connect(endpoint)
                .await
                .map_err(connect_failed)?;
            return Ok(Box::new(stream));
        }

        if address.is_empty() || !Path::new(address).is_absolute() {
            return Err(MonitorError::InvalidAddress(address.to_string()));
        }

        debug!("Opening RFCOMM device {}", address);
        // Opened in raw mode: frame bytes such as ETX must reach us untouched
        let port = tokio_serial::new(address, TTY_BAUD_RATE)
            .open_native_async()
            .map_err(|e| connect_failed(e.into()))?;
        Ok(Box::new(port))
    }
}

/// Configuration for session behavior
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Upper bound on opening the stream
    pub connect_timeout: Duration,
    /// Log every decoded field at debug level
    pub dump_frames: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            dump_frames: false,
        }
    }
}

struct CellState {
    state: ConnectionState,
    /// Bumped on every claim so a superseded session can never emit
    generation: u64,
}

/// The single live connection state of a service plus its event sink.
///
/// Every emission happens while the lock is held, so the observer sees
/// events in exactly the order the transitions happened.
pub struct SessionCell {
    inner: Mutex<CellState>,
    events: mpsc::UnboundedSender<MonitorEvent>,
}

impl SessionCell {
    pub fn new(events: mpsc::UnboundedSender<MonitorEvent>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(CellState {
                state: ConnectionState::Resting,
                generation: 0,
            }),
            events,
        })
    }

    fn lock(&self) -> MutexGuard<'_, CellState> {
        // State stays consistent across a panicking holder: every write is a
        // single assignment
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn send(&self, event: MonitorEvent) {
        // Observer gone means nobody is listening any more
        let _ = self.events.send(event);
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state.clone()
    }

    /// Emit an event that does not belong to any session
    pub fn publish(&self, event: MonitorEvent) {
        let _guard = self.lock();
        self.send(event);
    }

    /// Move to `Connecting` for a new session. `None` if a session is
    /// already connecting or connected.
    fn claim(&self) -> Option<u64> {
        let mut inner = self.lock();
        if inner.state.is_active() {
            return None;
        }
        inner.generation += 1;
        inner.state = ConnectionState::Connecting;
        self.send(MonitorEvent::StateChanged(ConnectionState::Connecting));
        Some(inner.generation)
    }

    fn connected(&self, generation: u64, name: &str) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation || inner.state != ConnectionState::Connecting {
            return false;
        }
        let state = ConnectionState::Connected(name.to_string());
        inner.state = state.clone();
        self.send(MonitorEvent::StateChanged(state));
        true
    }

    fn reading(&self, generation: u64, frame: protocol::HeartRateFrame) -> bool {
        let inner = self.lock();
        if inner.generation != generation
            || !matches!(inner.state, ConnectionState::Connected(_))
        {
            return false;
        }
        self.send(MonitorEvent::ReadingReceived(frame));
        true
    }

    /// Connect attempt failed: report `Failed`, then fall back to `Resting`
    fn failed(&self, generation: u64, message: &str) {
        let mut inner = self.lock();
        if inner.generation != generation || inner.state != ConnectionState::Connecting {
            return;
        }
        self.send(MonitorEvent::Notice(StatusMessage::new(
            message,
            MessageSeverity::Error,
        )));
        self.send(MonitorEvent::StateChanged(ConnectionState::Failed));
        inner.state = ConnectionState::Resting;
        self.send(MonitorEvent::StateChanged(ConnectionState::Resting));
    }

    /// Established link dropped underneath us
    fn lost(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.generation != generation
            || !matches!(inner.state, ConnectionState::Connected(_))
        {
            return;
        }
        self.send(MonitorEvent::Notice(StatusMessage::new(
            "Device connection was lost",
            MessageSeverity::Warning,
        )));
        inner.state = ConnectionState::Resting;
        self.send(MonitorEvent::StateChanged(ConnectionState::Resting));
    }

    /// Explicit stop. Emits `Resting` only on an actual transition.
    fn release(&self, generation: u64) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation || inner.state == ConnectionState::Resting {
            return false;
        }
        inner.state = ConnectionState::Resting;
        self.send(MonitorEvent::StateChanged(ConnectionState::Resting));
        true
    }
}

/// One connect → read loop → teardown lifetime with a single device
pub struct ConnectionSession {
    cell: Arc<SessionCell>,
    connector: Arc<dyn Connector>,
    config: SessionConfig,
    generation: Option<u64>,
    shutdown: Option<watch::Sender<bool>>,
    worker: Option<JoinHandle<()>>,
}

impl ConnectionSession {
    pub fn new(
        cell: Arc<SessionCell>,
        connector: Arc<dyn Connector>,
        config: SessionConfig,
    ) -> Self {
        Self {
            cell,
            connector,
            config,
            generation: None,
            shutdown: None,
            worker: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.cell.state()
    }

    /// Start connecting to `device` on a background task.
    ///
    /// Ignored (returns `false`) while a session is connecting or connected.
    /// Must be called from within a tokio runtime.
    pub fn connect(&mut self, device: DeviceDescriptor) -> bool {
        let Some(generation) = self.cell.claim() else {
            debug!(
                "Connect to {} ignored, a session is already active",
                device.name
            );
            return false;
        };

        info!("Connecting to {} at {}", device.name, device.address);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = tokio::spawn(run_session(
            self.cell.clone(),
            generation,
            self.connector.clone(),
            device,
            self.config.clone(),
            shutdown_rx,
        ));

        self.generation = Some(generation);
        self.shutdown = Some(shutdown_tx);
        self.worker = Some(worker);
        true
    }

    /// Close the stream if open and go back to `Resting`. Idempotent.
    pub fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            // Worker may already be gone after a lost link
            let _ = shutdown.send(true);
        }
        if let Some(generation) = self.generation {
            if self.cell.release(generation) {
                info!("Session stopped");
            }
        }
        // The worker drops the stream as soon as it sees the signal
        self.worker.take();
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_session(
    cell: Arc<SessionCell>,
    generation: u64,
    connector: Arc<dyn Connector>,
    device: DeviceDescriptor,
    config: SessionConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let opened = tokio::select! {
        _ = shutdown.changed() => {
            debug!("Connect to {} cancelled", device.address);
            return;
        }
        res = tokio::time::timeout(config.connect_timeout, connector.open(&device.address)) => {
            match res {
                Ok(opened) => opened,
                Err(_) => Err(MonitorError::ConnectTimeout {
                    address: device.address.clone(),
                    timeout: config.connect_timeout,
                }),
            }
        }
    };

    let mut stream = match opened {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Unable to connect to {}: {}", device.name, e);
            cell.failed(generation, &format!("Unable to connect device: {}", e));
            return;
        }
    };

    if !cell.connected(generation, &device.name) {
        // Stopped while the stream was opening; dropping it closes it
        debug!("Session superseded before it connected");
        return;
    }
    info!("Connected to {}", device.name);

    match read_loop(&cell, generation, &mut stream, &config, &mut shutdown).await {
        Ok(()) => debug!("Read loop for {} stopped", device.name),
        Err(e) => {
            info!("Connection to {} lost: {}", device.name, e);
            cell.lost(generation);
        }
    }
}

async fn read_loop(
    cell: &SessionCell,
    generation: u64,
    stream: &mut BoxedStream,
    config: &SessionConfig,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<()> {
    let mut buffer = [0u8; FRAME_LEN];
    loop {
        tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            res = stream.read_exact(&mut buffer) => {
                res.map_err(MonitorError::StreamClosed)?;
            }
        }

        let frame = protocol::decode(&buffer);
        if let Some(issue) = frame.issue() {
            warn!("HxM frame was not parsed properly: {}", issue);
        }
        if config.dump_frames {
            frame.dump();
        }

        if !cell.reading(generation, frame) {
            return Ok(());
        }
    }
}

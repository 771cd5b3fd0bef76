use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::LinkConfig;
use crate::protocol::{self, TelemetrySample, CMD_JSON_MODE, CMD_RESUME, CMD_TOGGLE_PAUSE};
use crate::transport::{LinkTransport, SerialTransport};

const READ_CHUNK_SIZE: usize = 256;
const TRANSIENT_READ_BACKOFF: Duration = Duration::from_millis(100);
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Invoked per decoded sample with `(timestamp, current, peak)`.
pub type DataCallback = Box<dyn Fn(f64, f64, f64) + Send + Sync>;
/// Invoked on connection-level and command-send failures. Link-lost
/// messages contain the substring "connection lost".
pub type ErrorCallback = Box<dyn Fn(&str) + Send + Sync>;
/// Invoked with every non-empty line read, telemetry or not.
pub type RawLineCallback = Box<dyn Fn(&str) + Send + Sync>;

/// Local shadow of the rig's pause/run state.
///
/// The firmware exposes no state query, only edge-triggered toggles, so the
/// link models the mode itself and funnels every transition through the
/// named `send_*` operations. The shadow tracks what this link sent; it can
/// drift from the real device if a prior session left the rig running. The
/// connect handshake forces a pause, which is the resynchronization point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceMode {
    Paused,
    Running,
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("already connected")]
    AlreadyConnected,
    #[error("failed to open {port}: {source}")]
    Open {
        port: String,
        source: serialport::Error,
    },
    #[error("handshake failed: {0}")]
    Handshake(#[source] io::Error),
    #[error("failed to clone transport for reader: {0}")]
    CloneTransport(#[source] io::Error),
    #[error("failed to spawn reader thread: {0}")]
    SpawnReader(#[source] io::Error),
}

#[derive(Default)]
struct CallbackSet {
    data: Option<DataCallback>,
    error: Option<ErrorCallback>,
    raw_line: Option<RawLineCallback>,
}

impl CallbackSet {
    fn emit_data(&self, sample: &TelemetrySample) {
        if let Some(cb) = &self.data {
            cb(sample.timestamp, sample.current, sample.peak);
        }
    }

    fn emit_error(&self, message: &str) {
        if let Some(cb) = &self.error {
            cb(message);
        }
    }

    fn emit_raw_line(&self, line: &str) {
        if let Some(cb) = &self.raw_line {
            cb(line);
        }
    }
}

/// Builds a [`DeviceLink`] with its callbacks installed up front, before any
/// reader thread exists to race with.
pub struct DeviceLinkBuilder {
    config: LinkConfig,
    callbacks: CallbackSet,
}

impl DeviceLinkBuilder {
    pub fn on_data(mut self, callback: impl Fn(f64, f64, f64) + Send + Sync + 'static) -> Self {
        self.callbacks.data = Some(Box::new(callback));
        self
    }

    pub fn on_error(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.callbacks.error = Some(Box::new(callback));
        self
    }

    pub fn on_raw_line(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.callbacks.raw_line = Some(Box::new(callback));
        self
    }

    pub fn build(self) -> DeviceLink {
        DeviceLink {
            config: self.config,
            callbacks: Arc::new(self.callbacks),
            writer: None,
            reader: None,
            connected: Arc::new(AtomicBool::new(false)),
            stop_reading: Arc::new(AtomicBool::new(false)),
            debug: Arc::new(AtomicBool::new(false)),
            mode: DeviceMode::Paused,
        }
    }
}

/// Owns the serial connection to a TensileOS rig: one background reader
/// thread per connection, line classification and telemetry decoding, the
/// device mode shadow, and single-byte command dispatch.
///
/// Faults never cross the callback boundary as panics; they become error
/// callbacks or `Err` returns. Callbacks fire on the reader thread, so
/// consumers that touch thread-bound state must marshal themselves.
///
/// Single-caller discipline is assumed and compiler-enforced: every
/// mutating operation takes `&mut self`, and the mode shadow is only
/// touched from the caller's thread.
pub struct DeviceLink {
    config: LinkConfig,
    callbacks: Arc<CallbackSet>,
    writer: Option<Box<dyn LinkTransport>>,
    reader: Option<JoinHandle<()>>,
    connected: Arc<AtomicBool>,
    stop_reading: Arc<AtomicBool>,
    debug: Arc<AtomicBool>,
    mode: DeviceMode,
}

impl DeviceLink {
    pub fn builder(config: LinkConfig) -> DeviceLinkBuilder {
        DeviceLinkBuilder {
            config,
            callbacks: CallbackSet::default(),
        }
    }

    /// Enumerate host serial ports as `(name, description)` pairs.
    pub fn list_ports() -> serialport::Result<Vec<(String, String)>> {
        crate::transport::list_ports()
    }

    /// Open `port` at the configured baud rate, run the initialization
    /// handshake, and start the background reader.
    ///
    /// Blocks for the handshake delays (about four seconds with the default
    /// config). On failure the error callback fires, no reader thread is
    /// left running, and the port is closed.
    pub fn connect(&mut self, port: &str) -> Result<(), LinkError> {
        if self.is_connected() {
            return Err(LinkError::AlreadyConnected);
        }
        let transport =
            match SerialTransport::open(port, self.config.baud_rate, self.config.read_timeout) {
                Ok(transport) => transport,
                Err(source) => {
                    let err = LinkError::Open {
                        port: port.to_string(),
                        source,
                    };
                    self.callbacks.emit_error(&format!("Connection error: {err}"));
                    return Err(err);
                }
            };
        info!(port, "serial port opened");
        self.connect_with(Box::new(transport))
    }

    /// [`connect`](Self::connect) over an already-open transport. Production
    /// goes through the serial path; tests drive the link with loopback
    /// transports.
    pub fn connect_with(&mut self, mut transport: Box<dyn LinkTransport>) -> Result<(), LinkError> {
        if self.is_connected() {
            return Err(LinkError::AlreadyConnected);
        }

        if let Err(err) = self.handshake(transport.as_mut()) {
            self.callbacks.emit_error(&format!("Connection error: {err}"));
            return Err(LinkError::Handshake(err));
        }

        let reader_transport = match transport.try_clone() {
            Ok(clone) => clone,
            Err(err) => {
                self.callbacks.emit_error(&format!("Connection error: {err}"));
                return Err(LinkError::CloneTransport(err));
            }
        };

        self.mode = DeviceMode::Paused;
        self.stop_reading.store(false, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);

        let worker = ReadLoop {
            transport: reader_transport,
            connected: Arc::clone(&self.connected),
            stop: Arc::clone(&self.stop_reading),
            debug: Arc::clone(&self.debug),
            callbacks: Arc::clone(&self.callbacks),
        };
        let handle = thread::Builder::new()
            .name("tensilelink-reader".into())
            .spawn(move || worker.run());
        match handle {
            Ok(handle) => {
                self.reader = Some(handle);
                self.writer = Some(transport);
                info!("device link connected");
                Ok(())
            }
            Err(err) => {
                self.connected.store(false, Ordering::SeqCst);
                self.callbacks.emit_error(&format!("Connection error: {err}"));
                Err(LinkError::SpawnReader(err))
            }
        }
    }

    /// The fixed command/delay sequence that brings the rig to a known
    /// state. Order- and timing-dependent; see [`LinkConfig`].
    fn handshake(&self, transport: &mut dyn LinkTransport) -> io::Result<()> {
        // Let the device finish its boot/calibration chatter, then drop it
        // unparsed.
        thread::sleep(self.config.boot_settle_delay);
        transport.discard_input()?;

        // 'j' selects JSON output; leaving the menu also starts the device
        // running, so force it back to paused with the toggle.
        transport.send(&[CMD_JSON_MODE])?;
        thread::sleep(self.config.mode_switch_delay);
        transport.send(&[CMD_TOGGLE_PAUSE])?;
        thread::sleep(self.config.pause_confirm_delay);

        // Trailing menu text from the mode switch is still buffered.
        transport.discard_input()
    }

    /// Stop the reader, wait for it up to the configured join timeout, and
    /// close the port. Idempotent; safe to call when never connected, in
    /// which case it performs no callback invocations.
    pub fn disconnect(&mut self) {
        self.connected.store(false, Ordering::SeqCst);
        self.stop_reading.store(true, Ordering::SeqCst);

        if let Some(handle) = self.reader.take() {
            let deadline = Instant::now() + self.config.join_timeout;
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(JOIN_POLL_INTERVAL);
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                // Closing the port below unblocks the stuck read; the
                // detached thread then exits on the stop flag.
                warn!(
                    "reader thread did not stop within {:?}; detaching",
                    self.config.join_timeout
                );
            }
        }

        if self.writer.take().is_some() {
            info!("device link disconnected");
        }
    }

    /// Begin a new measurement epoch on the rig.
    ///
    /// From a running device: pause toggle, settle, then a second toggle
    /// which (on a paused device) resets the onboard peak/timestamp counters
    /// and starts the run. From a paused device only the second toggle is
    /// sent. Leaves the shadow `Running`.
    pub fn send_start_new_test(&mut self) {
        if self.mode == DeviceMode::Running {
            if !self.send_command(CMD_TOGGLE_PAUSE) {
                return;
            }
            thread::sleep(self.config.command_settle_delay);
            self.mode = DeviceMode::Paused;
        }
        if !self.send_command(CMD_TOGGLE_PAUSE) {
            return;
        }
        thread::sleep(self.config.command_settle_delay);
        self.mode = DeviceMode::Running;
    }

    /// Pause measurement. No-op when the shadow is already `Paused`, so a
    /// second call can never accidentally resume via the toggle.
    pub fn send_pause(&mut self) {
        if self.mode == DeviceMode::Running && self.send_command(CMD_TOGGLE_PAUSE) {
            self.mode = DeviceMode::Paused;
        }
    }

    /// Resume measurement from a known paused state. Uses the dedicated
    /// resume byte, not the toggle; no-op when already `Running`.
    pub fn send_resume(&mut self) {
        if self.mode == DeviceMode::Paused && self.send_command(CMD_RESUME) {
            self.mode = DeviceMode::Running;
        }
    }

    /// True only while the background reader considers the link up and the
    /// port handle is held open.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.writer.is_some()
    }

    /// The link's current belief about the rig's pause/run state.
    pub fn mode(&self) -> DeviceMode {
        self.mode
    }

    /// Toggle verbose per-line diagnostics. Pure observability switch; has
    /// no protocol effect.
    pub fn set_debug(&mut self, enabled: bool) {
        self.debug.store(enabled, Ordering::SeqCst);
    }

    /// Write one command byte. On failure the error callback fires and the
    /// caller must not update the mode shadow.
    fn send_command(&mut self, byte: u8) -> bool {
        let Some(writer) = self.writer.as_mut() else {
            return false;
        };
        match writer.send(&[byte]) {
            Ok(()) => true,
            Err(err) => {
                self.callbacks.emit_error(&format!("Command send error: {err}"));
                false
            }
        }
    }
}

impl Drop for DeviceLink {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// State moved onto the background reader thread; exactly one exists per
/// connection lifetime.
struct ReadLoop {
    transport: Box<dyn LinkTransport>,
    connected: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    debug: Arc<AtomicBool>,
    callbacks: Arc<CallbackSet>,
}

impl ReadLoop {
    fn run(mut self) {
        let mut pending: Vec<u8> = Vec::with_capacity(READ_CHUNK_SIZE);
        let mut chunk = [0u8; READ_CHUNK_SIZE];

        while !self.stop.load(Ordering::SeqCst) && self.connected.load(Ordering::SeqCst) {
            match self.transport.read_chunk(&mut chunk) {
                Ok(0) => continue,
                Ok(n) => {
                    pending.extend_from_slice(&chunk[..n]);
                    self.drain_lines(&mut pending);
                }
                // A timeout is the loop's natural poll boundary for the
                // stop flag, not a fault.
                Err(err) if err.kind() == io::ErrorKind::TimedOut => continue,
                Err(err) if is_transient(&err) => {
                    warn!("transient read error: {err}");
                    thread::sleep(TRANSIENT_READ_BACKOFF);
                }
                Err(err) => {
                    self.connected.store(false, Ordering::SeqCst);
                    self.callbacks
                        .emit_error(&format!("Serial connection lost: {err}"));
                    break;
                }
            }
        }
    }

    fn drain_lines(&self, pending: &mut Vec<u8>) {
        while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = pending.drain(..=pos).collect();
            // Undecodable bytes are replaced, never fatal.
            let line = String::from_utf8_lossy(&raw);
            self.handle_line(line.trim());
        }
    }

    fn handle_line(&self, line: &str) {
        if line.is_empty() {
            return;
        }

        // Every non-empty line reaches the raw observer, telemetry or not.
        self.callbacks.emit_raw_line(line);

        let diagnostics = self.debug.load(Ordering::SeqCst);
        if diagnostics {
            debug!("raw line: {line}");
        }

        if !protocol::is_telemetry(line) {
            return;
        }
        match protocol::parse_sample(line) {
            Ok(sample) => {
                if diagnostics {
                    debug!(
                        timestamp = sample.timestamp,
                        current = sample.current,
                        peak = sample.peak,
                        "telemetry sample"
                    );
                }
                self.callbacks.emit_data(&sample);
            }
            // Malformed telemetry is dropped, never escalated.
            Err(err) => {
                if diagnostics {
                    debug!("telemetry decode failed: {err}");
                }
            }
        }
    }
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
    )
}

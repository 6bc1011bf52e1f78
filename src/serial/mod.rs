//! # Serial Communication Module
//!
//! Handles the serial link to the servo microcontroller.
//!
//! This module handles:
//! - Port enumeration
//! - Baud rate auto-detection from the READY banner
//! - Startup handshake verification
//! - Sending `S<id>:<angle>` commands
//! - Draining responses and counting `OK:` confirmations
//!
//! ## Connection States
//!
//! `Disconnected → Connecting → (Ready | Unconfirmed) → Disconnected`
//!
//! `Unconfirmed` means the port opened but no READY banner arrived during the
//! handshake window. The link is usable; the board is often browning out
//! because the servos draw too much current through USB.

pub mod port_trait;
pub mod protocol;

use std::fmt;
use std::sync::Arc;

use tokio::time::{sleep, timeout, Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::SerialConfig;
use crate::error::{Result, ServoRigError};
use crate::mapping::MAX_SERVO_ID;
use port_trait::{PortOpener, SerialPortIO, TokioSerialOpener};
use protocol::{classify, encode_servo_command, LineBuffer, Response, ServoAck, BAUD_CANDIDATES};

/// Read chunk size for draining the port
const READ_CHUNK: usize = 256;

/// How often handshake windows re-check for buffered bytes
const HANDSHAKE_POLL: Duration = Duration::from_millis(10);

/// Handshake and write timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTimings {
    /// Wait after opening a probe port before reading
    pub probe_delay: Duration,
    /// How long each baud candidate has to send READY
    pub probe_window: Duration,
    /// Wait for the board to finish its reset after the final open
    pub settle_delay: Duration,
    /// How long the final open has to send READY
    pub handshake_window: Duration,
    /// Upper bound on one command write
    pub write_timeout: Duration,
}

impl Default for LinkTimings {
    fn default() -> Self {
        Self {
            probe_delay: Duration::from_millis(500),
            probe_window: Duration::from_millis(2000),
            settle_delay: Duration::from_millis(2000),
            handshake_window: Duration::from_millis(3000),
            write_timeout: Duration::from_millis(100),
        }
    }
}

impl From<&SerialConfig> for LinkTimings {
    fn from(config: &SerialConfig) -> Self {
        Self {
            probe_delay: Duration::from_millis(config.probe_delay_ms),
            probe_window: Duration::from_millis(config.probe_window_ms),
            settle_delay: Duration::from_millis(config.settle_delay_ms),
            handshake_window: Duration::from_millis(config.handshake_window_ms),
            write_timeout: Duration::from_millis(config.write_timeout_ms),
        }
    }
}

/// Link state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    /// READY seen during handshake
    Ready,
    /// Port open, no READY seen
    Unconfirmed,
}

impl LinkState {
    #[must_use]
    pub fn is_connected(self) -> bool {
        matches!(self, LinkState::Ready | LinkState::Unconfirmed)
    }
}

/// Result of a successful connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// The board announced READY.
    Confirmed { baud_rate: u32 },
    /// The port is open but the board never announced READY.
    Unconfirmed {
        baud_rate: u32,
        startup_lines: Vec<String>,
    },
}

impl ConnectOutcome {
    #[must_use]
    pub fn baud_rate(&self) -> u32 {
        match self {
            ConnectOutcome::Confirmed { baud_rate } => *baud_rate,
            ConnectOutcome::Unconfirmed { baud_rate, .. } => *baud_rate,
        }
    }

    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        matches!(self, ConnectOutcome::Confirmed { .. })
    }
}

/// Link diagnostics, copied out for display.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkStats {
    pub state: LinkState,
    pub port: Option<String>,
    pub baud_rate: Option<u32>,
    pub commands_sent: u64,
    pub commands_confirmed: u64,
    pub last_ack: Option<ServoAck>,
    pub last_response: Option<String>,
    pub last_error: Option<String>,
}

impl LinkStats {
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Confirmed share of sent commands, `None` before anything was sent.
    #[must_use]
    pub fn confirmation_ratio(&self) -> Option<f64> {
        (self.commands_sent > 0).then(|| self.commands_confirmed as f64 / self.commands_sent as f64)
    }
}

/// An open connection.
struct Session {
    port: Box<dyn SerialPortIO>,
    lines: LineBuffer,
}

/// Serial connection to the servo microcontroller.
pub struct DeviceLink {
    opener: Arc<dyn PortOpener>,
    timings: LinkTimings,
    session: Option<Session>,
    stats: LinkStats,
}

impl fmt::Debug for DeviceLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceLink")
            .field("timings", &self.timings)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl DeviceLink {
    /// Creates a disconnected link that opens ports through `opener`.
    pub fn new(opener: Arc<dyn PortOpener>, timings: LinkTimings) -> Self {
        Self {
            opener,
            timings,
            session: None,
            stats: LinkStats::default(),
        }
    }

    /// Creates a disconnected link backed by real serial ports.
    pub fn with_serial(timings: LinkTimings) -> Self {
        Self::new(Arc::new(TokioSerialOpener), timings)
    }

    /// Lists the serial ports currently present on the host.
    ///
    /// # Errors
    ///
    /// Returns `Serial` if the host port list cannot be read.
    pub fn available_ports(&self) -> Result<Vec<String>> {
        self.opener
            .available_ports()
            .map_err(|e| ServoRigError::Serial(format!("Failed to list ports: {}", e)))
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.session.is_some() && self.stats.state.is_connected()
    }

    #[must_use]
    pub fn state(&self) -> LinkState {
        self.stats.state
    }

    #[must_use]
    pub fn stats(&self) -> LinkStats {
        self.stats.clone()
    }

    /// Detects the baud rate, opens the port and verifies the READY banner.
    ///
    /// Blocks the calling task for up to several seconds: each baud
    /// candidate gets `probe_delay + probe_window`, then the final open
    /// waits `settle_delay + handshake_window`. Do not call from the poll
    /// loop.
    ///
    /// Falls back to `requested_baud` if no candidate answers. A missing
    /// READY on the final open still connects, and reports
    /// [`ConnectOutcome::Unconfirmed`].
    ///
    /// # Errors
    ///
    /// Returns `Serial` if the final open or handshake read fails. The link
    /// is left disconnected.
    pub async fn connect(&mut self, port: &str, requested_baud: u32) -> Result<ConnectOutcome> {
        if self.session.is_some() {
            self.disconnect();
        }

        info!("Connecting to {}...", port);
        self.stats.state = LinkState::Connecting;

        let opener = Arc::clone(&self.opener);
        let connector = Connector {
            opener: opener.as_ref(),
            timings: self.timings,
        };

        let baud_rate = match connector.detect_baud(port).await {
            Some(baud) => {
                info!("Auto-detected baud rate: {}", baud);
                baud
            }
            None => {
                debug!("No baud candidate answered, using {}", requested_baud);
                requested_baud
            }
        };

        match connector.handshake(port, baud_rate).await {
            Ok((session, startup_lines, ready)) => {
                self.session = Some(session);
                self.stats = LinkStats {
                    state: if ready {
                        LinkState::Ready
                    } else {
                        LinkState::Unconfirmed
                    },
                    port: Some(port.to_string()),
                    baud_rate: Some(baud_rate),
                    last_response: startup_lines.last().cloned(),
                    ..LinkStats::default()
                };

                if ready {
                    info!("Device on {} is responding at {} baud", port, baud_rate);
                    Ok(ConnectOutcome::Confirmed { baud_rate })
                } else {
                    warn!(
                        "Device on {} did not send READY, but the connection opened",
                        port
                    );
                    warn!("Servos may be drawing too much power; try disconnecting them and reconnecting");
                    Ok(ConnectOutcome::Unconfirmed {
                        baud_rate,
                        startup_lines,
                    })
                }
            }
            Err(e) => {
                warn!("Connection error: {}", e);
                self.stats = LinkStats {
                    last_error: Some(e.to_string()),
                    ..LinkStats::default()
                };
                Err(e)
            }
        }
    }

    /// Sends one servo command. The angle is clamped to 0-180.
    ///
    /// After writing, any responses that are already buffered are drained;
    /// this never waits for a reply.
    ///
    /// # Errors
    ///
    /// - `NotConnected` if there is no open session
    /// - `InvalidMapping` for a servo id above 15
    /// - `Serial` if the write fails or exceeds the write timeout
    pub async fn send_command(&mut self, servo_id: u8, angle: i32) -> Result<()> {
        if servo_id > MAX_SERVO_ID {
            return Err(ServoRigError::InvalidMapping(format!(
                "servo id {} is out of range (must be 0-{})",
                servo_id, MAX_SERVO_ID
            )));
        }

        let write_timeout = self.timings.write_timeout;
        let session = self.session.as_mut().ok_or(ServoRigError::NotConnected)?;
        let command = encode_servo_command(servo_id, angle);

        let written = timeout(write_timeout, async {
            session.port.write_all(&command).await?;
            session.port.flush().await
        })
        .await;

        // Counted once attempted, whether or not the bytes went out
        self.stats.commands_sent += 1;

        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(self.record_error(format!("Failed to write command: {}", e))),
            Err(_) => {
                return Err(self.record_error(format!(
                    "Command write timed out after {:?}",
                    write_timeout
                )))
            }
        }

        debug!("Sent servo command S{}:{}", servo_id, angle.clamp(0, 180));

        if let Err(e) = self.drain_responses().await {
            debug!("Failed to read responses: {}", e);
        }
        Ok(())
    }

    /// Reads every complete line that is already buffered.
    ///
    /// Each line starting with `OK:` counts as a confirmation. Returns an
    /// empty list when nothing is waiting.
    ///
    /// # Errors
    ///
    /// Returns `Serial` on a device read error (distinct from "no data").
    pub async fn drain_responses(&mut self) -> Result<Vec<String>> {
        let Some(session) = self.session.as_mut() else {
            return Ok(Vec::new());
        };

        let drained = drain_buffered(session).await;
        match drained {
            Ok(lines) => {
                for line in &lines {
                    match classify(line) {
                        Response::Confirmation(ack) => {
                            self.stats.commands_confirmed += 1;
                            if ack.is_some() {
                                self.stats.last_ack = ack;
                            }
                        }
                        Response::Ready => debug!("Device re-announced READY: {}", line),
                        Response::Info => debug!("Device: {}", line),
                    }
                }
                if let Some(last) = lines.last() {
                    self.stats.last_response = Some(last.clone());
                }
                Ok(lines)
            }
            Err(e) => Err(self.record_error(format!("Failed to read responses: {}", e))),
        }
    }

    /// Closes the port. Safe to call when already disconnected.
    pub fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            drop(session);
            if let Some(port) = &self.stats.port {
                info!("Disconnected from {}", port);
            }
        }
        self.stats.state = LinkState::Disconnected;
    }

    fn record_error(&mut self, message: String) -> ServoRigError {
        self.stats.last_error = Some(message.clone());
        ServoRigError::Serial(message)
    }
}

/// Runs the probe and handshake sequence against one opener.
///
/// Borrows only `Sync` state so the connect future stays `Send`.
struct Connector<'a> {
    opener: &'a dyn PortOpener,
    timings: LinkTimings,
}

impl Connector<'_> {
    /// Tries each baud candidate in order. Returns the first one that
    /// produces a READY line within the probe window.
    async fn detect_baud(&self, port: &str) -> Option<u32> {
        for baud in BAUD_CANDIDATES {
            debug!("Probing {} at {} baud", port, baud);
            match self.probe(port, baud).await {
                Ok(true) => return Some(baud),
                Ok(false) => debug!("No READY from {} at {} baud", port, baud),
                Err(e) => debug!("Probe of {} at {} baud failed: {}", port, baud, e),
            }
        }
        None
    }

    async fn probe(&self, port: &str, baud: u32) -> std::io::Result<bool> {
        let mut probe_port = self.opener.open(port, baud)?;
        sleep(self.timings.probe_delay).await;

        let mut lines = LineBuffer::new();
        let (_, ready) = read_lines_for(
            probe_port.as_mut(),
            &mut lines,
            self.timings.probe_window,
        )
        .await?;
        Ok(ready)
    }

    /// Final open: settle, discard the reset noise, collect the startup
    /// banner.
    async fn handshake(&self, port: &str, baud: u32) -> Result<(Session, Vec<String>, bool)> {
        let mut serial = self
            .opener
            .open(port, baud)
            .map_err(|e| ServoRigError::Serial(format!("Failed to open {}: {}", port, e)))?;

        sleep(self.timings.settle_delay).await;
        serial
            .clear_input()
            .map_err(|e| ServoRigError::Serial(format!("Failed to clear {}: {}", port, e)))?;

        let mut lines = LineBuffer::new();
        let (startup_lines, ready) =
            read_lines_for(serial.as_mut(), &mut lines, self.timings.handshake_window)
                .await
                .map_err(|e| ServoRigError::Serial(format!("Failed to read {}: {}", port, e)))?;

        for line in &startup_lines {
            info!("Device: {}", line);
        }

        Ok((
            Session {
                port: serial,
                lines,
            },
            startup_lines,
            ready,
        ))
    }
}

/// Reads whatever is buffered right now, returning the complete lines.
async fn drain_buffered(session: &mut Session) -> std::io::Result<Vec<String>> {
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let available = session.port.bytes_to_read()? as usize;
        if available == 0 {
            break;
        }
        let n = session.port.read(&mut chunk[..available.min(READ_CHUNK)]).await?;
        if n == 0 {
            break;
        }
        session.lines.extend(&chunk[..n]);
    }
    Ok(session.lines.drain_lines())
}

/// Collects non-empty lines for up to `window`, stopping early once a READY
/// line arrives. Returns the lines and whether READY was seen.
///
/// Lines after READY stay in `lines` for the session to pick up.
async fn read_lines_for(
    port: &mut dyn SerialPortIO,
    lines: &mut LineBuffer,
    window: Duration,
) -> std::io::Result<(Vec<String>, bool)> {
    let deadline = Instant::now() + window;
    let mut collected = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];

    while Instant::now() < deadline {
        let available = port.bytes_to_read()? as usize;
        if available == 0 {
            sleep(HANDSHAKE_POLL).await;
            continue;
        }

        let n = port.read(&mut chunk[..available.min(READ_CHUNK)]).await?;
        lines.extend(&chunk[..n]);

        while let Some(line) = lines.next_line() {
            if line.is_empty() {
                continue;
            }
            let ready = matches!(classify(&line), Response::Ready);
            collected.push(line);
            if ready {
                return Ok((collected, true));
            }
        }
    }

    Ok((collected, false))
}

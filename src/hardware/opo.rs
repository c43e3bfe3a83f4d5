//! LaserVision OPO/A tuning stage driver.
//!
//! Protocol Overview:
//! - Transport: persistent TCP connection (default `localhost:1315`)
//! - Format: ASCII command words, space-padded, CRLF-terminated
//! - Commands: `TELLWL`, `TELLSTAT`, `SETWL`, `GOTO <nm>`, `SETSPD <nm/s>`,
//!   `STOP ALL`, `SCOFF`
//! - Responses: CRLF-delimited, possibly batched, and not correlated to
//!   requests. Each line is classified by shape: hex (`0x...`) is motor
//!   status, a small number is a command error code, anything else numeric
//!   is the stage's current wavelength.
//!
//! Because responses carry no correlation token, at most one
//! wavelength-query wait may be outstanding at a time; the GoTo controller
//! is the only caller and respects this.
//!
//! Connection failures are reported through the status message channel and
//! leave the link disconnected; motion and query operations degrade to
//! null results rather than failing the process.

use crate::alert::Alert;
use crate::config::{OpoSettings, TimingSettings};
use crate::error::{OpoDaqError, OpoResult};
use crate::messages::Messenger;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Offsets larger than this (nm) are implausible and discarded: the stage's
/// own wavelength estimate is never that far off, so a bigger discrepancy
/// means the measurement itself went wrong.
const OFFSET_PLAUSIBILITY_LIMIT_NM: f64 = 1.5;

/// Default motor speed in nm/s, restored after every GoTo.
pub const DEFAULT_SPEED_NM_PER_SEC: f64 = 1.0;

const CMD_GET_WAVELENGTH: &str = "TELLWL";
const CMD_GET_MOTOR_STATUS: &str = "TELLSTAT";
const CMD_WAVELENGTH_MODE: &str = "SETWL";
const CMD_SCANNING_OFF: &str = "SCOFF";

/// Fixed error strings for the stage's numeric response codes.
const OPO_ERRORS: [&str; 8] = [
    "Successfully Executed Command",
    "Invalid Command",
    "Required Window Not Open",
    "Specified Value Is Out Of Range",
    "Specified Velocity Is Out Of Safe Values",
    "A GoTo Operation Is Already Active",
    "Unable To Change Settings While Motor Movement Active",
    "No USB Voltmeter Detected",
];

/// Human-readable message for a stage error code.
pub fn error_message(code: u8) -> &'static str {
    OPO_ERRORS
        .get(code as usize)
        .copied()
        .unwrap_or("Unknown Error")
}

/// Whether the stage's motors are in motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorStatus {
    Moving,
    Stopped,
}

/// One classified response line from the tuning stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpoResponse {
    /// Hex status word (`0x0` = stopped, anything else = moving).
    MotorStatus(MotorStatus),
    /// Command acknowledgement (0 = success, 1-7 = error).
    ErrorCode(u8),
    /// The stage's current wavelength in nm.
    Wavelength(f64),
    /// Anything that fits none of the above; ignored.
    Unrecognized,
}

/// Classify one CRLF-stripped response line by shape.
///
/// Wavelengths are always far above 10 nm, which is what makes the bare
/// "number < 10 means error code" rule safe.
pub fn classify_line(line: &str) -> OpoResponse {
    let line = line.trim();
    if let Some(hex) = line.strip_prefix("0x") {
        return match u64::from_str_radix(hex, 16) {
            Ok(0) => OpoResponse::MotorStatus(MotorStatus::Stopped),
            _ => OpoResponse::MotorStatus(MotorStatus::Moving),
        };
    }
    match line.parse::<f64>() {
        Ok(value) if value < 10.0 => OpoResponse::ErrorCode(value as u8),
        Ok(value) => OpoResponse::Wavelength(value),
        Err(_) => OpoResponse::Unrecognized,
    }
}

/// Alerts published by the tuning stage link.
#[derive(Debug, Default)]
pub struct OpoAlerts {
    /// Connection established.
    pub connection_open: Alert<()>,
    /// Connection closed or lost.
    pub connection_close: Alert<()>,
    /// Motor movement commanded.
    pub motors_start: Alert<()>,
    /// Motors observed stopped after moving.
    pub motors_stop: Alert<()>,
    /// The stage reported its current wavelength (nm).
    pub wavelength: Alert<f64>,
}

/// State shared with the background reader task.
struct OpoShared {
    connected: AtomicBool,
    status: watch::Sender<MotorStatus>,
    current_wavelength: Mutex<f64>,
    alerts: OpoAlerts,
    messenger: Messenger,
}

impl OpoShared {
    fn handle_line(&self, line: &str) {
        match classify_line(line) {
            OpoResponse::MotorStatus(status) => {
                let previous = self.status.send_replace(status);
                if status == MotorStatus::Stopped && previous == MotorStatus::Moving {
                    self.alerts.motors_stop.emit(());
                }
            }
            OpoResponse::ErrorCode(0) => {}
            OpoResponse::ErrorCode(code) => {
                self.messenger
                    .warning(format!("OPO Error #{code}: {}", error_message(code)));
            }
            OpoResponse::Wavelength(nm) => {
                *guard(&self.current_wavelength) = nm;
                self.alerts.wavelength.emit(nm);
            }
            OpoResponse::Unrecognized => {
                tracing::debug!(line, "unrecognized tuning stage response");
            }
        }
    }
}

/// Wire-protocol client for the OPO/A tuning stage.
///
/// Owns the socket; a background task parses the asynchronous response
/// stream and publishes updates through [`OpoAlerts`]. All motion commands
/// are fire-and-forget at the wire level; completion is observed by polling
/// [`wait_for_motors_stopped`](Self::wait_for_motors_stopped).
pub struct OpoLink {
    settings: OpoSettings,
    motor_poll: Duration,
    messenger: Messenger,
    shared: Arc<OpoShared>,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    laser_offsets: Mutex<Vec<f64>>,
}

impl OpoLink {
    /// Create a disconnected link. Call [`connect`](Self::connect) to open
    /// the socket.
    pub fn new(settings: OpoSettings, timing: &TimingSettings, messenger: Messenger) -> Self {
        let (status, _) = watch::channel(MotorStatus::Stopped);
        Self {
            shared: Arc::new(OpoShared {
                connected: AtomicBool::new(false),
                status,
                current_wavelength: Mutex::new(0.0),
                alerts: OpoAlerts::default(),
                messenger: messenger.clone(),
            }),
            settings,
            motor_poll: timing.motor_poll_interval,
            messenger,
            writer: tokio::sync::Mutex::new(None),
            reader_task: Mutex::new(None),
            laser_offsets: Mutex::new(Vec::new()),
        }
    }

    /// Alerts published by this link.
    pub fn alerts(&self) -> &OpoAlerts {
        &self.shared.alerts
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Current motor status as last observed.
    pub fn motor_status(&self) -> MotorStatus {
        *self.shared.status.borrow()
    }

    pub fn is_moving(&self) -> bool {
        self.motor_status() == MotorStatus::Moving
    }

    /// The stage's last reported wavelength (nm), 0 when never reported.
    pub fn current_wavelength(&self) -> f64 {
        *guard(&self.shared.current_wavelength)
    }

    /// Establish the connection. Idempotent; failure is reported and leaves
    /// the link disconnected.
    pub async fn connect(&self) {
        if self.is_connected() {
            return;
        }
        let address = (self.settings.host.as_str(), self.settings.port);
        match TcpStream::connect(address).await {
            Ok(stream) => {
                let (read_half, write_half) = stream.into_split();
                *self.writer.lock().await = Some(write_half);
                self.shared.connected.store(true, Ordering::SeqCst);
                let task = tokio::spawn(read_loop(Arc::clone(&self.shared), read_half));
                *guard(&self.reader_task) = Some(task);
                self.shared.alerts.connection_open.emit(());
                self.messenger.update("Established connection with OPO/A");
            }
            Err(err) => {
                self.messenger
                    .error(format!("Could not connect to OPO/A: {err}"));
            }
        }
    }

    /// Close the connection. Idempotent.
    pub async fn close(&self) {
        if !self.is_connected() {
            return;
        }
        *self.writer.lock().await = None;
        if let Some(task) = guard(&self.reader_task).take() {
            task.abort();
        }
        self.shared.alerts.wavelength.clear_once();
        self.shared.status.send_replace(MotorStatus::Stopped);
        if self.shared.connected.swap(false, Ordering::SeqCst) {
            self.shared.alerts.connection_close.emit(());
            self.messenger.update("Connection with OPO/A closed");
        }
    }

    /// Ask the stage for its internal wavelength and wait for the answer.
    ///
    /// Returns 0 when disconnected or when the connection drops before a
    /// response arrives. Only one wavelength wait may be outstanding at a
    /// time, since any wavelength response resolves the pending wait.
    pub async fn get_wavelength(&self) -> f64 {
        if !self.is_connected() {
            // Report the null wavelength the way a response would arrive.
            self.shared.alerts.wavelength.emit(0.0);
            return 0.0;
        }
        let pending = self.shared.alerts.wavelength.once();
        if self.send_command(CMD_GET_WAVELENGTH).await.is_err() {
            return 0.0;
        }
        pending.await.unwrap_or(0.0)
    }

    /// Fire a motor status query; the answer arrives via the reader task.
    pub async fn request_motor_status(&self) {
        if let Err(err) = self.send_command(CMD_GET_MOTOR_STATUS).await {
            tracing::debug!(%err, "motor status query failed");
        }
    }

    /// Command the stage to a tunable (nIR) wavelength.
    ///
    /// Rejects without sending when the link is down or the target is
    /// outside the configured window. On success the motor status is Moving
    /// and the caller is expected to await
    /// [`wait_for_motors_stopped`](Self::wait_for_motors_stopped); this call
    /// itself does not block until arrival.
    pub async fn goto_nir(&self, wavelength: f64) -> OpoResult<()> {
        if !self.is_connected() {
            self.messenger
                .error("Cannot go to requested nIR wavelength, OPO/A is not connected");
            return Err(OpoDaqError::OpoNotConnected);
        }
        let (lower, upper) = self.wavelength_window();
        if wavelength < lower || wavelength > upper {
            self.messenger.error(format!(
                "nIR wavelength {wavelength:.3}nm is out of set bounds of {lower} - {upper}"
            ));
            return Err(OpoDaqError::WavelengthOutOfBounds {
                requested: wavelength,
                lower,
                upper,
            });
        }
        self.shared.status.send_replace(MotorStatus::Moving);
        self.shared.alerts.motors_start.emit(());
        if let Err(err) = self.send_command(&format!("GOTO {wavelength:.3}")).await {
            self.shared.status.send_replace(MotorStatus::Stopped);
            return Err(err);
        }
        Ok(())
    }

    /// The commandable wavelength window for the installed crystal set.
    pub fn wavelength_window(&self) -> (f64, f64) {
        if self.settings.in_fir_mode {
            (
                self.settings.fir_lower_wavelength_bound,
                self.settings.fir_upper_wavelength_bound,
            )
        } else {
            (
                self.settings.lower_wavelength_bound,
                self.settings.upper_wavelength_bound,
            )
        }
    }

    /// Poll motor status until the motors report stopped.
    ///
    /// Suspends between polls; returns immediately if the motors are not
    /// moving. [`stop_movement`](Self::stop_movement) also releases this
    /// wait, since it forces the status to Stopped.
    pub async fn wait_for_motors_stopped(&self) {
        while self.is_moving() && self.is_connected() {
            self.request_motor_status().await;
            tokio::time::sleep(self.motor_poll).await;
        }
    }

    /// Set motor speed in nm/s (`None` restores the default of 1 nm/s).
    pub async fn set_speed(&self, speed: Option<f64>) {
        let speed = speed.unwrap_or(DEFAULT_SPEED_NM_PER_SEC);
        if let Err(err) = self.send_command(&format!("SETSPD {speed:.3}")).await {
            tracing::debug!(%err, "speed change failed");
        }
    }

    /// Put the stage into wavelength mode (as opposed to wavenumber mode).
    pub async fn wavelength_mode(&self) {
        if let Err(err) = self.send_command(CMD_WAVELENGTH_MODE).await {
            tracing::debug!(%err, "wavelength mode change failed");
        }
    }

    /// Halt any in-progress motion.
    ///
    /// `SCOFF` and `STOP ALL` are interchangeable for halting a scan; the
    /// vendor recommends `SCOFF`. The status is forced to Stopped so any
    /// pending motor wait releases immediately.
    pub async fn stop_movement(&self) {
        if let Err(err) = self.send_command(CMD_SCANNING_OFF).await {
            tracing::debug!(%err, "stop command failed");
        }
        self.shared.status.send_replace(MotorStatus::Stopped);
    }

    /// Record one (measured − reported) wavelength offset.
    pub fn record_offset(&self, offset: f64) {
        if offset.abs() < OFFSET_PLAUSIBILITY_LIMIT_NM {
            guard(&self.laser_offsets).push(offset);
        }
    }

    /// Mean of all recorded offsets (nm); 0 when none recorded.
    pub fn laser_offset(&self) -> f64 {
        let offsets = guard(&self.laser_offsets);
        if offsets.is_empty() {
            return 0.0;
        }
        let mean = offsets.iter().sum::<f64>() / offsets.len() as f64;
        if mean.is_finite() {
            mean
        } else {
            0.0
        }
    }

    /// Most recently recorded offset (nm); 0 when none recorded.
    pub fn last_offset(&self) -> f64 {
        guard(&self.laser_offsets).last().copied().unwrap_or(0.0)
    }

    async fn send_command(&self, command: &str) -> OpoResult<()> {
        let mut writer = self.writer.lock().await;
        let Some(stream) = writer.as_mut() else {
            return Err(OpoDaqError::OpoNotConnected);
        };
        // Space-padded command word, CRLF line terminator.
        stream.write_all(format!("{command} \r\n").as_bytes()).await?;
        Ok(())
    }
}

/// Parse the asynchronous response stream until the connection ends.
async fn read_loop(shared: Arc<OpoShared>, read_half: OwnedReadHalf) {
    let mut lines = BufReader::new(read_half).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if !line.is_empty() {
                    shared.handle_line(line);
                }
            }
            Ok(None) => break,
            Err(err) => {
                tracing::debug!(%err, "tuning stage read failed");
                break;
            }
        }
    }
    // Pending wavelength waits can never resolve now; release them so
    // callers observe the null wavelength instead of hanging, and force
    // the motor status idle so motor waits release too.
    shared.alerts.wavelength.clear_once();
    shared.status.send_replace(MotorStatus::Stopped);
    if shared.connected.swap(false, Ordering::SeqCst) {
        shared.alerts.connection_close.emit(());
        shared.messenger.error("OPO/A connection lost");
    }
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

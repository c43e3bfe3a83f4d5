//! Mock Hardware Implementations
//!
//! Simulated hardware for testing and offline development without the
//! physical instruments. All mocks use async-safe operations
//! (tokio::time::sleep, never std::thread::sleep).
//!
//! # Available Mocks
//!
//! - `MockWavemeter` - simulated wavemeter with configurable noise and
//!   scriptable failure modes
//! - `OpoSimulator` - TCP server speaking the tuning stage protocol with
//!   realistic motion timing
//!
//! Wiring `MockWavemeter::shared` to `OpoSimulator::wavelength_handle`
//! makes the wavemeter track the simulated stage, which is enough to
//! exercise the full GoTo convergence loop end to end.

use crate::hardware::capabilities::Wavemeter;
use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::Rng;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::task::JoinHandle;

// =============================================================================
// MockWavemeter - Simulated Wavemeter
// =============================================================================

/// Mock wavemeter reading from a fixed or shared wavelength source.
///
/// Samples return `source + instrument_offset ± noise/2`. A forced error
/// code makes every sample return that code instead, for exercising the
/// failure-count paths.
pub struct MockWavemeter {
    source: Arc<Mutex<f64>>,
    instrument_offset: f64,
    noise: f64,
    forced_error: Mutex<Option<f64>>,
    measuring: AtomicBool,
    samples_taken: AtomicU64,
}

impl MockWavemeter {
    /// Wavemeter reading a fixed base wavelength (nm) with peak-to-peak
    /// noise (nm).
    pub fn fixed(wavelength: f64, noise: f64) -> Self {
        Self::shared(Arc::new(Mutex::new(wavelength)), noise)
    }

    /// Wavemeter tracking a shared wavelength source, e.g. an
    /// [`OpoSimulator`]'s wavelength handle.
    pub fn shared(source: Arc<Mutex<f64>>, noise: f64) -> Self {
        Self {
            source,
            instrument_offset: 0.0,
            noise,
            forced_error: Mutex::new(None),
            measuring: AtomicBool::new(false),
            samples_taken: AtomicU64::new(0),
        }
    }

    /// Add a constant offset (nm) between the source and what the
    /// wavemeter reads, simulating a miscalibrated tuning stage.
    pub fn with_instrument_offset(mut self, offset: f64) -> Self {
        self.instrument_offset = offset;
        self
    }

    /// Change the base wavelength of a fixed-source wavemeter.
    pub fn set_wavelength(&self, wavelength: f64) {
        *guard(&self.source) = wavelength;
    }

    /// Make every subsequent sample return a device error code (≤ 0).
    pub fn fail_with(&self, code: f64) {
        *guard(&self.forced_error) = Some(code);
    }

    /// Clear a forced failure.
    pub fn clear_fault(&self) {
        *guard(&self.forced_error) = None;
    }

    /// Total samples requested so far.
    pub fn samples_taken(&self) -> u64 {
        self.samples_taken.load(Ordering::SeqCst)
    }

    /// Whether device-side collection is active.
    pub fn is_measuring(&self) -> bool {
        self.measuring.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Wavemeter for MockWavemeter {
    async fn start_measurement(&self) -> Result<()> {
        self.measuring.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_measurement(&self) -> Result<()> {
        self.measuring.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn sample(&self, _channel: i32) -> f64 {
        self.samples_taken.fetch_add(1, Ordering::SeqCst);
        if let Some(code) = *guard(&self.forced_error) {
            return code;
        }
        let base = *guard(&self.source) + self.instrument_offset;
        let jitter = (rand::thread_rng().gen::<f64>() - 0.5) * self.noise;
        base + jitter
    }
}

// =============================================================================
// OpoSimulator - Simulated Tuning Stage
// =============================================================================

/// Simulated motion: fixed settle overhead before the move completes.
const DEFAULT_SETTLE_TIME: Duration = Duration::from_millis(200);

/// Wavelength window the simulated stage accepts, matching the real
/// stage's motor range.
const SIM_LOWER_BOUND_NM: f64 = 710.0;
const SIM_UPPER_BOUND_NM: f64 = 880.0;

struct SimState {
    wavelength: Arc<Mutex<f64>>,
    speed: Mutex<f64>,
    speed_override: Mutex<Option<f64>>,
    settle_time: Mutex<Duration>,
    moving: AtomicBool,
}

/// TCP server that acts like the OPO/A controller, allowing experiment
/// logic to run without a connection to the real stage.
///
/// Accepts any number of connections; every connection speaks the same
/// command set against one shared motor state.
pub struct OpoSimulator {
    addr: SocketAddr,
    state: Arc<SimState>,
    accept_task: JoinHandle<()>,
}

impl OpoSimulator {
    /// Bind the simulator and start serving.
    ///
    /// Use `"127.0.0.1:0"` in tests to get an ephemeral port; read it back
    /// with [`addr`](Self::addr).
    pub async fn bind(addr: impl ToSocketAddrs, initial_wavelength: f64) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .context("Failed to bind OPO simulator")?;
        let addr = listener
            .local_addr()
            .context("Failed to read simulator address")?;
        let state = Arc::new(SimState {
            wavelength: Arc::new(Mutex::new(initial_wavelength)),
            speed: Mutex::new(1.0),
            speed_override: Mutex::new(None),
            settle_time: Mutex::new(DEFAULT_SETTLE_TIME),
            moving: AtomicBool::new(false),
        });
        let accept_task = tokio::spawn(serve(listener, Arc::clone(&state)));
        Ok(Self {
            addr,
            state,
            accept_task,
        })
    }

    /// Address the simulator is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Shared handle to the simulated wavelength, for wiring a
    /// [`MockWavemeter`] that tracks the stage.
    pub fn wavelength_handle(&self) -> Arc<Mutex<f64>> {
        Arc::clone(&self.state.wavelength)
    }

    /// Current simulated wavelength (nm).
    pub fn wavelength(&self) -> f64 {
        *guard(&self.state.wavelength)
    }

    /// Whether a simulated move is in progress.
    pub fn is_moving(&self) -> bool {
        self.state.moving.load(Ordering::SeqCst)
    }

    /// Ignore `SETSPD` requests and always move at this speed instead.
    /// Speeds up GoTo runs that would otherwise crawl at 0.05 nm/s.
    pub fn set_speed_override(&self, speed: Option<f64>) {
        *guard(&self.state.speed_override) = speed;
    }

    /// Fixed overhead added to every simulated move.
    pub fn set_settle_time(&self, settle: Duration) {
        *guard(&self.state.settle_time) = settle;
    }
}

impl Drop for OpoSimulator {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve(listener: TcpListener, state: Arc<SimState>) {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                tokio::spawn(handle_client(stream, Arc::clone(&state)));
            }
            Err(err) => {
                tracing::debug!(%err, "simulator accept failed");
                break;
            }
        }
    }
}

async fn handle_client(stream: TcpStream, state: Arc<SimState>) {
    let (read_half, write_half) = stream.into_split();
    let mut writer = write_half;
    let mut lines = BufReader::new(read_half).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let mut tokens = line.split_whitespace();
        while let Some(command) = tokens.next() {
            match command {
                "GOTO" => {
                    let reply = go_to(&state, tokens.next());
                    send(&mut writer, &reply).await;
                }
                "SETSPD" => {
                    let reply = set_speed(&state, tokens.next());
                    send(&mut writer, &reply).await;
                }
                "TELLWL" => {
                    let wavelength = *guard(&state.wavelength);
                    send(&mut writer, &format!("{wavelength:.5}")).await;
                }
                "TELLSTAT" => {
                    let status = if state.moving.load(Ordering::SeqCst) {
                        "0x80085"
                    } else {
                        "0x0"
                    };
                    send(&mut writer, status).await;
                }
                "SETWL" => {
                    // Wavelength mode switch; nothing to simulate.
                    send(&mut writer, "0").await;
                }
                "STOP" => {
                    let _ = tokens.next(); // consume "ALL"
                    state.moving.store(false, Ordering::SeqCst);
                    send(&mut writer, "0").await;
                }
                "SCOFF" => {
                    state.moving.store(false, Ordering::SeqCst);
                    send(&mut writer, "0").await;
                }
                _ => {
                    send(&mut writer, "1").await;
                }
            }
        }
    }
}

fn go_to(state: &Arc<SimState>, value: Option<&str>) -> String {
    let Some(target) = value.and_then(|v| v.parse::<f64>().ok()) else {
        return "1".to_string();
    };
    if !(SIM_LOWER_BOUND_NM..=SIM_UPPER_BOUND_NM).contains(&target) {
        return "3".to_string();
    }
    if state.moving.load(Ordering::SeqCst) {
        return "5".to_string();
    }
    spawn_motion(Arc::clone(state), target);
    "0".to_string()
}

fn set_speed(state: &SimState, value: Option<&str>) -> String {
    let Some(speed) = value.and_then(|v| v.parse::<f64>().ok()) else {
        return "1".to_string();
    };
    if !(0.00001..=5.0).contains(&speed) {
        return "4".to_string();
    }
    *guard(&state.speed) = speed;
    "0".to_string()
}

/// Pretend the motors are moving: after a speed-dependent delay the stage
/// lands exactly on the target.
fn spawn_motion(state: Arc<SimState>, target: f64) {
    state.moving.store(true, Ordering::SeqCst);
    tokio::spawn(async move {
        let current = *guard(&state.wavelength);
        let speed = (*guard(&state.speed_override)).unwrap_or(*guard(&state.speed));
        let settle = *guard(&state.settle_time);
        let travel = Duration::from_secs_f64((target - current).abs() / speed);
        tokio::time::sleep(settle + travel).await;
        // A stop command may have landed while we were "moving".
        if state.moving.swap(false, Ordering::SeqCst) {
            *guard(&state.wavelength) = target;
        }
    });
}

async fn send(writer: &mut OwnedWriteHalf, message: &str) {
    if let Err(err) = writer.write_all(format!("{message}\r\n").as_bytes()).await {
        tracing::debug!(%err, "simulator write failed");
    }
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn raw_client(sim: &OpoSimulator) -> (tokio::net::tcp::OwnedReadHalf, OwnedWriteHalf) {
        TcpStream::connect(sim.addr()).await.unwrap().into_split()
    }

    async fn roundtrip(
        reader: &mut tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>,
        writer: &mut OwnedWriteHalf,
        command: &str,
    ) -> String {
        writer
            .write_all(format!("{command} \r\n").as_bytes())
            .await
            .unwrap();
        reader.next_line().await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn simulator_answers_wavelength_and_status_queries() {
        let sim = OpoSimulator::bind("127.0.0.1:0", 750.0).await.unwrap();
        let (read_half, mut writer) = raw_client(&sim).await;
        let mut reader = BufReader::new(read_half).lines();

        assert_eq!(
            roundtrip(&mut reader, &mut writer, "TELLWL").await,
            "750.00000"
        );
        assert_eq!(roundtrip(&mut reader, &mut writer, "TELLSTAT").await, "0x0");
        assert_eq!(roundtrip(&mut reader, &mut writer, "SETWL").await, "0");
        assert_eq!(roundtrip(&mut reader, &mut writer, "BOGUS").await, "1");
    }

    #[tokio::test]
    async fn simulated_move_lands_on_target() {
        let sim = OpoSimulator::bind("127.0.0.1:0", 750.0).await.unwrap();
        sim.set_settle_time(Duration::from_millis(10));
        sim.set_speed_override(Some(1000.0));
        let (read_half, mut writer) = raw_client(&sim).await;
        let mut reader = BufReader::new(read_half).lines();

        assert_eq!(
            roundtrip(&mut reader, &mut writer, "GOTO 760.000").await,
            "0"
        );
        assert!(sim.is_moving());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!sim.is_moving());
        assert!((sim.wavelength() - 760.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn out_of_range_target_is_rejected() {
        let sim = OpoSimulator::bind("127.0.0.1:0", 750.0).await.unwrap();
        let (read_half, mut writer) = raw_client(&sim).await;
        let mut reader = BufReader::new(read_half).lines();
        assert_eq!(
            roundtrip(&mut reader, &mut writer, "GOTO 900.000").await,
            "3"
        );
        assert_eq!(
            roundtrip(&mut reader, &mut writer, "SETSPD 9.000").await,
            "4"
        );
    }

    #[tokio::test]
    async fn mock_wavemeter_tracks_its_source() {
        let wavemeter = MockWavemeter::fixed(769.23, 0.0).with_instrument_offset(0.05);
        assert!((wavemeter.sample(1).await - 769.28).abs() < 1e-9);
        wavemeter.set_wavelength(770.0);
        assert!((wavemeter.sample(1).await - 770.05).abs() < 1e-9);
        assert_eq!(wavemeter.samples_taken(), 2);
    }

    #[tokio::test]
    async fn forced_fault_returns_the_error_code() {
        let wavemeter = MockWavemeter::fixed(769.23, 0.0);
        wavemeter.fail_with(-6.0);
        assert_eq!(wavemeter.sample(1).await, -6.0);
        wavemeter.clear_fault();
        assert!(wavemeter.sample(1).await > 0.0);
    }
}

//! Wavemeter measurement loop.
//!
//! Bridges a [`Wavemeter`](crate::hardware::capabilities::Wavemeter) device
//! to the statistics layer: repeatedly samples one channel, paced to the
//! laser pulse period, until a full collection is gathered or a failure
//! threshold trips. Device error codes and samples too far from the
//! expected wavelength are counted but never recorded; exceeding either
//! budget aborts the measurement with a reported, non-fatal error.
//!
//! One link instance exists per laser channel (excitation and detachment);
//! only one measurement loop should run per physical device at a time.

use crate::alert::Alert;
use crate::config::{TimingSettings, WavemeterSettings};
use crate::error::OpoDaqError;
use crate::hardware::capabilities::{Wavemeter, CHANNEL_UNAVAILABLE};
use crate::measurement::WavemeterMeasurement;
use crate::messages::Messenger;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// State of the measurement loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasureState {
    /// A measurement is in progress.
    Running,
    /// A measurement is in progress but held.
    Paused,
    /// No measurement is taking place.
    Stopped,
}

/// Alerts published by a wavemeter link.
#[derive(Debug, Default)]
pub struct WavemeterAlerts {
    /// A measurement started.
    pub start: Alert<()>,
    /// A measurement finished (complete, failed, or canceled); carries a
    /// snapshot of whatever was collected.
    pub stop: Alert<WavemeterMeasurement>,
    /// The in-progress measurement was paused.
    pub pause: Alert<()>,
    /// The paused measurement resumed.
    pub resume: Alert<()>,
    /// A complete measurement's statistics are available.
    pub measurement: Alert<WavemeterMeasurement>,
}

/// Async bridge between a wavemeter device and one laser channel.
pub struct WavemeterLink {
    name: String,
    device: Arc<dyn Wavemeter>,
    settings: WavemeterSettings,
    channel: i32,
    sample_period: Duration,
    state: Mutex<MeasureState>,
    pause: AtomicBool,
    cancel: AtomicBool,
    last: Mutex<WavemeterMeasurement>,
    alerts: WavemeterAlerts,
    messenger: Messenger,
}

impl WavemeterLink {
    /// Create a link for one laser channel.
    ///
    /// `name` labels status messages (e.g. `"excitation"`); `channel` is the
    /// device channel this laser is patched into, −1 when not configured.
    pub fn new(
        name: impl Into<String>,
        device: Arc<dyn Wavemeter>,
        settings: WavemeterSettings,
        channel: i32,
        timing: &TimingSettings,
        messenger: Messenger,
    ) -> Self {
        Self {
            name: name.into(),
            device,
            settings,
            channel,
            sample_period: timing.sample_period,
            state: Mutex::new(MeasureState::Stopped),
            pause: AtomicBool::new(false),
            cancel: AtomicBool::new(false),
            last: Mutex::new(WavemeterMeasurement::new()),
            alerts: WavemeterAlerts::default(),
            messenger,
        }
    }

    /// Alerts published by this link.
    pub fn alerts(&self) -> &WavemeterAlerts {
        &self.alerts
    }

    /// The configured device channel (−1 = not configured).
    pub fn channel(&self) -> i32 {
        self.channel
    }

    pub fn state(&self) -> MeasureState {
        *guard(&self.state)
    }

    /// Snapshot of the most recently completed measurement.
    pub fn last_measurement(&self) -> WavemeterMeasurement {
        guard(&self.last).clone()
    }

    /// Hold the in-progress measurement. No-op unless one is running.
    pub fn pause_measurement(&self) {
        if self.state() != MeasureState::Running {
            return;
        }
        self.pause.store(true, Ordering::SeqCst);
        *guard(&self.state) = MeasureState::Paused;
        self.alerts.pause.emit(());
    }

    /// Resume a paused measurement. No-op unless paused.
    pub fn resume_measurement(&self) {
        if self.state() != MeasureState::Paused {
            return;
        }
        self.pause.store(false, Ordering::SeqCst);
        *guard(&self.state) = MeasureState::Running;
        self.alerts.resume.emit(());
    }

    /// Cancel the in-progress measurement (running or paused).
    ///
    /// The loop observes the flag at its next pacing tick and returns the
    /// partial measurement.
    pub fn cancel_measurement(&self) {
        if self.state() == MeasureState::Stopped {
            return;
        }
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Measure the wavelength for this channel.
    ///
    /// Samples until the collection is full, pacing each read to the laser
    /// pulse period. When `expected_wavelength` is given, samples outside
    /// the configured range around it are rejected as bad. Returns whatever
    /// was collected; the measurement only carries statistics when the full
    /// collection was gathered.
    pub async fn measure(&self, expected_wavelength: Option<f64>) -> WavemeterMeasurement {
        let mut measurement = WavemeterMeasurement::new();

        if self.channel == -1 {
            self.messenger
                .error(OpoDaqError::WavemeterChannelUnset(self.name.clone()).to_string());
            self.finish(&measurement);
            return measurement;
        }

        *guard(&self.state) = MeasureState::Running;
        self.alerts.start.emit(());

        if let Err(err) = self.device.start_measurement().await {
            tracing::warn!(%err, "wavemeter start failed");
        }

        let mut fail_count: u32 = 0;
        let mut bad_measurement_count: u32 = 0;

        while measurement.sample_count() < self.settings.collection_length {
            // Wait for the next laser pulse.
            tokio::time::sleep(self.sample_period).await;

            if self.cancel.load(Ordering::SeqCst) {
                self.stop_device().await;
                self.messenger
                    .update(format!("{} measurement canceled", self.name));
                self.finish(&measurement);
                return measurement;
            }
            if self.pause.load(Ordering::SeqCst) {
                continue;
            }

            let sample = self.device.sample(self.channel).await;
            if sample <= 0.0 {
                if sample == CHANNEL_UNAVAILABLE {
                    tracing::warn!(channel = self.channel, "wavemeter channel unavailable");
                }
                fail_count += 1;
                if fail_count > self.settings.max_fail_count {
                    self.stop_device().await;
                    self.messenger.error(format!(
                        "{} wavelength measurement had {fail_count} failed measurements - canceled",
                        self.name
                    ));
                    self.finish(&measurement);
                    return measurement;
                }
                continue;
            }

            if let Some(expected) = expected_wavelength {
                if (sample - expected).abs() > self.settings.wavelength_range {
                    bad_measurement_count += 1;
                    if bad_measurement_count > self.settings.max_bad_measurements {
                        self.stop_device().await;
                        self.messenger.error(format!(
                            "{} wavelength measurement had {bad_measurement_count} bad measurements - canceled",
                            self.name
                        ));
                        self.finish(&measurement);
                        return measurement;
                    }
                    continue;
                }
            }

            measurement.add(sample);
        }

        self.stop_device().await;
        measurement.finalize(self.settings.minimum_stdev);
        *guard(&self.last) = measurement.clone();
        self.finish(&measurement);
        self.alerts.measurement.emit(measurement.clone());
        measurement
    }

    /// Reset loop state and publish the stop alert with a snapshot.
    fn finish(&self, measurement: &WavemeterMeasurement) {
        *guard(&self.state) = MeasureState::Stopped;
        self.pause.store(false, Ordering::SeqCst);
        self.cancel.store(false, Ordering::SeqCst);
        self.alerts.stop.emit(measurement.clone());
    }

    async fn stop_device(&self) {
        if let Err(err) = self.device.stop_measurement().await {
            tracing::warn!(%err, "wavemeter stop failed");
        }
    }
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

//! IR excitation GoTo controller.
//!
//! The convergence loop that drives the tuning stage to a requested photon
//! energy: convert the energy to a tunable wavelength, command the move,
//! re-measure with the wavemeter, and retry while the achieved energy is
//! outside the acceptance range. The whole loop is pausable and cancelable
//! at every suspension point, and every transition fans out through
//! [`GoToAlerts`] so the scan sequencer can chain image accumulation off
//! GoTo completions.
//!
//! Preconditions: one controller exists per laser channel and at most one
//! `goto_ir` call is active at a time — the Stopped/Running/Paused state
//! machine sequences callers, it is not a lock.

use crate::alert::Alert;
use crate::config::{ExcitationLaserSettings, Settings};
use crate::hardware::opo::OpoLink;
use crate::hardware::wavemeter::WavemeterLink;
use crate::measurement::WavemeterMeasurement;
use crate::messages::Messenger;
use crate::wavelength::{
    CalibrationConstants, EnergyInput, ExcitationMode, ExcitationWavelength,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Moves longer than this (nm) run at the fast speed tier.
const FAST_MOVE_DISTANCE_NM: f64 = 10.0;
/// Moves shorter than this (nm) run at the slow speed tier.
const SLOW_MOVE_DISTANCE_NM: f64 = 1.0;
/// Fast speed tier (nm/s): long moves would otherwise take minutes.
const FAST_MOVE_SPEED: f64 = 3.0;
/// Slow speed tier (nm/s): short moves overshoot at higher speeds.
const SLOW_MOVE_SPEED: f64 = 0.05;

/// Whether a GoTo is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoToState {
    /// GoTo movement in progress.
    Running,
    /// GoTo movement paused.
    Paused,
    /// GoTo movement is not taking place.
    Stopped,
}

/// What the in-progress GoTo is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoToStep {
    /// Wavelength is being measured.
    Measuring,
    /// The stage is moving.
    Moving,
    /// No GoTo activity.
    None,
}

/// Alerts published by the GoTo controller.
#[derive(Debug, Default)]
pub struct GoToAlerts {
    /// A GoTo started.
    pub start: Alert<()>,
    /// A GoTo ran to completion; carries the final stored energy.
    pub stop: Alert<ExcitationWavelength>,
    /// The GoTo was paused.
    pub pause: Alert<()>,
    /// The GoTo resumed.
    pub resume: Alert<()>,
    /// The GoTo was canceled.
    pub cancel: Alert<()>,
    /// The GoTo ended for any reason — completion or cancellation. The
    /// scan sequencer keys off this one.
    pub stop_or_cancel: Alert<()>,
    /// The stored excitation energy changed; carries a snapshot.
    pub energy: Alert<ExcitationWavelength>,
    /// A wavelength measurement finished; carries a snapshot.
    pub measurement: Alert<WavemeterMeasurement>,
}

/// Drives the tuning stage to a requested IR energy and verifies arrival.
pub struct ExcitationGoToController {
    settings: ExcitationLaserSettings,
    constants: CalibrationConstants,
    pause_poll: Duration,
    opo: Arc<OpoLink>,
    wavemeter: Arc<WavemeterLink>,
    stored: Mutex<ExcitationWavelength>,
    status: Mutex<GoToState>,
    step: Mutex<GoToStep>,
    cancel: AtomicBool,
    alerts: GoToAlerts,
    messenger: Messenger,
}

impl ExcitationGoToController {
    /// Build a controller over the given hardware links.
    pub fn new(
        settings: &Settings,
        opo: Arc<OpoLink>,
        wavemeter: Arc<WavemeterLink>,
        messenger: Messenger,
    ) -> Self {
        let constants = CalibrationConstants::new(
            settings.laser.excitation.yag_fundamental,
            settings.laser.detachment.h2_raman_shift,
        );
        Self {
            settings: settings.laser.excitation.clone(),
            constants,
            pause_poll: settings.timing.pause_poll_interval,
            opo,
            wavemeter,
            stored: Mutex::new(ExcitationWavelength::new(constants)),
            status: Mutex::new(GoToState::Stopped),
            step: Mutex::new(GoToStep::None),
            cancel: AtomicBool::new(false),
            alerts: GoToAlerts::default(),
            messenger,
        }
    }

    /// Alerts published by this controller.
    pub fn alerts(&self) -> &GoToAlerts {
        &self.alerts
    }

    pub fn status(&self) -> GoToState {
        *guard(&self.status)
    }

    pub fn step(&self) -> GoToStep {
        *guard(&self.step)
    }

    /// Snapshot of the stored excitation energy.
    pub fn stored_energy(&self) -> ExcitationWavelength {
        guard(&self.stored).clone()
    }

    /// Update the stored tunable wavelength (0 resets to unknown) and fan
    /// out the new energy set.
    pub fn update_nir_wavelength(&self, wavelength: f64) {
        guard(&self.stored).set_wavelength(ExcitationMode::Nir, wavelength);
        self.alerts.energy.emit(self.stored_energy());
    }

    /// Update the stored IR regime and fan out the new energy set.
    pub fn update_mode(&self, mode: Option<ExcitationMode>) {
        guard(&self.stored).set_selected_mode(mode);
        self.alerts.energy.emit(self.stored_energy());
    }

    /// Pause the in-progress GoTo. No-op unless one is running.
    pub fn pause(&self) {
        if self.status() != GoToState::Running {
            return;
        }
        *guard(&self.status) = GoToState::Paused;
        if self.step() == GoToStep::Measuring {
            self.wavemeter.pause_measurement();
        }
        self.alerts.pause.emit(());
    }

    /// Resume a paused GoTo. No-op unless paused.
    pub fn resume(&self) {
        if self.status() != GoToState::Paused {
            return;
        }
        *guard(&self.status) = GoToState::Running;
        self.wavemeter.resume_measurement();
        self.alerts.resume.emit(());
    }

    /// Cancel the in-progress GoTo. No-op when no GoTo is taking place.
    ///
    /// Sets the edge-triggered cancel flag (observed and consumed by the
    /// GoTo task at its next checkpoint) and immediately halts whatever the
    /// current step is doing: an in-flight measurement is canceled, a
    /// moving stage is stopped.
    pub async fn cancel(&self) {
        if self.status() == GoToState::Stopped {
            return;
        }
        self.cancel.store(true, Ordering::SeqCst);
        *guard(&self.status) = GoToState::Stopped;
        match self.step() {
            GoToStep::Measuring => self.wavemeter.cancel_measurement(),
            GoToStep::Moving => self.opo.stop_movement().await,
            GoToStep::None => {}
        }
        *guard(&self.step) = GoToStep::None;
    }

    /// Move the stage to a desired IR energy (cm⁻¹) and verify arrival.
    ///
    /// Converts the energy to its IR regime and tunable wavelength, then
    /// alternates moving and measuring until the achieved energy is within
    /// the acceptance range or the attempt budget is exhausted. Returns the
    /// final stored energy, or `None` when the energy is unattainable or
    /// the GoTo was canceled.
    pub async fn goto_ir(&self, desired_energy: f64) -> Option<ExcitationWavelength> {
        let mut desired = ExcitationWavelength::new(self.constants);
        let Some(mode) = desired.get_nir(EnergyInput::Wavenumber(desired_energy)) else {
            self.messenger.error(format!(
                "IR energy of {desired_energy}cm-1 is not attainable"
            ));
            return None;
        };

        self.update_mode(Some(mode));
        self.cancel.store(false, Ordering::SeqCst);
        *guard(&self.status) = GoToState::Running;
        self.alerts.start.emit(());
        self.messenger
            .update(format!("IR GoTo {desired_energy:.3}cm-1 started"));

        self.opo.wavelength_mode().await;

        // Without a wavemeter channel convergence cannot be verified, so
        // move once and trust the stage.
        let mut move_attempts = self.settings.move_attempts;
        if self.wavemeter.channel() == -1 {
            move_attempts = 1;
        }

        // Establish the current offset between the stage's own wavelength
        // estimate and reality before the first move.
        let mut opo_wavelength = self.opo.get_wavelength().await;
        *guard(&self.step) = GoToStep::Measuring;
        self.measure_and_record(opo_wavelength).await;

        for _attempt in 0..move_attempts {
            if !self.checkpoint().await {
                return None;
            }

            let desired_nir = desired.nir().wavelength() - self.opo.laser_offset();

            // Speed tier by distance: fast far away, slow close in, to
            // balance overshoot risk against total move time.
            let distance = (desired_nir - opo_wavelength).abs();
            if distance > FAST_MOVE_DISTANCE_NM {
                self.opo.set_speed(Some(FAST_MOVE_SPEED)).await;
            } else if distance < SLOW_MOVE_DISTANCE_NM {
                self.opo.set_speed(Some(SLOW_MOVE_SPEED)).await;
            } else {
                self.opo.set_speed(None).await;
            }

            *guard(&self.step) = GoToStep::Moving;
            if let Err(err) = self.opo.goto_nir(desired_nir).await {
                // Already reported; the motor wait below returns
                // immediately and the re-measure decides what happens.
                tracing::debug!(%err, "move command rejected");
            }
            tracing::debug!(
                target_nm = desired_nir,
                offset_nm = self.opo.laser_offset(),
                "waiting for stage"
            );
            if !self.wait_for_stage().await {
                return None;
            }

            *guard(&self.step) = GoToStep::Measuring;
            opo_wavelength = self.opo.get_wavelength().await;
            let measurement = self.measure_and_record(opo_wavelength).await;

            let mut achieved = ExcitationWavelength::new(self.constants);
            achieved.set_selected_mode(Some(mode));
            achieved.set_wavelength(ExcitationMode::Nir, measurement.wavelength());
            let energy_error = (achieved.energy().wavenumber() - desired_energy).abs();
            if energy_error <= self.settings.acceptance_range {
                break;
            }
        }

        *guard(&self.step) = GoToStep::None;
        *guard(&self.status) = GoToState::Stopped;
        self.opo.set_speed(None).await;

        let snapshot = self.stored_energy();
        self.alerts.stop.emit(snapshot.clone());
        self.alerts.stop_or_cancel.emit(());
        self.messenger.update("IR GoTo completed");
        Some(snapshot)
    }

    /// Measure the wavelength with the stage's own estimate as the
    /// expected-value hint, then record the resulting offset and update the
    /// stored energy.
    async fn measure_and_record(&self, opo_wavelength: f64) -> WavemeterMeasurement {
        let expected = (opo_wavelength > 0.0).then_some(opo_wavelength);
        let mut measurement = self.wavemeter.measure(expected).await;
        // The plausibility filter discards the bogus offsets produced by
        // empty measurements or a disconnected stage.
        self.opo
            .record_offset(measurement.wavelength() - opo_wavelength);
        measurement.set_laser_reference(opo_wavelength, self.opo.laser_offset());
        self.alerts.measurement.emit(measurement.clone());
        self.update_nir_wavelength(measurement.wavelength());
        measurement
    }

    /// Hold while paused, then consume a pending cancel.
    ///
    /// Returns false (after publishing the cancellation) when the GoTo must
    /// unwind.
    async fn checkpoint(&self) -> bool {
        while self.status() == GoToState::Paused {
            tokio::time::sleep(self.pause_poll).await;
        }
        if self.cancel.swap(false, Ordering::SeqCst) {
            self.finish_canceled();
            return false;
        }
        true
    }

    /// Await motors-stopped while polling for pause/cancel.
    async fn wait_for_stage(&self) -> bool {
        let wait = self.opo.wait_for_motors_stopped();
        tokio::pin!(wait);
        loop {
            tokio::select! {
                _ = &mut wait => break,
                _ = tokio::time::sleep(self.pause_poll) => {
                    while self.status() == GoToState::Paused {
                        tokio::time::sleep(self.pause_poll).await;
                    }
                    if self.cancel.swap(false, Ordering::SeqCst) {
                        self.finish_canceled();
                        return false;
                    }
                }
            }
        }
        // A stop command both releases the motor wait and raises the
        // cancel flag; catch the flag even when the wait won the race.
        if self.cancel.swap(false, Ordering::SeqCst) {
            self.finish_canceled();
            return false;
        }
        true
    }

    fn finish_canceled(&self) {
        *guard(&self.step) = GoToStep::None;
        *guard(&self.status) = GoToState::Stopped;
        self.messenger.update("IR GoTo canceled");
        self.alerts.cancel.emit(());
        self.alerts.stop_or_cancel.emit(());
    }
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::MockWavemeter;
    use crate::hardware::opo::OpoLink;

    fn controller() -> ExcitationGoToController {
        let settings = Settings::default();
        let messenger = Messenger::new();
        let opo = Arc::new(OpoLink::new(
            settings.opo.clone(),
            &settings.timing,
            messenger.clone(),
        ));
        let device = Arc::new(MockWavemeter::fixed(769.23, 0.0));
        let wavemeter = Arc::new(WavemeterLink::new(
            "excitation",
            device,
            settings.wavemeter.clone(),
            -1,
            &settings.timing,
            messenger.clone(),
        ));
        ExcitationGoToController::new(&settings, opo, wavemeter, messenger)
    }

    #[test]
    fn pause_is_a_no_op_unless_running() {
        let controller = controller();
        controller.pause();
        assert_eq!(controller.status(), GoToState::Stopped);
    }

    #[test]
    fn resume_is_a_no_op_unless_paused() {
        let controller = controller();
        controller.resume();
        assert_eq!(controller.status(), GoToState::Stopped);
    }

    #[tokio::test]
    async fn cancel_is_a_no_op_when_stopped() {
        let controller = controller();
        let mut cancels = controller.alerts().cancel.subscribe();
        controller.cancel().await;
        assert_eq!(controller.status(), GoToState::Stopped);
        assert!(cancels.try_recv().is_err());
    }

    #[tokio::test]
    async fn unattainable_energy_reports_and_leaves_state_alone() {
        let controller = controller();
        let mut messages = controller.messenger.subscribe();
        // 20000 cm-1 is above every reachable IR band.
        let result = controller.goto_ir(20000.0).await;
        assert!(result.is_none());
        assert_eq!(controller.status(), GoToState::Stopped);
        assert_eq!(controller.step(), GoToStep::None);
        let message = messages.recv().await.unwrap();
        assert!(message.text().contains("not attainable"));
    }

    #[tokio::test]
    async fn stored_energy_updates_fan_out() {
        let controller = controller();
        let mut energies = controller.alerts().energy.subscribe();
        controller.update_nir_wavelength(769.23);
        let snapshot = energies.recv().await.unwrap();
        assert!((snapshot.nir().wavelength() - 769.23).abs() < 1e-9);
        // Zero resets the whole set.
        controller.update_nir_wavelength(0.0);
        let snapshot = energies.recv().await.unwrap();
        assert!(snapshot.nir().is_zero());
    }
}

//! End-to-end GoTo tests against simulated hardware.
//!
//! Each test wires the full stack — tuning stage simulator, tracking mock
//! wavemeter, OPO link, and GoTo controller — and drives it the way the
//! scan sequencer would.

use opo_daq::config::Settings;
use opo_daq::controller::{ExcitationGoToController, GoToState, GoToStep};
use opo_daq::hardware::mock::{MockWavemeter, OpoSimulator};
use opo_daq::hardware::opo::OpoLink;
use opo_daq::hardware::wavemeter::WavemeterLink;
use opo_daq::messages::{Messenger, UserMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// A full rig over simulated hardware.
struct Rig {
    sim: OpoSimulator,
    opo: Arc<OpoLink>,
    controller: Arc<ExcitationGoToController>,
    messenger: Messenger,
}

/// Timing tuned so a complete GoTo takes tens of milliseconds.
fn fast_settings() -> Settings {
    let mut settings = Settings::default();
    settings.timing.motor_poll_interval = Duration::from_millis(10);
    settings.timing.pause_poll_interval = Duration::from_millis(10);
    settings.timing.sample_period = Duration::from_millis(1);
    settings.wavemeter.collection_length = 5;
    settings.laser.excitation.wavemeter_channel = 1;
    settings
}

/// Build a rig: simulator at 750nm, wavemeter tracking the simulated stage
/// through a small instrument offset.
async fn build_rig(mut settings: Settings, instrument_offset: f64) -> Rig {
    let sim = OpoSimulator::bind("127.0.0.1:0", 750.0)
        .await
        .expect("simulator must bind");
    sim.set_settle_time(Duration::from_millis(20));
    sim.set_speed_override(Some(2000.0));
    settings.opo.host = sim.addr().ip().to_string();
    settings.opo.port = sim.addr().port();

    let messenger = Messenger::new();
    let device = Arc::new(
        MockWavemeter::shared(sim.wavelength_handle(), 0.002)
            .with_instrument_offset(instrument_offset),
    );
    let opo = Arc::new(OpoLink::new(
        settings.opo.clone(),
        &settings.timing,
        messenger.clone(),
    ));
    let wavemeter = Arc::new(WavemeterLink::new(
        "excitation",
        device,
        settings.wavemeter.clone(),
        settings.laser.excitation.wavemeter_channel,
        &settings.timing,
        messenger.clone(),
    ));
    let controller = Arc::new(ExcitationGoToController::new(
        &settings,
        Arc::clone(&opo),
        wavemeter,
        messenger.clone(),
    ));

    opo.connect().await;
    assert!(opo.is_connected(), "simulator connection must establish");

    Rig {
        sim,
        opo,
        controller,
        messenger,
    }
}

async fn wait_for_step(controller: &ExcitationGoToController, step: GoToStep) {
    timeout(Duration::from_secs(10), async {
        while controller.step() != step {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("controller never reached step {step:?}"));
}

#[tokio::test]
async fn goto_converges_on_the_requested_energy() {
    let rig = build_rig(fast_settings(), 0.05).await;

    // 13000 cm-1 is in the nIR band: the stage is commanded directly to
    // 1e7 / 13000 = 769.23 nm (minus the learned offset).
    let result = timeout(Duration::from_secs(20), rig.controller.goto_ir(13000.0))
        .await
        .expect("GoTo must finish")
        .expect("GoTo must produce an energy");

    let achieved = result.energy().wavenumber();
    assert!(
        (achieved - 13000.0).abs() <= 0.75,
        "achieved {achieved} cm-1, wanted 13000 ± 0.75"
    );
    // The stage itself sits below the measured wavelength by the
    // instrument offset the controller learned.
    assert!((rig.sim.wavelength() - (769.2308 - 0.05)).abs() < 0.05);
    assert_eq!(rig.controller.status(), GoToState::Stopped);
    assert_eq!(rig.controller.step(), GoToStep::None);
    // The learned offset is the measured-minus-reported discrepancy.
    assert!((rig.opo.laser_offset() - 0.05).abs() < 0.02);
}

#[tokio::test]
async fn cancel_during_move_stops_the_stage() {
    let mut settings = fast_settings();
    // Long move at realistic speed so the Moving step lasts a while.
    settings.timing.motor_poll_interval = Duration::from_millis(5);
    let rig = build_rig(settings, 0.0).await;
    rig.sim.set_speed_override(None);
    rig.sim.set_settle_time(Duration::from_millis(500));

    let mut cancels = rig.controller.alerts().cancel.subscribe();
    let mut ended = rig.controller.alerts().stop_or_cancel.subscribe();

    let goto = {
        let controller = Arc::clone(&rig.controller);
        tokio::spawn(async move { controller.goto_ir(13000.0).await })
    };

    wait_for_step(&rig.controller, GoToStep::Moving).await;
    // Wait until the stage itself acknowledges motion, so the stop command
    // cannot overtake the move command on the wire.
    timeout(Duration::from_secs(5), async {
        while !rig.sim.is_moving() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("stage must start moving");
    rig.controller.cancel().await;

    let result = timeout(Duration::from_secs(5), goto)
        .await
        .expect("canceled GoTo must unwind")
        .expect("GoTo task must not panic");
    assert!(result.is_none(), "a canceled GoTo produces no energy");
    assert_eq!(rig.controller.status(), GoToState::Stopped);
    assert_eq!(rig.controller.step(), GoToStep::None);

    timeout(Duration::from_secs(1), cancels.recv())
        .await
        .expect("cancel alert must fire")
        .expect("cancel alert channel must stay open");
    timeout(Duration::from_secs(1), ended.recv())
        .await
        .expect("stop_or_cancel alert must fire")
        .expect("stop_or_cancel alert channel must stay open");

    // The stop command reached the stage: it never arrived at the target.
    assert!(!rig.sim.is_moving());
    assert!((rig.sim.wavelength() - 750.0).abs() < 1.0);
}

#[tokio::test]
async fn pause_is_idempotent_and_resume_continues() {
    let mut settings = fast_settings();
    settings.wavemeter.collection_length = 50;
    settings.timing.sample_period = Duration::from_millis(2);
    let rig = build_rig(settings, 0.0).await;

    let mut pauses = rig.controller.alerts().pause.subscribe();

    let goto = {
        let controller = Arc::clone(&rig.controller);
        tokio::spawn(async move { controller.goto_ir(13000.0).await })
    };

    wait_for_step(&rig.controller, GoToStep::Measuring).await;
    rig.controller.pause();
    rig.controller.pause(); // second call must be a no-op
    assert_eq!(rig.controller.status(), GoToState::Paused);
    assert!(pauses.try_recv().is_ok(), "first pause must alert");
    assert!(
        pauses.try_recv().is_err(),
        "second pause must not alert again"
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    rig.controller.resume();
    assert_eq!(rig.controller.status(), GoToState::Running);

    let result = timeout(Duration::from_secs(30), goto)
        .await
        .expect("resumed GoTo must finish")
        .expect("GoTo task must not panic");
    assert!(result.is_some());
}

#[tokio::test]
async fn unconfigured_wavemeter_channel_moves_once_blind() {
    let mut settings = fast_settings();
    settings.laser.excitation.wavemeter_channel = -1;
    let rig = build_rig(settings, 0.0).await;

    let result = timeout(Duration::from_secs(20), rig.controller.goto_ir(13000.0))
        .await
        .expect("GoTo must finish")
        .expect("a blind GoTo still completes");

    // No measurement was possible, so the stored energy stays unknown,
    // but the stage was still commanded to the converted wavelength.
    assert!(result.nir().is_zero());
    assert!((rig.sim.wavelength() - 769.2308).abs() < 0.01);
}

#[tokio::test]
async fn out_of_window_target_is_reported_and_degrades() {
    let rig = build_rig(fast_settings(), 0.0).await;
    let mut messages = rig.messenger.subscribe();

    // 11360 cm-1 is attainable (nIR band) but its wavelength, 880.3 nm,
    // is outside the stage's commandable window.
    let result = timeout(Duration::from_secs(20), rig.controller.goto_ir(11360.0))
        .await
        .expect("GoTo must finish");

    // The move was rejected; the GoTo still unwinds cleanly.
    assert!(result.is_some());
    assert!((rig.sim.wavelength() - 750.0).abs() < 1e-9);
    assert_eq!(rig.controller.status(), GoToState::Stopped);

    let mut saw_bounds_error = false;
    while let Ok(message) = messages.try_recv() {
        if let UserMessage::Error(text) = message {
            if text.contains("out of set bounds") {
                saw_bounds_error = true;
            }
        }
    }
    assert!(saw_bounds_error, "bounds rejection must be reported");
}

#[tokio::test]
async fn connection_failure_is_reported_not_thrown() {
    let settings = fast_settings();
    let messenger = Messenger::new();
    let mut messages = messenger.subscribe();
    let mut unreachable = settings.opo.clone();
    unreachable.host = "127.0.0.1".into();
    unreachable.port = 1; // nothing listens here

    let opo = OpoLink::new(unreachable, &settings.timing, messenger.clone());
    opo.connect().await;

    assert!(!opo.is_connected());
    let message = timeout(Duration::from_secs(5), messages.recv())
        .await
        .expect("connect failure must be reported")
        .expect("message channel must stay open");
    assert!(matches!(message, UserMessage::Error(_)));

    // Queries against the dead link degrade to the null wavelength.
    assert_eq!(opo.get_wavelength().await, 0.0);
}

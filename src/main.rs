//! CLI entry point for opo-daq.
//!
//! Provides a command-line interface for:
//! - Running the tuning stage simulator standalone (`sim`)
//! - Driving a full GoTo against simulated hardware (`goto`)
//!
//! The `goto` subcommand wires the whole subsystem together — simulator,
//! tracking mock wavemeter, OPO link, and GoTo controller — which makes it
//! a quick end-to-end smoke run without any instruments attached.
//!
//! # Usage
//!
//! ```bash
//! opo_daq sim --port 1315
//! opo_daq goto 13000
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use opo_daq::config::Settings;
use opo_daq::controller::ExcitationGoToController;
use opo_daq::hardware::mock::{MockWavemeter, OpoSimulator};
use opo_daq::hardware::opo::OpoLink;
use opo_daq::hardware::wavemeter::WavemeterLink;
use opo_daq::logging::{self, LoggingConfig};
use opo_daq::messages::Messenger;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "opo-daq")]
#[command(about = "Laser wavelength control subsystem", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Optional configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the tuning stage simulator standalone
    Sim {
        /// TCP port to listen on
        #[arg(long, default_value = "1315")]
        port: u16,

        /// Starting wavelength in nm
        #[arg(long, default_value = "750.0")]
        wavelength: f64,
    },

    /// Run a GoTo against simulated hardware
    Goto {
        /// Desired IR energy in cm-1
        energy: f64,
    },

    /// Take one wavemeter measurement against a simulated device
    Measure {
        /// Which laser channel to measure (excitation or detachment)
        #[arg(long, default_value = "excitation")]
        laser: String,

        /// Simulated wavelength in nm
        #[arg(long, default_value = "769.23")]
        wavelength: f64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = logging::parse_log_level(&cli.log_level).map_err(anyhow::Error::msg)?;
    logging::init(&LoggingConfig::new(level)).map_err(anyhow::Error::msg)?;

    let settings = Settings::load_validated(cli.config.as_deref())?;

    match cli.command {
        Commands::Sim { port, wavelength } => run_simulator(port, wavelength).await,
        Commands::Goto { energy } => run_goto(settings, energy).await,
        Commands::Measure { laser, wavelength } => run_measure(settings, &laser, wavelength).await,
    }
}

async fn run_simulator(port: u16, wavelength: f64) -> Result<()> {
    let sim = OpoSimulator::bind(("0.0.0.0", port), wavelength).await?;
    tracing::info!(addr = %sim.addr(), "tuning stage simulator listening");
    // Serve until interrupted.
    tokio::signal::ctrl_c().await?;
    Ok(())
}

async fn run_goto(mut settings: Settings, energy: f64) -> Result<()> {
    // Simulated rig: the stage starts mid-window and the wavemeter reads
    // the stage's true wavelength through a small calibration offset.
    let sim = OpoSimulator::bind("127.0.0.1:0", 750.0).await?;
    sim.set_settle_time(Duration::from_millis(500));
    sim.set_speed_override(Some(20.0));
    settings.opo.host = sim.addr().ip().to_string();
    settings.opo.port = sim.addr().port();
    if settings.laser.excitation.wavemeter_channel == -1 {
        settings.laser.excitation.wavemeter_channel = 1;
    }

    let messenger = Messenger::new();
    let device = Arc::new(
        MockWavemeter::shared(sim.wavelength_handle(), 0.002).with_instrument_offset(0.08),
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
    let controller =
        ExcitationGoToController::new(&settings, Arc::clone(&opo), wavemeter, messenger);

    opo.connect().await;

    match controller.goto_ir(energy).await {
        Some(result) => {
            let achieved = result.energy();
            tracing::info!(
                mode = result.selected_mode().map(|m| m.label()).unwrap_or("-"),
                wavenumber = achieved.wavenumber(),
                wavelength = achieved.wavelength(),
                "GoTo finished"
            );
        }
        None => tracing::warn!("GoTo did not complete"),
    }

    opo.close().await;
    Ok(())
}

async fn run_measure(settings: Settings, laser: &str, wavelength: f64) -> Result<()> {
    let (name, configured_channel) = match laser {
        "detachment" => ("detachment", settings.laser.detachment.wavemeter_channel),
        _ => ("excitation", settings.laser.excitation.wavemeter_channel),
    };
    let channel = if configured_channel == -1 {
        1
    } else {
        configured_channel
    };

    let device = Arc::new(MockWavemeter::fixed(wavelength, 0.005));
    let link = WavemeterLink::new(
        name,
        device,
        settings.wavemeter.clone(),
        channel,
        &settings.timing,
        Messenger::new(),
    );

    let measurement = link.measure(Some(wavelength)).await;
    let reduced = measurement.reduced_stats();
    tracing::info!(
        laser = name,
        samples = measurement.sample_count() as u64,
        average = reduced.average,
        stdev = reduced.stdev,
        iterations = measurement.iterations(),
        "measurement finished"
    );
    Ok(())
}

//! Configuration system using Figment.
//!
//! Strongly-typed settings for the laser control subsystem, loaded from:
//! 1. a TOML file (base configuration)
//! 2. environment variables (prefixed with `OPO_DAQ_`)
//!
//! Every field has a default matching the values the instrument shipped
//! with, so an empty file (or no file at all) produces a usable
//! configuration for the simulator.
//!
//! # Example
//! ```no_run
//! use opo_daq::config::Settings;
//!
//! # fn main() -> Result<(), figment::Error> {
//! let settings = Settings::load()?;
//! println!("OPO at {}:{}", settings.opo.host, settings.opo.port);
//! # Ok(())
//! # }
//! ```

use crate::error::{OpoDaqError, OpoResult};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level settings for the subsystem.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Per-channel laser settings.
    #[serde(default)]
    pub laser: LaserSettings,
    /// Tuning stage connection and motion window.
    #[serde(default)]
    pub opo: OpoSettings,
    /// Wavemeter sampling thresholds.
    #[serde(default)]
    pub wavemeter: WavemeterSettings,
    /// Poll intervals and pacing delays.
    #[serde(default)]
    pub timing: TimingSettings,
}

/// Settings for the two laser channels.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LaserSettings {
    #[serde(default)]
    pub excitation: ExcitationLaserSettings,
    #[serde(default)]
    pub detachment: DetachmentLaserSettings,
}

/// Excitation (OPO/A) channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExcitationLaserSettings {
    /// Maximum move/measure attempts per GoTo before giving up.
    #[serde(default = "default_move_attempts")]
    pub move_attempts: u32,
    /// How close (cm⁻¹) the achieved IR energy must be to the request.
    #[serde(default = "default_acceptance_range")]
    pub acceptance_range: f64,
    /// Wavemeter channel for this laser (−1 = not configured).
    #[serde(default = "default_wavemeter_channel")]
    pub wavemeter_channel: i32,
    /// Nd:YAG fundamental wavelength (nm) anchoring regime conversions.
    #[serde(default = "default_yag_fundamental")]
    pub yag_fundamental: f64,
}

impl Default for ExcitationLaserSettings {
    fn default() -> Self {
        Self {
            move_attempts: default_move_attempts(),
            acceptance_range: default_acceptance_range(),
            wavemeter_channel: default_wavemeter_channel(),
            yag_fundamental: default_yag_fundamental(),
        }
    }
}

/// Detachment (dye laser) channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetachmentLaserSettings {
    /// Wavemeter channel for this laser (−1 = not configured).
    #[serde(default = "default_wavemeter_channel")]
    pub wavemeter_channel: i32,
    /// Nd:YAG fundamental wavelength (nm).
    #[serde(default = "default_yag_fundamental")]
    pub yag_fundamental: f64,
    /// H₂ Raman shift (cm⁻¹) for the Raman-shifted setup.
    #[serde(default = "default_h2_raman_shift")]
    pub h2_raman_shift: f64,
}

impl Default for DetachmentLaserSettings {
    fn default() -> Self {
        Self {
            wavemeter_channel: default_wavemeter_channel(),
            yag_fundamental: default_yag_fundamental(),
            h2_raman_shift: default_h2_raman_shift(),
        }
    }
}

/// Tuning stage connection and motion limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpoSettings {
    /// Host of the tuning stage controller.
    #[serde(default = "default_opo_host")]
    pub host: String,
    /// TCP port of the tuning stage controller.
    #[serde(default = "default_opo_port")]
    pub port: u16,
    /// Lower bound (nm) of the commandable tunable wavelength window.
    #[serde(default = "default_lower_wavelength_bound")]
    pub lower_wavelength_bound: f64,
    /// Upper bound (nm) of the commandable tunable wavelength window.
    #[serde(default = "default_upper_wavelength_bound")]
    pub upper_wavelength_bound: f64,
    /// Lower bound (nm) while the fIR crystal is installed.
    #[serde(default = "default_fir_lower_wavelength_bound")]
    pub fir_lower_wavelength_bound: f64,
    /// Upper bound (nm) while the fIR crystal is installed.
    #[serde(default = "default_fir_upper_wavelength_bound")]
    pub fir_upper_wavelength_bound: f64,
    /// Whether the fIR crystal is installed (selects the fIR window).
    #[serde(default)]
    pub in_fir_mode: bool,
}

impl Default for OpoSettings {
    fn default() -> Self {
        Self {
            host: default_opo_host(),
            port: default_opo_port(),
            lower_wavelength_bound: default_lower_wavelength_bound(),
            upper_wavelength_bound: default_upper_wavelength_bound(),
            fir_lower_wavelength_bound: default_fir_lower_wavelength_bound(),
            fir_upper_wavelength_bound: default_fir_upper_wavelength_bound(),
            in_fir_mode: false,
        }
    }
}

/// Wavemeter sampling thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WavemeterSettings {
    /// Samples collected per measurement.
    #[serde(default = "default_collection_length")]
    pub collection_length: usize,
    /// Failed device reads tolerated before the measurement aborts.
    #[serde(default = "default_max_fail_count")]
    pub max_fail_count: u32,
    /// Out-of-range samples tolerated before the measurement aborts.
    #[serde(default = "default_max_bad_measurements")]
    pub max_bad_measurements: u32,
    /// How close (nm) a sample must sit to the expected wavelength.
    #[serde(default = "default_wavelength_range")]
    pub wavelength_range: f64,
    /// Spread threshold (nm) for the outlier-rejecting average.
    #[serde(default = "default_minimum_stdev")]
    pub minimum_stdev: f64,
}

impl Default for WavemeterSettings {
    fn default() -> Self {
        Self {
            collection_length: default_collection_length(),
            max_fail_count: default_max_fail_count(),
            max_bad_measurements: default_max_bad_measurements(),
            wavelength_range: default_wavelength_range(),
            minimum_stdev: default_minimum_stdev(),
        }
    }
}

/// Poll intervals and pacing delays.
///
/// These are the cooperative suspension points of the subsystem; shortening
/// them speeds up simulation runs, the defaults match the hardware's pulse
/// and motor timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingSettings {
    /// Interval between motor status polls while the stage is moving.
    #[serde(default = "default_motor_poll_interval", with = "humantime_serde")]
    pub motor_poll_interval: Duration,
    /// Interval between checks while a GoTo is paused.
    #[serde(default = "default_pause_poll_interval", with = "humantime_serde")]
    pub pause_poll_interval: Duration,
    /// Delay between wavemeter samples (one laser pulse period).
    #[serde(default = "default_sample_period", with = "humantime_serde")]
    pub sample_period: Duration,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            motor_poll_interval: default_motor_poll_interval(),
            pause_poll_interval: default_pause_poll_interval(),
            sample_period: default_sample_period(),
        }
    }
}

// Default value functions

fn default_move_attempts() -> u32 {
    2
}

fn default_acceptance_range() -> f64 {
    0.75
}

fn default_wavemeter_channel() -> i32 {
    -1
}

fn default_yag_fundamental() -> f64 {
    1064.0
}

fn default_h2_raman_shift() -> f64 {
    4055.201
}

fn default_opo_host() -> String {
    "localhost".to_string()
}

fn default_opo_port() -> u16 {
    1315
}

fn default_lower_wavelength_bound() -> f64 {
    710.0
}

fn default_upper_wavelength_bound() -> f64 {
    880.0
}

fn default_fir_lower_wavelength_bound() -> f64 {
    725.0
}

fn default_fir_upper_wavelength_bound() -> f64 {
    765.0
}

fn default_collection_length() -> usize {
    50
}

fn default_max_fail_count() -> u32 {
    50
}

fn default_max_bad_measurements() -> u32 {
    100
}

fn default_wavelength_range() -> f64 {
    1.0
}

fn default_minimum_stdev() -> f64 {
    crate::measurement::DEFAULT_MINIMUM_STDEV
}

fn default_motor_poll_interval() -> Duration {
    Duration::from_millis(250)
}

fn default_pause_poll_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_sample_period() -> Duration {
    Duration::from_millis(50)
}

impl Settings {
    /// Load configuration from `config/opo_daq.toml` and the environment.
    ///
    /// Environment variables override file values with prefix `OPO_DAQ_`,
    /// e.g. `OPO_DAQ_OPO_PORT=1316`.
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from("config/opo_daq.toml")
    }

    /// Load configuration from a specific file path.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("OPO_DAQ_").split("_"))
            .extract()
    }

    /// Load from the default location (or `path` when given) and validate.
    pub fn load_validated<P: AsRef<Path>>(path: Option<P>) -> OpoResult<Self> {
        let settings = match path {
            Some(path) => Self::load_from(path)?,
            None => Self::load()?,
        };
        settings.validate().map_err(OpoDaqError::Configuration)?;
        Ok(settings)
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> Result<(), String> {
        if self.laser.excitation.move_attempts == 0 {
            return Err("move_attempts must be at least 1".to_string());
        }
        if self.laser.excitation.acceptance_range <= 0.0 {
            return Err("acceptance_range must be positive".to_string());
        }
        if self.opo.lower_wavelength_bound >= self.opo.upper_wavelength_bound {
            return Err(format!(
                "Invalid wavelength window {} - {}",
                self.opo.lower_wavelength_bound, self.opo.upper_wavelength_bound
            ));
        }
        if self.opo.fir_lower_wavelength_bound >= self.opo.fir_upper_wavelength_bound {
            return Err(format!(
                "Invalid fIR wavelength window {} - {}",
                self.opo.fir_lower_wavelength_bound, self.opo.fir_upper_wavelength_bound
            ));
        }
        if self.wavemeter.collection_length == 0 {
            return Err("collection_length must be at least 1".to_string());
        }
        if self.wavemeter.wavelength_range <= 0.0 {
            return Err("wavelength_range must be positive".to_string());
        }
        Ok(())
    }
}

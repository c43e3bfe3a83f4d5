//! # OPO DAQ Core Library
//!
//! Laser wavelength control and measurement subsystem for a photoelectron
//! spectroscopy experiment. The crate drives a motorized tunable laser
//! (a LaserVision OPO/A) to a requested photon energy, verifies arrival
//! with a wavemeter, and iterates with bounded retries until the achieved
//! energy is within tolerance — all pausable and cancelable mid-flight,
//! and composable with an external scan loop through its alert events.
//!
//! ## Crate Structure
//!
//! - **`alert`**: Multi-subscriber notification primitive with persistent
//!   and one-shot subscription modes. Every component publishes its state
//!   changes through these.
//! - **`config`**: Strongly-typed settings loaded from TOML and the
//!   environment via Figment. See `config::Settings`.
//! - **`controller`**: The `ExcitationGoToController` convergence loop and
//!   its Stopped/Running/Paused state machine.
//! - **`error`**: The custom `OpoDaqError` enum for centralized error
//!   handling.
//! - **`hardware`**: Hardware links — the OPO/A TCP protocol client, the
//!   wavemeter measurement loop, capability traits, and mock
//!   implementations for running without instruments.
//! - **`logging`**: Tracing subscriber initialization.
//! - **`measurement`**: Outlier-rejecting statistics over wavemeter
//!   sample batches.
//! - **`messages`**: The user-facing status message channel.
//! - **`wavelength`**: Photon-energy conversions across the excitation and
//!   detachment laser regimes.

pub mod alert;
pub mod config;
pub mod controller;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod measurement;
pub mod messages;
pub mod wavelength;

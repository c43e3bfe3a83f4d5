//! Hardware links for the laser control subsystem.
//!
//! - [`capabilities`] — fine-grained capability traits hardware implements
//! - [`opo`] — TCP line-protocol client for the OPO/A tuning stage
//! - [`wavemeter`] — measurement loop over a wavemeter device
//! - [`mock`] — simulated hardware for tests and offline development

pub mod capabilities;
pub mod mock;
pub mod opo;
pub mod wavemeter;

pub use capabilities::Wavemeter;
pub use opo::{MotorStatus, OpoLink};
pub use wavemeter::{MeasureState, WavemeterLink};

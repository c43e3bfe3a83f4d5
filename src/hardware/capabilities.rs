//! Atomic Hardware Capabilities
//!
//! Fine-grained capability traits that hardware devices implement. Instead
//! of one monolithic instrument trait, a device implements exactly what it
//! supports, which keeps contracts small, lets generic code work with trait
//! bounds, and makes mocking individual capabilities trivial.
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors

use anyhow::Result;
use async_trait::async_trait;

/// Sample value a wavemeter returns when the requested channel is not
/// available on the device.
pub const CHANNEL_UNAVAILABLE: f64 = -6.0;

/// Capability: Wavelength Measurement
///
/// Multi-channel wavemeters (High Finesse style) that measure a laser's
/// wavelength directly.
///
/// # Contract
/// - `start_measurement` begins device-side collection; `stop_measurement`
///   halts it. Both are idempotent.
/// - `sample` returns one wavelength reading in nm for a channel. Values
///   `<= 0.0` are in-band device error codes for transient faults (no pulse
///   seen, under-exposed, ...); [`CHANNEL_UNAVAILABLE`] specifically means
///   the channel does not exist on this device.
/// - Readings are paced by the caller; `sample` itself should be fast.
#[async_trait]
pub trait Wavemeter: Send + Sync {
    /// Begin device-side collection.
    async fn start_measurement(&self) -> Result<()>;

    /// Halt any in-progress device-side collection.
    async fn stop_measurement(&self) -> Result<()>;

    /// Read one wavelength sample (nm) from a channel.
    ///
    /// Error codes are returned in-band as values `<= 0.0`, matching the
    /// device driver's convention.
    async fn sample(&self, channel: i32) -> f64;
}

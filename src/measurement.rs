//! Statistical processing of wavemeter samples.
//!
//! A single wavemeter reading is noisy (pulse-to-pulse jitter, occasional
//! mode hops), so a measurement is a batch of samples reduced with an
//! outlier-rejecting iterative average: values more than one standard
//! deviation from the running mean are discarded and the statistics
//! recomputed until the spread falls below a threshold.
//!
//! Conventions: an empty batch yields `{average: 0, stdev: 0}` rather than
//! NaN, and a standard deviation whose variance computes non-finite is
//! recorded as the sentinel `-1.0` so it can never satisfy a spread
//! threshold by accident.

/// Default spread threshold (nm) below which reduction stops.
pub const DEFAULT_MINIMUM_STDEV: f64 = 0.1;

/// Default cap on reduction iterations.
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

/// Mean and population standard deviation of a sample batch.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Stats {
    /// Arithmetic mean (0 for an empty batch).
    pub average: f64,
    /// Population standard deviation (`-1.0` when not computable).
    pub stdev: f64,
}

/// Mean and population standard deviation, `sqrt(E[x²] − E[x]²)`.
pub fn average(values: &[f64]) -> Stats {
    let len = values.len();
    if len == 0 {
        return Stats::default();
    }
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    for value in values {
        sum += value;
        sum_sq += value * value;
    }
    let mut average = sum / len as f64;
    let mut stdev = (sum_sq / len as f64 - average * average).sqrt();
    if !average.is_finite() {
        average = 0.0;
    }
    if !stdev.is_finite() {
        stdev = -1.0;
    }
    Stats { average, stdev }
}

/// Result of [`reduced_average`]: statistics before and after reduction.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReducedAverage {
    /// Statistics over the full batch.
    pub raw: Stats,
    /// Statistics after outlier rejection.
    pub reduced: Stats,
    /// Number of rejection passes performed.
    pub iterations: u32,
}

/// Iteratively discard outliers until the spread is below `minimum_stdev`.
///
/// Each pass keeps only values strictly within one standard deviation of the
/// current mean (roughly the central 68% of a normal batch) and recomputes
/// the statistics. Reduction stops early if the surviving batch would shrink
/// below `minimum_length` or after `max_iterations` passes.
pub fn reduced_average(
    values: &[f64],
    minimum_stdev: f64,
    minimum_length: usize,
    max_iterations: u32,
) -> ReducedAverage {
    let raw = average(values);
    let mut current = values.to_vec();
    let Stats {
        average: mut avg,
        mut stdev,
    } = raw;
    let mut iterations = 0;

    while stdev > minimum_stdev {
        current.retain(|value| avg - stdev < *value && *value < avg + stdev);
        iterations += 1;
        if current.len() < minimum_length || iterations > max_iterations {
            break;
        }
        let stats = average(&current);
        avg = stats.average;
        stdev = stats.stdev;
    }

    ReducedAverage {
        raw,
        reduced: Stats {
            average: avg,
            stdev,
        },
        iterations,
    }
}

/// One wavemeter measurement: the raw sample batch plus derived statistics
/// and the tuning stage's own idea of the wavelength at measurement time.
///
/// Snapshots handed to alert subscribers are clones, so later mutation of
/// the link's working copy cannot retroactively change what was reported.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WavemeterMeasurement {
    samples: Vec<f64>,
    raw: Stats,
    reduced: Stats,
    iterations: u32,
    laser_wavelength: f64,
    laser_offset: f64,
}

impl WavemeterMeasurement {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one raw sample (nm).
    pub fn add(&mut self, wavelength: f64) {
        self.samples.push(wavelength);
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    /// The measured wavelength: reduced mean, 0 when nothing was measured.
    pub fn wavelength(&self) -> f64 {
        self.reduced.average
    }

    pub fn raw_stats(&self) -> Stats {
        self.raw
    }

    pub fn reduced_stats(&self) -> Stats {
        self.reduced
    }

    /// Reduction passes used by the last [`finalize`](Self::finalize).
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Compute raw and reduced statistics over the recorded samples.
    pub fn finalize(&mut self, minimum_stdev: f64) -> Stats {
        let result = reduced_average(&self.samples, minimum_stdev, 0, DEFAULT_MAX_ITERATIONS);
        self.raw = result.raw;
        self.reduced = result.reduced;
        self.iterations = result.iterations;
        self.reduced
    }

    /// Attach the tuning stage's reported wavelength and the offset estimate
    /// that was current when this measurement finished.
    pub fn set_laser_reference(&mut self, laser_wavelength: f64, laser_offset: f64) {
        self.laser_wavelength = laser_wavelength;
        self.laser_offset = laser_offset;
    }

    /// Wavelength the tuning stage reported for itself (nm).
    pub fn laser_wavelength(&self) -> f64 {
        self.laser_wavelength
    }

    /// Offset estimate (measured − reported) in nm.
    pub fn laser_offset(&self) -> f64 {
        self.laser_offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_of_empty_batch_is_zero_not_nan() {
        let stats = average(&[]);
        assert_eq!(stats.average, 0.0);
        assert_eq!(stats.stdev, 0.0);
    }

    #[test]
    fn average_matches_population_formula() {
        let stats = average(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((stats.average - 5.0).abs() < 1e-12);
        assert!((stats.stdev - 2.0).abs() < 1e-12);
    }

    #[test]
    fn reduction_discards_the_outlier() {
        let result = reduced_average(&[10.0, 10.0, 10.0, 10.0, 100.0], 0.5, 0, 10);
        assert!((result.reduced.average - 10.0).abs() < 1e-9);
        assert!(result.reduced.stdev < 0.5);
        assert!(result.iterations >= 1);
        // Raw statistics keep the full batch.
        assert!((result.raw.average - 28.0).abs() < 1e-9);
    }

    #[test]
    fn reduction_of_empty_batch_returns_zeros() {
        let result = reduced_average(&[], 0.1, 0, 10);
        assert_eq!(result.raw, Stats::default());
        assert_eq!(result.reduced, Stats::default());
        assert_eq!(result.iterations, 0);
    }

    #[test]
    fn reduction_respects_minimum_length() {
        // Spread can never reach the threshold, but the batch must not be
        // reduced below four survivors.
        let values = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let result = reduced_average(&values, 1e-12, 4, 10);
        assert!(result.iterations <= 10);
    }

    #[test]
    fn reduction_stops_after_max_iterations() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        let result = reduced_average(&values, 0.0, 0, 3);
        assert!(result.iterations <= 4);
    }

    #[test]
    fn tight_batch_needs_no_reduction() {
        let result = reduced_average(&[532.001, 532.002, 532.001], 0.1, 0, 10);
        assert_eq!(result.iterations, 0);
        assert_eq!(result.raw, result.reduced);
    }

    #[test]
    fn measurement_finalize_fills_both_stat_sets() {
        let mut measurement = WavemeterMeasurement::new();
        for sample in [769.23, 769.24, 769.22, 769.23, 775.0] {
            measurement.add(sample);
        }
        measurement.finalize(DEFAULT_MINIMUM_STDEV);
        assert!((measurement.wavelength() - 769.23).abs() < 0.01);
        assert!(measurement.raw_stats().average > measurement.wavelength());
    }

    #[test]
    fn empty_measurement_has_zero_wavelength() {
        let mut measurement = WavemeterMeasurement::new();
        measurement.finalize(DEFAULT_MINIMUM_STDEV);
        assert_eq!(measurement.wavelength(), 0.0);
    }
}

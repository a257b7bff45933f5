//! Third-octave band table shared by every stage of the pipeline.
//!
//! Center frequencies follow IEC 61260; band edges sit a factor of 2^(1/6)
//! above and below each center.

use ndarray::Array1;

/// Number of equalizer bands.
pub const NUM_BANDS: usize = 31;

/// Third-octave center frequencies in Hz (IEC 61260), 20 Hz to 20 kHz.
pub const BAND_FREQUENCIES: [f64; NUM_BANDS] = [
    20.0, 25.0, 31.5, 40.0, 50.0, 63.0, 80.0, 100.0, 125.0, 160.0, 200.0, 250.0, 315.0, 400.0,
    500.0, 630.0, 800.0, 1000.0, 1250.0, 1600.0, 2000.0, 2500.0, 3150.0, 4000.0, 5000.0, 6300.0,
    8000.0, 10000.0, 12500.0, 16000.0, 20000.0,
];

/// Ratio between a band's center and its edges: 2^(1/6).
pub const BAND_EDGE_RATIO: f64 = 1.122_462_048_309_373;

/// Floor substituted for non-positive magnitudes during spectral analysis.
pub const ANALYSIS_FLOOR_DB: f64 = -160.0;

/// Floor applied to dB values before log/sqrt-sensitive operations and display.
pub const DISPLAY_FLOOR_DB: f64 = -140.0;

/// Lower and upper third-octave edges of a band centered at `center` Hz.
pub fn band_edges(center: f64) -> (f64, f64) {
    (center / BAND_EDGE_RATIO, center * BAND_EDGE_RATIO)
}

/// Create a logarithmically spaced frequency grid
///
/// # Arguments
/// * `n_points` - Number of grid points
/// * `f_min` - Lowest frequency in Hz
/// * `f_max` - Highest frequency in Hz
///
/// # Returns
/// Frequencies in Hz, ascending
pub fn log_spaced_grid(n_points: usize, f_min: f64, f_max: f64) -> Array1<f64> {
    Array1::logspace(10.0, f_min.log10(), f_max.log10(), n_points)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edges_bracket_center() {
        for &f in &BAND_FREQUENCIES {
            let (lo, hi) = band_edges(f);
            assert!(lo < f && f < hi);
            // adjacent third-octave bands tile without overlap
            assert!((hi / lo - 2f64.powf(1.0 / 3.0)).abs() < 1e-9);
        }
    }

    #[test]
    fn grid_is_log_spaced_and_bounded() {
        let grid = log_spaced_grid(240, 20.0, 20000.0);
        assert_eq!(grid.len(), 240);
        assert!((grid[0] - 20.0).abs() < 1e-6);
        assert!((grid[239] - 20000.0).abs() < 1e-3);
        let r0 = grid[1] / grid[0];
        let r1 = grid[121] / grid[120];
        assert!((r0 - r1).abs() < 1e-9);
    }
}

//! Filter parameter storage for the 31-band equalizer.

use crate::bands::NUM_BANDS;
use ndarray::Array1;

/// Default Q of every band.
pub const DEFAULT_Q: f64 = 4.32;

/// Valid per-band gain range in dB.
pub const GAIN_RANGE_DB: (f64, f64) = (-12.0, 12.0);

/// Valid per-band Q range.
pub const Q_RANGE: (f64, f64) = (0.3, 10.0);

/// Valid broadband input gain range in dB.
pub const INPUT_GAIN_RANGE_DB: (f64, f64) = (-24.0, 24.0);

/// Gains and Qs of the 31 peaking filters, index-aligned with
/// [`crate::bands::BAND_FREQUENCIES`].
#[derive(Debug, Clone, PartialEq)]
pub struct FilterParams {
    /// Per-band gain in dB, in [-12, 12].
    pub gain_db: Array1<f64>,
    /// Per-band Q, in [0.3, 10].
    pub q: Array1<f64>,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            gain_db: Array1::zeros(NUM_BANDS),
            q: Array1::from_elem(NUM_BANDS, DEFAULT_Q),
        }
    }
}

impl FilterParams {
    /// Restore every band to gain 0 dB / default Q.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Clamp all values into their valid ranges.
    pub fn clamp_to_ranges(&mut self) {
        self.gain_db
            .mapv_inplace(|g| g.clamp(GAIN_RANGE_DB.0, GAIN_RANGE_DB.1));
        self.q.mapv_inplace(|q| q.clamp(Q_RANGE.0, Q_RANGE.1));
    }
}

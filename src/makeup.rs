//! Broadband makeup gain estimation.
//!
//! After the band fit, one scalar gain aligns overall loudness with the
//! reference. The median over a stable mid-band region keeps single-band
//! misfits from skewing it.

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::params::INPUT_GAIN_RANGE_DB;
use crate::reference::ReferenceBand;
use crate::residual::median;
use crate::sampler::sample_db;
use crate::spectrum::BandLevel;

/// Tuning of the makeup gain estimation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MakeupConfig {
    /// Lower edge of the stable region in Hz.
    pub low_freq: f64,
    /// Upper edge of the stable region in Hz.
    pub high_freq: f64,
    /// Maximum makeup delta magnitude in dB.
    pub max_delta_db: f64,
}

impl Default for MakeupConfig {
    fn default() -> Self {
        Self {
            low_freq: 50.0,
            high_freq: 10_000.0,
            max_delta_db: 12.0,
        }
    }
}

/// Estimate the updated broadband input gain.
///
/// For each fit-grid point inside the stable region, compute
/// `reference(f) - (measured(f) + offset + predicted(f))`; the median of
/// these differences, clamped to the configured magnitude, is added to the
/// gain already in effect. The total stays inside [-24, 24] dB.
pub fn estimate_makeup_gain(
    grid: &Array1<f64>,
    predicted: &Array1<f64>,
    reference: &[ReferenceBand],
    measurement: &[BandLevel],
    offset_db: f64,
    current_input_gain_db: f64,
    config: &MakeupConfig,
) -> f64 {
    let diffs: Vec<f64> = grid
        .iter()
        .enumerate()
        .filter(|&(_, &f)| f >= config.low_freq && f <= config.high_freq)
        .map(|(i, &f)| {
            sample_db(reference, f) - (sample_db(measurement, f) + offset_db + predicted[i])
        })
        .collect();

    if diffs.is_empty() {
        return current_input_gain_db;
    }

    let delta = median(&diffs).clamp(-config.max_delta_db, config.max_delta_db);
    (current_input_gain_db + delta).clamp(INPUT_GAIN_RANGE_DB.0, INPUT_GAIN_RANGE_DB.1)
}

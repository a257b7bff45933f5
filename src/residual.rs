//! EqMatch - A library for automatic equalization matching
//!
//! Copyright (C) 2025 Pierre Aubert pierre(at)spinorama(dot)org
//!
//! This program is free software: you can redistribute it and/or modify
//! it under the terms of the GNU General Public License as published by
//! the Free Software Foundation, either version 3 of the License, or
//! (at your option) any later version.
//!
//! This program is distributed in the hope that it will be useful,
//! but WITHOUT ANY WARRANTY; without even the implied warranty of
//! MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
//! GNU General Public License for more details.
//!
//! You should have received a copy of the GNU General Public License
//! along with this program.  If not, see <https://www.gnu.org/licenses/>.

use ndarray::Array1;

use crate::bands::{BAND_FREQUENCIES, DISPLAY_FLOOR_DB, NUM_BANDS};
use crate::reference::ReferenceBand;
use crate::sampler::sample_db;
use crate::smooth::moving_average;
use crate::spectrum::BandLevel;
use serde::{Deserialize, Serialize};

/// Tuning of the residual (correction target) construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResidualConfig {
    /// Measured levels below `display floor + gate` are clamped up to the gate.
    pub gate_above_floor_db: f64,
    /// Lower edge of the alignment-offset window in Hz.
    pub offset_low_freq: f64,
    /// Upper edge of the alignment-offset window in Hz.
    pub offset_high_freq: f64,
    /// Maximum broadband alignment offset magnitude in dB.
    pub max_offset_db: f64,
    /// Moving-average window of the final smoothing pass.
    pub smoothing_window: usize,
    /// Number of final smoothing passes.
    pub smoothing_passes: usize,
}

impl Default for ResidualConfig {
    fn default() -> Self {
        Self {
            gate_above_floor_db: 10.0,
            offset_low_freq: 50.0,
            offset_high_freq: 10_000.0,
            max_offset_db: 36.0,
            smoothing_window: 5,
            smoothing_passes: 1,
        }
    }
}

/// Broadband alignment offset between reference and measurement.
///
/// The median of `reference(f) - measurement(f)` over the band centers inside
/// the stable window, clamped to the configured magnitude. Removing this
/// offset before building the residual makes per-band gains represent shape
/// differences only.
pub fn alignment_offset(
    reference: &[ReferenceBand],
    measurement: &[BandLevel],
    config: &ResidualConfig,
) -> f64 {
    let mut diffs: Vec<f64> = BAND_FREQUENCIES
        .iter()
        .filter(|&&f| f >= config.offset_low_freq && f <= config.offset_high_freq)
        .map(|&f| sample_db(reference, f) - sample_db(measurement, f))
        .collect();

    if diffs.is_empty() {
        return 0.0;
    }
    diffs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    median_of_sorted(&diffs).clamp(-config.max_offset_db, config.max_offset_db)
}

/// Build the per-band correction target.
///
/// Per band: sample both curves, gate the measurement against the noise
/// floor, apply the alignment offset, weight the difference by the edge and
/// bass tapers, clamp to the frequency-dependent maximum correction, then
/// smooth across bands.
pub fn build_residual(
    reference: &[ReferenceBand],
    measurement: &[BandLevel],
    offset_db: f64,
    config: &ResidualConfig,
) -> Array1<f64> {
    let gate = DISPLAY_FLOOR_DB + config.gate_above_floor_db;
    let mut residual = Vec::with_capacity(NUM_BANDS);

    for &freq in &BAND_FREQUENCIES {
        residual.push(weighted_residual_at(
            freq,
            sample_db(reference, freq),
            sample_db(measurement, freq).max(gate) + offset_db,
        ));
    }

    Array1::from(moving_average(
        &residual,
        config.smoothing_window,
        config.smoothing_passes,
    ))
}

/// Raw weighted and clamped correction for one band, before smoothing.
pub fn weighted_residual_at(freq: f64, ref_db: f64, meas_db: f64) -> f64 {
    let raw = (ref_db - meas_db) * edge_weight(freq) * bass_weight(freq);
    let max = max_correction_db(freq);
    raw.clamp(-max, max)
}

/// Fade corrections in over 20-40 Hz and out over 16-20 kHz; the spectral
/// extremes are too unreliable to chase.
pub fn edge_weight(freq: f64) -> f64 {
    if freq < 20.0 {
        0.0
    } else if freq < 40.0 {
        (freq - 20.0) / 20.0
    } else if freq <= 16_000.0 {
        1.0
    } else if freq < 20_000.0 {
        (20_000.0 - freq) / 4_000.0
    } else {
        0.0
    }
}

/// Progressive discount of bass corrections below 120 Hz.
pub fn bass_weight(freq: f64) -> f64 {
    if freq < 40.0 {
        0.20
    } else if freq < 80.0 {
        0.35
    } else if freq < 120.0 {
        0.55
    } else {
        1.0
    }
}

/// Frequency-dependent cap on the correction magnitude; tighter in the bass.
pub fn max_correction_db(freq: f64) -> f64 {
    if freq < 60.0 {
        4.0
    } else if freq < 120.0 {
        6.0
    } else {
        12.0
    }
}

fn median_of_sorted(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// Median of an unsorted slice; empty input yields 0.
pub(crate) fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    median_of_sorted(&sorted)
}

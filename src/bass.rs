//! Hybrid bass correction.
//!
//! When the bass residual swings hard, the per-band corrections are chasing a
//! room mode rather than a tonal tilt. This module replaces the ragged bass
//! target with two broad Gaussian corrections centered at the strongest peak
//! and dip, and produces a per-band penalty map that keeps the solver from
//! moving any other bass band.

use log::debug;
use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::bands::{BAND_FREQUENCIES, NUM_BANDS};

/// Tuning of the hybrid bass corrector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BassConfig {
    /// Lower edge of the bass region in Hz.
    pub region_low_freq: f64,
    /// Upper edge of the bass region in Hz.
    pub region_high_freq: f64,
    /// Peak-to-peak residual swing that triggers the correction, in dB.
    pub trigger_span_db: f64,
    /// Standard deviation of the Gaussian corrections, in octaves.
    pub sigma_octaves: f64,
    /// Mix ratio toward the coarse curve when blending.
    pub coarse_mix: f64,
    /// Extra diagonal penalty for the two extremum bands (free to move).
    pub free_penalty: f64,
    /// Extra diagonal penalty for every other bass band (locked in place).
    pub locked_penalty: f64,
}

impl Default for BassConfig {
    fn default() -> Self {
        Self {
            region_low_freq: 40.0,
            region_high_freq: 400.0,
            trigger_span_db: 6.0,
            sigma_octaves: 0.55,
            coarse_mix: 0.85,
            free_penalty: 1e-3,
            locked_penalty: 50.0,
        }
    }
}

/// Outcome of the hybrid bass pass.
#[derive(Debug, Clone)]
pub struct BassCorrection {
    /// Whether the correction triggered and rewrote the bass residual.
    pub active: bool,
    /// Band index of the strongest positive residual, when active.
    pub peak_band: Option<usize>,
    /// Band index of the strongest negative residual, when active.
    pub dip_band: Option<usize>,
    /// Per-band extra diagonal penalty handed to the solver. All zeros when
    /// the correction did not trigger.
    pub extra_penalty: Array1<f64>,
}

impl BassCorrection {
    fn inactive() -> Self {
        Self {
            active: false,
            peak_band: None,
            dip_band: None,
            extra_penalty: Array1::zeros(NUM_BANDS),
        }
    }
}

/// Apply the hybrid bass correction to `residual` in place.
///
/// Triggers when the residual's peak-to-peak swing inside the bass region
/// exceeds the configured threshold. On trigger, the bass portion of the
/// residual is replaced by a blend toward two Gaussian bumps centered at the
/// strongest peak and strongest dip, and the returned penalty map locks every
/// other bass band.
pub fn apply_hybrid_bass(residual: &mut Array1<f64>, config: &BassConfig) -> BassCorrection {
    let region: Vec<usize> = (0..NUM_BANDS)
        .filter(|&i| {
            BAND_FREQUENCIES[i] >= config.region_low_freq
                && BAND_FREQUENCIES[i] <= config.region_high_freq
        })
        .collect();
    if region.len() < 2 {
        return BassCorrection::inactive();
    }

    let mut peak = region[0];
    let mut dip = region[0];
    for &i in &region {
        if residual[i] > residual[peak] {
            peak = i;
        }
        if residual[i] < residual[dip] {
            dip = i;
        }
    }

    let span = residual[peak] - residual[dip];
    if span <= config.trigger_span_db || peak == dip {
        return BassCorrection::inactive();
    }

    debug!(
        "hybrid bass triggered: span {:.1} dB, peak at {} Hz, dip at {} Hz",
        span, BAND_FREQUENCIES[peak], BAND_FREQUENCIES[dip]
    );

    // coarse target: two broad bumps in log-frequency space, everything else
    // in the bass region zeroed first
    let peak_amp = residual[peak];
    let dip_amp = residual[dip];
    for &i in &region {
        let coarse = gaussian_bump(BAND_FREQUENCIES[i], BAND_FREQUENCIES[peak], peak_amp, config)
            + gaussian_bump(BAND_FREQUENCIES[i], BAND_FREQUENCIES[dip], dip_amp, config);
        residual[i] = config.coarse_mix * coarse + (1.0 - config.coarse_mix) * residual[i];
    }

    let mut extra_penalty = Array1::zeros(NUM_BANDS);
    for &i in &region {
        extra_penalty[i] = if i == peak || i == dip {
            config.free_penalty
        } else {
            config.locked_penalty
        };
    }

    BassCorrection {
        active: true,
        peak_band: Some(peak),
        dip_band: Some(dip),
        extra_penalty,
    }
}

fn gaussian_bump(freq: f64, center: f64, amplitude: f64, config: &BassConfig) -> f64 {
    let octaves = (freq / center).log2();
    amplitude * (-0.5 * (octaves / config.sigma_octaves).powi(2)).exp()
}

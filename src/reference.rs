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

use std::f64::consts::PI;
use std::sync::Arc;

use log::{info, warn};
use rayon::prelude::*;
use rustfft::num_complex::Complex64;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EqMatchError, Result};
use crate::smooth::moving_average;
use crate::spectrum::band_levels;

/// One band of a reference curve: per-band level distribution of the
/// reference material, described by its 10th, 50th and 90th percentiles.
///
/// Invariant after post-processing: `p10 <= median <= p90`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferenceBand {
    /// Band center frequency in Hz.
    pub freq: f64,
    /// 10th percentile level in dB.
    pub p10: f64,
    /// Median level in dB.
    pub median: f64,
    /// 90th percentile level in dB.
    pub p90: f64,
}

/// Tuning of the reference analysis and post-processing pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceAnalysisConfig {
    /// STFT size in samples (power of two).
    pub fft_size: usize,
    /// Moving-average window applied across bands to each percentile series.
    pub smoothing_window: usize,
    /// Number of smoothing passes.
    pub smoothing_passes: usize,
    /// Factor by which the p10..p90 spread is shrunk around the median.
    pub spread_shrink: f64,
    /// Minimum p10..p90 width after shrinking, in dB.
    pub min_band_width_db: f64,
    /// Maximum p10..p90 width after shrinking, in dB.
    pub max_band_width_db: f64,
    /// Lower edge of the level-normalization region in Hz.
    pub norm_low_freq: f64,
    /// Upper edge of the level-normalization region in Hz.
    pub norm_high_freq: f64,
    /// Target median level of the normalization region in dB.
    pub norm_target_db: f64,
}

impl Default for ReferenceAnalysisConfig {
    fn default() -> Self {
        Self {
            fft_size: 4096,
            smoothing_window: 5,
            smoothing_passes: 2,
            spread_shrink: 0.55,
            min_band_width_db: 1.0,
            max_band_width_db: 6.0,
            norm_low_freq: 50.0,
            norm_high_freq: 10_000.0,
            norm_target_db: -60.0,
        }
    }
}

/// Analyze decoded mono audio into a 31-band reference curve.
///
/// Runs an overlap-add STFT (Hann window, 50% hop) over the whole signal,
/// reduces each frame to third-octave band levels and derives per-band
/// p10/median/p90 statistics, then applies the post-processing pipeline.
///
/// This is CPU-heavy and intended to run off the UI thread; submit it through
/// [`crate::engine::FitEngine::submit_reference_analysis`].
pub fn analyze_reference(
    samples: &[f32],
    sample_rate: f64,
    config: &ReferenceAnalysisConfig,
) -> Vec<ReferenceBand> {
    let fft_size = config.fft_size.max(64).next_power_of_two();
    let hop = fft_size / 2;
    if samples.len() < fft_size || sample_rate <= 0.0 {
        return Vec::new();
    }

    let mut planner = FftPlanner::<f64>::new();
    let fft: Arc<dyn Fft<f64>> = planner.plan_fft_forward(fft_size);
    let window = hann_window(fft_size);

    let frame_starts: Vec<usize> = (0..=(samples.len() - fft_size)).step_by(hop).collect();
    info!(
        "analyzing reference: {} frames of {} samples at {} Hz",
        frame_starts.len(),
        fft_size,
        sample_rate
    );

    // Each frame is independent; sweep them in parallel.
    let frames: Vec<Vec<crate::spectrum::BandLevel>> = frame_starts
        .par_iter()
        .map(|&start| {
            let mut buffer: Vec<Complex64> = samples[start..start + fft_size]
                .iter()
                .enumerate()
                .map(|(i, &s)| Complex64::new(s as f64 * window[i], 0.0))
                .collect();
            fft.process(&mut buffer);

            let mut magnitudes = vec![0.0; fft_size];
            for (i, slot) in magnitudes.iter_mut().take(fft_size / 2).enumerate() {
                *slot = buffer[i].norm();
            }
            band_levels(&magnitudes, sample_rate)
        })
        .collect();

    let Some(first) = frames.first() else {
        return Vec::new();
    };
    let num_bands = first.len();

    let mut bands = Vec::with_capacity(num_bands);
    for band in 0..num_bands {
        let mut levels: Vec<f64> = frames
            .iter()
            .filter_map(|frame| frame.get(band).map(|p| p.level))
            .collect();
        levels.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        bands.push(ReferenceBand {
            freq: first[band].frequency,
            p10: percentile(&levels, 10.0),
            median: percentile(&levels, 50.0),
            p90: percentile(&levels, 90.0),
        });
    }

    post_process_reference(&mut bands, config);
    bands
}

/// Post-process a raw percentile curve: smooth each percentile series across
/// bands, shrink the spread around the median, and normalize overall level so
/// the median of the normalization region hits the target.
///
/// Safe to call on an already-processed curve; near the width clamps the
/// pipeline is a fixed point.
pub fn post_process_reference(bands: &mut [ReferenceBand], config: &ReferenceAnalysisConfig) {
    if bands.is_empty() {
        return;
    }

    // (a) smooth the three percentile series independently
    let p10s: Vec<f64> = bands.iter().map(|b| b.p10).collect();
    let meds: Vec<f64> = bands.iter().map(|b| b.median).collect();
    let p90s: Vec<f64> = bands.iter().map(|b| b.p90).collect();
    let p10s = moving_average(&p10s, config.smoothing_window, config.smoothing_passes);
    let meds = moving_average(&meds, config.smoothing_window, config.smoothing_passes);
    let p90s = moving_average(&p90s, config.smoothing_window, config.smoothing_passes);
    for (i, band) in bands.iter_mut().enumerate() {
        band.p10 = p10s[i];
        band.median = meds[i];
        band.p90 = p90s[i];
    }

    // (b) shrink the spread and clamp the band width
    for band in bands.iter_mut() {
        let mut half_lo = (band.median - band.p10).max(0.0) * config.spread_shrink;
        let mut half_hi = (band.p90 - band.median).max(0.0) * config.spread_shrink;
        let width = half_lo + half_hi;

        if width <= f64::EPSILON {
            half_lo = config.min_band_width_db / 2.0;
            half_hi = config.min_band_width_db / 2.0;
        } else if width < config.min_band_width_db {
            let scale = config.min_band_width_db / width;
            half_lo *= scale;
            half_hi *= scale;
        } else if width > config.max_band_width_db {
            let scale = config.max_band_width_db / width;
            half_lo *= scale;
            half_hi *= scale;
        }

        band.p10 = band.median - half_lo;
        band.p90 = band.median + half_hi;
    }

    // (c) shift everything so the stable region's median lands on the target
    let mut region: Vec<f64> = bands
        .iter()
        .filter(|b| b.freq >= config.norm_low_freq && b.freq <= config.norm_high_freq)
        .map(|b| b.median)
        .collect();
    if !region.is_empty() {
        region.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let shift = config.norm_target_db - percentile(&region, 50.0);
        for band in bands.iter_mut() {
            band.p10 += shift;
            band.median += shift;
            band.p90 += shift;
        }
    }
}

/// Load a reference curve from its JSON representation:
/// `{"bands": [{"freq", "p10", "median", "p90"}, ...]}`.
///
/// A band entry with missing or malformed fields is skipped with a warning;
/// only a document without a `bands` array fails the whole load.
pub fn load_reference_json(text: &str) -> Result<Vec<ReferenceBand>> {
    let doc: Value = serde_json::from_str(text)?;

    let entries = doc
        .get("bands")
        .and_then(Value::as_array)
        .ok_or_else(|| EqMatchError::ReferenceParse {
            message: "missing \"bands\" array".to_string(),
        })?;

    let mut bands = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        let freq = entry.get("freq").and_then(Value::as_f64);
        let p10 = entry.get("p10").and_then(Value::as_f64);
        let median = entry.get("median").and_then(Value::as_f64);
        let p90 = entry.get("p90").and_then(Value::as_f64);

        match (freq, p10, median, p90) {
            (Some(freq), Some(p10), Some(median), Some(p90)) if freq > 0.0 => {
                bands.push(ReferenceBand {
                    freq,
                    p10,
                    median,
                    p90,
                });
            }
            _ => warn!("skipping malformed reference band entry {}", i),
        }
    }

    bands.sort_by(|a, b| a.freq.partial_cmp(&b.freq).unwrap_or(std::cmp::Ordering::Equal));
    info!("reference curve loaded: {} bands", bands.len());
    Ok(bands)
}

/// Linear-interpolated percentile of an ascending-sorted slice.
fn percentile(sorted: &[f64], pct: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = (pct / 100.0).clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let frac = rank - lo as f64;
            if lo + 1 < n {
                sorted[lo] * (1.0 - frac) + sorted[lo + 1] * frac
            } else {
                sorted[n - 1]
            }
        }
    }
}

fn hann_window(size: usize) -> Vec<f64> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / size as f64).cos()))
        .collect()
}

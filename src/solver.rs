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
//!
//! Two-stage alternating fit of 31 peaking-filter gains and Qs to a target
//! correction curve: a regularized Gauss-Newton pass over the gains with the
//! Qs held fixed, a discrete coordinate search over the Qs with the gains
//! held fixed, and a refinement loop that re-fits the gains whenever the Qs
//! move.

use std::f64::consts::PI;

use log::{debug, warn};
use ndarray::{Array1, Array2};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::bands::{BAND_FREQUENCIES, NUM_BANDS};
use crate::bass::BassCorrection;
use crate::params::FilterParams;

/// Tuning of the curve-fitting solver. Every weight and threshold here is a
/// tuned default, not a load-bearing invariant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Number of log-spaced fit grid points between 20 Hz and 20 kHz.
    pub grid_points: usize,
    /// Per-band gain limit in dB.
    pub gain_limit_db: f64,
    /// Per-iteration gain update limit in dB.
    pub step_limit_db: f64,
    /// Maximum Gauss-Newton iterations per gain stage.
    pub gain_iterations: usize,
    /// Stop a gain stage early when the largest update falls below this (dB).
    pub gain_tolerance_db: f64,
    /// Central-difference step for the Jacobian, in dB.
    pub jacobian_step_db: f64,
    /// Tikhonov damping added to the normal-equations diagonal.
    pub damping: f64,
    /// Weight of the adjacent-band gain smoothness penalty.
    pub smoothness_weight: f64,
    /// Multiplicative Q candidates evaluated per band and sweep.
    pub q_candidates: [f64; 5],
    /// Maximum Q coordinate-search sweeps.
    pub q_sweeps: usize,
    /// Lower working Q bound.
    pub q_min: f64,
    /// Upper working Q bound.
    pub q_max: f64,
    /// Weight of the predicted-curve curvature penalty in the Q loss.
    pub curvature_weight: f64,
    /// Weight of the log-domain starting-Q deviation penalty in the Q loss.
    pub q_deviation_weight: f64,
    /// Gains below this magnitude contribute nothing to the forward model (dB).
    pub negligible_gain_db: f64,
    /// |gain| above which Q is capped hard.
    pub loud_gain_db: f64,
    /// |gain| above which Q is capped moderately.
    pub mid_gain_db: f64,
    /// Q cap for loud corrections.
    pub q_cap_loud: f64,
    /// Q cap for moderate corrections.
    pub q_cap_mid: f64,
    /// Q cap for everything else.
    pub q_cap_default: f64,
    /// Q range forced onto the two active bands in the hybrid-bass case.
    pub hybrid_q_range: (f64, f64),
    /// Q cap for the remaining bass bands in the hybrid-bass case.
    pub hybrid_q_cap: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            grid_points: 240,
            gain_limit_db: 12.0,
            step_limit_db: 3.0,
            gain_iterations: 8,
            gain_tolerance_db: 0.02,
            jacobian_step_db: 0.25,
            damping: 1e-3,
            smoothness_weight: 0.35,
            q_candidates: [0.70, 0.85, 1.0, 1.18, 1.35],
            q_sweeps: 4,
            q_min: 0.6,
            q_max: 6.0,
            curvature_weight: 0.5,
            q_deviation_weight: 1.5,
            negligible_gain_db: 0.01,
            loud_gain_db: 8.0,
            mid_gain_db: 5.0,
            q_cap_loud: 1.4,
            q_cap_mid: 2.2,
            q_cap_default: 4.0,
            hybrid_q_range: (0.6, 1.4),
            hybrid_q_cap: 2.0,
        }
    }
}

/// Magnitude response of one peaking biquad at `freq`, in dB.
///
/// Center and query frequencies are clamped below Nyquist. Returns NaN when
/// the evaluation degenerates; callers skip that contribution.
pub fn peaking_response_db(freq: f64, center: f64, q: f64, gain_db: f64, sample_rate: f64) -> f64 {
    let nyquist_guard = 0.49 * sample_rate;
    let f0 = center.clamp(1.0, nyquist_guard);
    let f = freq.clamp(0.0, nyquist_guard);

    let w0 = 2.0 * PI * f0 / sample_rate;
    let w = 2.0 * PI * f / sample_rate;
    let cos_w0 = w0.cos();
    let alpha = w0.sin() / (2.0 * q);
    let big_a = 10f64.powf(gain_db / 40.0);

    let b0 = 1.0 + alpha * big_a;
    let b1 = -2.0 * cos_w0;
    let b2 = 1.0 - alpha * big_a;
    let a0 = 1.0 + alpha / big_a;
    let a1 = -2.0 * cos_w0;
    let a2 = 1.0 - alpha / big_a;

    let z_inv = Complex64::from_polar(1.0, -w);
    let z_inv_2 = z_inv * z_inv;
    let num =
        Complex64::new(b0, 0.0) + Complex64::new(b1, 0.0) * z_inv + Complex64::new(b2, 0.0) * z_inv_2;
    let den =
        Complex64::new(a0, 0.0) + Complex64::new(a1, 0.0) * z_inv + Complex64::new(a2, 0.0) * z_inv_2;

    let den_sq = den.norm_sqr();
    if !den_sq.is_finite() || den_sq < 1e-24 {
        return f64::NAN;
    }
    let mag_sq = num.norm_sqr() / den_sq;
    if !mag_sq.is_finite() || mag_sq <= 0.0 {
        return f64::NAN;
    }
    10.0 * mag_sq.log10()
}

/// One band's response over the whole grid; degenerate points contribute 0.
fn band_curve(
    grid: &Array1<f64>,
    center: f64,
    q: f64,
    gain_db: f64,
    sample_rate: f64,
) -> Array1<f64> {
    Array1::from_shape_fn(grid.len(), |i| {
        let db = peaking_response_db(grid[i], center, q, gain_db, sample_rate);
        if db.is_finite() { db } else { 0.0 }
    })
}

/// Combined response of all 31 bands on the grid, in dB (sum in dB, i.e.
/// product in linear power). Bands with negligible gain are skipped; a 0 dB
/// peaking filter is unity anyway.
pub fn predicted_response(
    grid: &Array1<f64>,
    gain_db: &Array1<f64>,
    q: &Array1<f64>,
    sample_rate: f64,
    config: &SolverConfig,
) -> Array1<f64> {
    let mut total = Array1::zeros(grid.len());
    for band in 0..NUM_BANDS {
        if gain_db[band].abs() < config.negligible_gain_db {
            continue;
        }
        total += &band_curve(grid, BAND_FREQUENCIES[band], q[band], gain_db[band], sample_rate);
    }
    total
}

/// Fit gains and Qs of the 31 peaking filters to `target` on `grid`.
///
/// # Arguments
/// * `grid` - Dense log-spaced frequency grid in Hz
/// * `target` - Target correction in dB at each grid point
/// * `start_q` - Starting Q per band (current knob positions)
/// * `sample_rate` - Sample rate in Hz
/// * `bass` - Hybrid bass correction outcome; its penalty map becomes an
///   extra diagonal regularization term and its active bands get forced Qs
/// * `config` - Solver tuning
///
/// # Returns
/// Fitted parameters, every gain in [-12, 12] and every Q in [0.6, 6].
pub fn fit_band_filters(
    grid: &Array1<f64>,
    target: &Array1<f64>,
    start_q: &Array1<f64>,
    sample_rate: f64,
    bass: Option<&BassCorrection>,
    config: &SolverConfig,
) -> FilterParams {
    let mut gain_db = Array1::zeros(NUM_BANDS);
    // tolerate short knob arrays; missing bands start from the default Q
    let start = Array1::from_shape_fn(NUM_BANDS, |band| {
        start_q
            .get(band)
            .copied()
            .unwrap_or(crate::params::DEFAULT_Q)
            .clamp(config.q_min, config.q_max)
    });
    let mut q = start.clone();
    let extra_penalty = bass.filter(|b| b.active).map(|b| &b.extra_penalty);

    // Stage 1: gains with the starting Qs
    if !fit_gains(grid, target, &mut gain_db, &q, sample_rate, extra_penalty, config) {
        return FilterParams { gain_db, q };
    }

    // Stage 2: Qs with the gains fixed
    fit_qs(grid, target, &gain_db, &mut q, &start, sample_rate, config);

    // gains must be refit whenever Q changes
    if !fit_gains(grid, target, &mut gain_db, &q, sample_rate, extra_penalty, config) {
        return FilterParams { gain_db, q };
    }

    // limit Q by the resulting gain magnitude, then keep the fit consistent
    cap_qs(&gain_db, &mut q, bass, config);
    fit_gains(grid, target, &mut gain_db, &q, sample_rate, extra_penalty, config);

    debug!(
        "fit finished: gain range [{:.2}, {:.2}] dB",
        gain_db.iter().cloned().fold(f64::INFINITY, f64::min),
        gain_db.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
    );

    FilterParams { gain_db, q }
}

/// Gauss-Newton gain fit with the Qs held fixed. Returns false when the
/// normal equations lost positive definiteness and the stage was aborted; in
/// that case `gain_db` holds the best gains seen so far.
fn fit_gains(
    grid: &Array1<f64>,
    target: &Array1<f64>,
    gain_db: &mut Array1<f64>,
    q: &Array1<f64>,
    sample_rate: f64,
    extra_penalty: Option<&Array1<f64>>,
    config: &SolverConfig,
) -> bool {
    let m = grid.len();
    let h = config.jacobian_step_db;
    let mut best_gains = gain_db.clone();
    let mut best_sse = f64::INFINITY;

    for _iteration in 0..config.gain_iterations {
        let predicted = predicted_response(grid, gain_db, q, sample_rate, config);
        let residual = target - &predicted;
        let sse = residual.dot(&residual);
        if sse < best_sse {
            best_sse = sse;
            best_gains.assign(gain_db);
        }

        // Central-difference Jacobian. The forward model is additive in dB,
        // so each column only needs its own band's contribution.
        let mut jacobian = Array2::zeros((m, NUM_BANDS));
        for band in 0..NUM_BANDS {
            let center = BAND_FREQUENCIES[band];
            let up = band_curve(grid, center, q[band], gain_db[band] + h, sample_rate);
            let down = band_curve(grid, center, q[band], gain_db[band] - h, sample_rate);
            for i in 0..m {
                jacobian[[i, band]] = (up[i] - down[i]) / (2.0 * h);
            }
        }

        let mut normal = jacobian.t().dot(&jacobian);
        let mut rhs = jacobian.t().dot(&residual);

        for band in 0..NUM_BANDS {
            normal[[band, band]] += config.damping;
        }
        add_smoothness_terms(&mut normal, &mut rhs, gain_db, config.smoothness_weight);
        if let Some(penalty) = extra_penalty {
            for band in 0..NUM_BANDS {
                normal[[band, band]] += penalty[band];
            }
        }

        let Some(update) = cholesky_solve(&normal, &rhs) else {
            warn!("normal equations not positive definite, aborting gain stage");
            gain_db.assign(&best_gains);
            return false;
        };

        let mut max_step = 0.0f64;
        for band in 0..NUM_BANDS {
            let step = update[band].clamp(-config.step_limit_db, config.step_limit_db);
            gain_db[band] =
                (gain_db[band] + step).clamp(-config.gain_limit_db, config.gain_limit_db);
            max_step = max_step.max(step.abs());
        }
        if max_step < config.gain_tolerance_db {
            break;
        }
    }

    // keep the best iterate, not necessarily the last
    let predicted = predicted_response(grid, gain_db, q, sample_rate, config);
    let residual = target - &predicted;
    if residual.dot(&residual) > best_sse {
        gain_db.assign(&best_gains);
    }
    true
}

/// Add `weight * DᵀD` (first-difference smoothness on the updated gains) to
/// the normal matrix and the matching pull term to the right-hand side.
fn add_smoothness_terms(
    normal: &mut Array2<f64>,
    rhs: &mut Array1<f64>,
    gain_db: &Array1<f64>,
    weight: f64,
) {
    let n = gain_db.len();
    for j in 0..n - 1 {
        normal[[j, j]] += weight;
        normal[[j + 1, j + 1]] += weight;
        normal[[j, j + 1]] -= weight;
        normal[[j + 1, j]] -= weight;
    }
    for j in 0..n {
        let mut pull = 0.0;
        if j > 0 {
            pull += gain_db[j] - gain_db[j - 1];
        }
        if j + 1 < n {
            pull -= gain_db[j + 1] - gain_db[j];
        }
        rhs[j] -= weight * pull;
    }
}

/// Coordinate search over the Qs with the gains held fixed.
fn fit_qs(
    grid: &Array1<f64>,
    target: &Array1<f64>,
    gain_db: &Array1<f64>,
    q: &mut Array1<f64>,
    start_q: &Array1<f64>,
    sample_rate: f64,
    config: &SolverConfig,
) {
    let mut predicted = predicted_response(grid, gain_db, q, sample_rate, config);

    for _sweep in 0..config.q_sweeps {
        let mut improved = false;

        for band in 0..NUM_BANDS {
            if gain_db[band].abs() < config.negligible_gain_db {
                continue;
            }
            let center = BAND_FREQUENCIES[band];
            let current_curve = band_curve(grid, center, q[band], gain_db[band], sample_rate);
            let without_band = &predicted - &current_curve;

            let mut best_q = q[band];
            let mut best_curve = current_curve;
            let mut best_loss = q_loss(
                &(&without_band + &best_curve),
                target,
                q[band],
                start_q[band],
                config,
            );

            for &mult in &config.q_candidates {
                let candidate = (q[band] * mult).clamp(config.q_min, config.q_max);
                if (candidate - q[band]).abs() < 1e-12 {
                    continue;
                }
                let curve = band_curve(grid, center, candidate, gain_db[band], sample_rate);
                let loss = q_loss(
                    &(&without_band + &curve),
                    target,
                    candidate,
                    start_q[band],
                    config,
                );
                if loss < best_loss - 1e-9 {
                    best_loss = loss;
                    best_q = candidate;
                    best_curve = curve;
                }
            }

            if best_q != q[band] {
                q[band] = best_q;
                predicted = &without_band + &best_curve;
                improved = true;
            }
        }

        if !improved {
            break;
        }
    }
}

/// Q-stage loss: fit error, ripple of the predicted curve itself, and a
/// log-domain pull toward the starting Q.
fn q_loss(
    predicted: &Array1<f64>,
    target: &Array1<f64>,
    q: f64,
    start_q: f64,
    config: &SolverConfig,
) -> f64 {
    let mut err = 0.0;
    for i in 0..predicted.len() {
        let d = predicted[i] - target[i];
        err += d * d;
    }

    let mut curvature = 0.0;
    for i in 1..predicted.len() - 1 {
        let c = predicted[i - 1] - 2.0 * predicted[i] + predicted[i + 1];
        curvature += c * c;
    }

    let deviation = (q / start_q.max(1e-6)).ln();
    err + config.curvature_weight * curvature + config.q_deviation_weight * deviation * deviation
}

/// Louder corrections get tighter Q bounds; in the hybrid-bass case the two
/// active bands are forced broad and the rest of the bass region stays tame.
fn cap_qs(
    gain_db: &Array1<f64>,
    q: &mut Array1<f64>,
    bass: Option<&BassCorrection>,
    config: &SolverConfig,
) {
    for band in 0..NUM_BANDS {
        if gain_db[band].abs() < config.negligible_gain_db {
            continue;
        }
        let cap = if gain_db[band].abs() > config.loud_gain_db {
            config.q_cap_loud
        } else if gain_db[band].abs() > config.mid_gain_db {
            config.q_cap_mid
        } else {
            config.q_cap_default
        };
        q[band] = q[band].min(cap).max(config.q_min);
    }

    if let Some(correction) = bass.filter(|b| b.active) {
        for band in 0..NUM_BANDS {
            if correction.extra_penalty[band] <= 0.0 {
                continue;
            }
            if Some(band) == correction.peak_band || Some(band) == correction.dip_band {
                q[band] = q[band].clamp(config.hybrid_q_range.0, config.hybrid_q_range.1);
            } else {
                q[band] = q[band].min(config.hybrid_q_cap);
            }
        }
    }
}

/// Solve `a x = b` for a symmetric positive definite matrix via Cholesky
/// decomposition. Returns None on a non-positive pivot.
fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = b.len();
    let mut l = Array2::<f64>::zeros((n, n));

    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }
            if i == j {
                if !sum.is_finite() || sum <= 1e-12 {
                    return None;
                }
                l[[i, i]] = sum.sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }

    let mut y = Array1::zeros(n);
    for i in 0..n {
        let mut sum = b[i];
        for k in 0..i {
            sum -= l[[i, k]] * y[k];
        }
        y[i] = sum / l[[i, i]];
    }

    let mut x = Array1::zeros(n);
    for i in (0..n).rev() {
        let mut sum = y[i];
        for k in i + 1..n {
            sum -= l[[k, i]] * x[k];
        }
        x[i] = sum / l[[i, i]];
    }
    Some(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bands::log_spaced_grid;

    #[test]
    fn peaking_response_peaks_at_center() {
        let at_center = peaking_response_db(1000.0, 1000.0, 2.0, 6.0, 48000.0);
        assert!((at_center - 6.0).abs() < 0.05);
        let off = peaking_response_db(4000.0, 1000.0, 2.0, 6.0, 48000.0);
        assert!(off < 1.0);
        let cut = peaking_response_db(1000.0, 1000.0, 2.0, -6.0, 48000.0);
        assert!((cut + 6.0).abs() < 0.05);
    }

    #[test]
    fn zero_gain_band_is_unity() {
        let db = peaking_response_db(500.0, 1000.0, 4.32, 0.0, 48000.0);
        assert!(db.abs() < 1e-9);
    }

    #[test]
    fn cholesky_solves_a_known_system() {
        let a = Array2::from_shape_vec((2, 2), vec![4.0, 2.0, 2.0, 3.0]).unwrap();
        let b = Array1::from(vec![10.0, 8.0]);
        let x = cholesky_solve(&a, &b).unwrap();
        // 4x + 2y = 10, 2x + 3y = 8 -> x = 1.75, y = 1.5
        assert!((x[0] - 1.75).abs() < 1e-12);
        assert!((x[1] - 1.5).abs() < 1e-12);
    }

    #[test]
    fn cholesky_rejects_indefinite_matrices() {
        let a = Array2::from_shape_vec((2, 2), vec![1.0, 2.0, 2.0, 1.0]).unwrap();
        let b = Array1::from(vec![1.0, 1.0]);
        assert!(cholesky_solve(&a, &b).is_none());
    }

    #[test]
    fn fit_recovers_a_single_band_boost() {
        let config = SolverConfig::default();
        let grid = log_spaced_grid(config.grid_points, 20.0, 20000.0);
        let start_q = Array1::from_elem(NUM_BANDS, 2.0);

        // target produced by one +5 dB filter at 1 kHz
        let band = BAND_FREQUENCIES.iter().position(|&f| f == 1000.0).unwrap();
        let target = band_curve(&grid, 1000.0, 2.0, 5.0, 48000.0);

        let fitted = fit_band_filters(&grid, &target, &start_q, 48000.0, None, &config);
        assert!(fitted.gain_db[band] > 2.5, "got {}", fitted.gain_db[band]);
        // distant bands stay quiet
        assert!(fitted.gain_db[0].abs() < 1.0);
        assert!(fitted.gain_db[NUM_BANDS - 1].abs() < 1.0);
        // the realized curve tracks the target closely
        let realized =
            predicted_response(&grid, &fitted.gain_db, &fitted.q, 48000.0, &config);
        for i in 0..grid.len() {
            assert!((realized[i] - target[i]).abs() < 1.5);
        }
    }

    #[test]
    fn outputs_respect_bounds_for_hostile_targets() {
        let config = SolverConfig::default();
        let grid = log_spaced_grid(config.grid_points, 20.0, 20000.0);
        let start_q = Array1::from_elem(NUM_BANDS, 4.32);

        // alternating +-30 dB target, far outside what the bands can do
        let target = Array1::from_shape_fn(grid.len(), |i| if i % 2 == 0 { 30.0 } else { -30.0 });
        let fitted = fit_band_filters(&grid, &target, &start_q, 48000.0, None, &config);

        for band in 0..NUM_BANDS {
            assert!(fitted.gain_db[band] >= -12.0 && fitted.gain_db[band] <= 12.0);
            assert!(fitted.q[band] >= 0.3 && fitted.q[band] <= 10.0);
        }
    }

    #[test]
    fn locked_bands_barely_move() {
        let config = SolverConfig::default();
        let grid = log_spaced_grid(config.grid_points, 20.0, 20000.0);
        let start_q = Array1::from_elem(NUM_BANDS, 4.32);

        // flat +6 target, but lock every band except 1 kHz with a huge penalty
        let target = Array1::from_elem(grid.len(), 6.0);
        let band = BAND_FREQUENCIES.iter().position(|&f| f == 1000.0).unwrap();
        let mut penalty = Array1::from_elem(NUM_BANDS, 1e6);
        penalty[band] = 0.0;
        let correction = BassCorrection {
            active: true,
            peak_band: Some(band),
            dip_band: None,
            extra_penalty: penalty,
        };

        let fitted = fit_band_filters(&grid, &target, &start_q, 48000.0, Some(&correction), &config);
        for i in 0..NUM_BANDS {
            if i != band {
                assert!(fitted.gain_db[i].abs() < 0.2, "band {} moved: {}", i, fitted.gain_db[i]);
            }
        }
        assert!(fitted.gain_db[band] > 2.0);
    }
}

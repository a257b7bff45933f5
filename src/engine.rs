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
//! Fit-job orchestration. `run_fit` is the pure snapshot-in/bundle-out core;
//! [`FitEngine`] runs it on a worker thread with a single-outstanding-job
//! guarantee and delivers the result through a one-shot ticket.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;

use log::{info, warn};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::bands::log_spaced_grid;
use crate::bass::{BassConfig, apply_hybrid_bass};
use crate::error::{EqMatchError, Result};
use crate::makeup::{MakeupConfig, estimate_makeup_gain};
use crate::reference::{ReferenceAnalysisConfig, ReferenceBand, analyze_reference};
use crate::residual::{ResidualConfig, alignment_offset, build_residual};
use crate::sampler::sample_db;
use crate::solver::{SolverConfig, fit_band_filters, predicted_response};
use crate::spectrum::BandLevel;

/// Combined tuning for one fit cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FitConfig {
    /// Residual construction tuning.
    pub residual: ResidualConfig,
    /// Hybrid bass correction tuning.
    pub bass: BassConfig,
    /// Solver tuning.
    pub solver: SolverConfig,
    /// Makeup gain tuning.
    pub makeup: MakeupConfig,
}

/// Everything a fit job consumes, captured by value at submission time.
/// The job never reads live UI or audio state.
#[derive(Debug, Clone)]
pub struct FitInput {
    /// Averaged measurement curve from a stopped session.
    pub measurement: Vec<BandLevel>,
    /// Current reference curve.
    pub reference: Vec<ReferenceBand>,
    /// Starting Q per band (current knob positions).
    pub start_q: Array1<f64>,
    /// Sample rate in Hz.
    pub sample_rate: f64,
    /// Input gain currently in effect, in dB.
    pub input_gain_db: f64,
}

/// Result of one fit cycle, applied by the caller as a single atomic bundle.
#[derive(Debug, Clone)]
pub struct FitOutput {
    /// Fitted per-band gains in dB.
    pub gain_db: Array1<f64>,
    /// Fitted per-band Qs.
    pub q: Array1<f64>,
    /// Updated broadband input gain in dB.
    pub input_gain_db: f64,
    /// The correction target the solver fitted, for overlay display.
    pub residual_db: Array1<f64>,
}

/// Run one complete fit cycle on the captured inputs.
///
/// Missing inputs are detected up front and reported; nothing is attempted
/// with empty data. Numerical degeneracies inside the solver are recovered
/// locally and still produce a (possibly conservative) parameter set.
pub fn run_fit(input: &FitInput, config: &FitConfig) -> Result<FitOutput> {
    if input.measurement.is_empty() {
        return Err(EqMatchError::MissingMeasurement);
    }
    if input.reference.is_empty() {
        return Err(EqMatchError::MissingReference);
    }

    let offset_db = alignment_offset(&input.reference, &input.measurement, &config.residual);
    let mut residual_db = build_residual(
        &input.reference,
        &input.measurement,
        offset_db,
        &config.residual,
    );
    let bass = apply_hybrid_bass(&mut residual_db, &config.bass);

    // the solver's grid is far denser than the 31 bands
    let grid = log_spaced_grid(config.solver.grid_points, 20.0, 20_000.0);
    let residual_points: Vec<BandLevel> = crate::bands::BAND_FREQUENCIES
        .iter()
        .zip(residual_db.iter())
        .map(|(&frequency, &level)| BandLevel { frequency, level })
        .collect();
    let target = Array1::from_shape_fn(grid.len(), |i| sample_db(&residual_points, grid[i]));

    let fitted = fit_band_filters(
        &grid,
        &target,
        &input.start_q,
        input.sample_rate,
        Some(&bass),
        &config.solver,
    );

    let predicted = predicted_response(
        &grid,
        &fitted.gain_db,
        &fitted.q,
        input.sample_rate,
        &config.solver,
    );
    let input_gain_db = estimate_makeup_gain(
        &grid,
        &predicted,
        &input.reference,
        &input.measurement,
        offset_db,
        input.input_gain_db,
        &config.makeup,
    );

    info!(
        "fit complete: offset {:+.2} dB, makeup {:+.2} dB, hybrid bass {}",
        offset_db,
        input_gain_db - input.input_gain_db,
        if bass.active { "on" } else { "off" }
    );

    Ok(FitOutput {
        gain_db: fitted.gain_db,
        q: fitted.q,
        input_gain_db,
        residual_db,
    })
}

/// One-shot delivery handle for an asynchronous job.
///
/// Dropping the ticket abandons the result; the worker's send is silently
/// discarded. That is the only cancellation model: a running job is never
/// interrupted, its result simply goes unread.
#[derive(Debug)]
pub struct Ticket<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> Ticket<T> {
    /// Take the result if the job has finished, without blocking.
    pub fn try_take(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Block until the job finishes. Returns None if the worker died.
    pub fn wait(self) -> Option<T> {
        self.rx.recv().ok()
    }
}

/// Single-worker executor for fit and reference-analysis jobs.
///
/// At most one job is outstanding at a time; a second submission while busy
/// fails fast with [`EqMatchError::EngineBusy`]. Jobs own value copies of all
/// their inputs, so no locks guard their working data.
#[derive(Debug, Default, Clone)]
pub struct FitEngine {
    busy: Arc<AtomicBool>,
}

/// Clears the busy flag even if the job panics.
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl FitEngine {
    /// Create an idle engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a job is currently outstanding.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Submit a fit job. Inputs are validated before the worker starts so
    /// missing-data errors surface immediately on the calling thread.
    pub fn submit_fit(&self, input: FitInput, config: FitConfig) -> Result<Ticket<Result<FitOutput>>> {
        if input.measurement.is_empty() {
            return Err(EqMatchError::MissingMeasurement);
        }
        if input.reference.is_empty() {
            return Err(EqMatchError::MissingReference);
        }
        self.spawn(move || run_fit(&input, &config))
    }

    /// Submit an offline reference analysis of decoded mono audio.
    /// The finished curve replaces the caller's reference wholesale.
    pub fn submit_reference_analysis(
        &self,
        samples: Vec<f32>,
        sample_rate: f64,
        config: ReferenceAnalysisConfig,
    ) -> Result<Ticket<Vec<ReferenceBand>>> {
        self.spawn(move || analyze_reference(&samples, sample_rate, &config))
    }

    fn spawn<T, F>(&self, job: F) -> Result<Ticket<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("job rejected: engine busy");
            return Err(EqMatchError::EngineBusy);
        }

        let (tx, rx) = mpsc::channel();
        let guard = BusyGuard(Arc::clone(&self.busy));
        thread::spawn(move || {
            let _guard = guard;
            // the ticket may be gone; that is fine
            let _ = tx.send(job());
        });

        Ok(Ticket { rx })
    }
}

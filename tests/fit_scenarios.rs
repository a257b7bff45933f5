//! End-to-end scenarios for the matching engine.

use anyhow::Result;
use ndarray::Array1;

use eqmatch::bands::{BAND_FREQUENCIES, NUM_BANDS, log_spaced_grid};
use eqmatch::engine::{FitConfig, FitEngine, FitInput};
use eqmatch::makeup::{MakeupConfig, estimate_makeup_gain};
use eqmatch::measure::MeasurementSession;
use eqmatch::params::DEFAULT_Q;
use eqmatch::reference::{ReferenceBand, load_reference_json};
use eqmatch::solver::{SolverConfig, fit_band_filters, predicted_response};
use eqmatch::spectrum::BandLevel;

fn flat_reference(level: f64) -> Vec<ReferenceBand> {
    BAND_FREQUENCIES
        .iter()
        .map(|&freq| ReferenceBand {
            freq,
            p10: level - 1.0,
            median: level,
            p90: level + 1.0,
        })
        .collect()
}

fn flat_measurement(level: f64) -> Vec<BandLevel> {
    BAND_FREQUENCIES
        .iter()
        .map(|&frequency| BandLevel { frequency, level })
        .collect()
}

/// A uniform +6 dB correction target: the solver realizes it as a uniform
/// boost and the makeup step finds nothing left to fix.
#[test]
fn uniform_boost_target_is_realized_without_makeup() {
    let config = SolverConfig::default();
    let grid = log_spaced_grid(config.grid_points, 20.0, 20000.0);
    let start_q = Array1::from_elem(NUM_BANDS, DEFAULT_Q);
    let target = Array1::from_elem(grid.len(), 6.0);

    let fitted = fit_band_filters(&grid, &target, &start_q, 48000.0, None, &config);

    // every band boosts, none hits the rails, and the spread stays tight
    let mut min_gain = f64::INFINITY;
    let mut max_gain = f64::NEG_INFINITY;
    for band in 0..NUM_BANDS {
        assert!(fitted.gain_db[band] > 0.5, "band {} did not boost", band);
        assert!(fitted.gain_db[band] < 12.0);
        min_gain = min_gain.min(fitted.gain_db[band]);
        max_gain = max_gain.max(fitted.gain_db[band]);
        // Qs only tightened or held, never widened past the caps
        assert!(fitted.q[band] >= 0.6 && fitted.q[band] <= DEFAULT_Q + 1e-9);
    }
    assert!(max_gain - min_gain < 3.0, "gains spread too far");

    // the realized curve sits on the target through the mid band
    let realized = predicted_response(&grid, &fitted.gain_db, &fitted.q, 48000.0, &config);
    for (i, &f) in grid.iter().enumerate() {
        if (100.0..=8000.0).contains(&f) {
            assert!(
                (realized[i] - 6.0).abs() < 1.0,
                "{:.0} Hz realized {:.2} dB",
                f,
                realized[i]
            );
        }
    }

    // with the broadband shift handled by the filters, makeup stays near zero
    let makeup = estimate_makeup_gain(
        &grid,
        &realized,
        &flat_reference(0.0),
        &flat_measurement(-6.0),
        0.0,
        0.0,
        &MakeupConfig::default(),
    );
    assert!(makeup.abs() < 1.0, "makeup {:.2} dB", makeup);
}

/// Fit outputs stay inside their valid ranges for arbitrary targets.
#[test]
fn fit_outputs_stay_in_bounds() {
    let config = SolverConfig::default();
    let grid = log_spaced_grid(config.grid_points, 20.0, 20000.0);

    for seed in 0..4u32 {
        let target = Array1::from_shape_fn(grid.len(), |i| {
            let x = (i as f64 * 0.37 + seed as f64 * 1.7).sin();
            let y = (i as f64 * 0.091 + seed as f64).cos();
            18.0 * x + 9.0 * y
        });
        let start_q = Array1::from_elem(NUM_BANDS, 1.0 + seed as f64 * 2.5);

        let fitted = fit_band_filters(&grid, &target, &start_q, 48000.0, None, &config);
        for band in 0..NUM_BANDS {
            assert!(
                (-12.0..=12.0).contains(&fitted.gain_db[band]),
                "gain out of range: {}",
                fitted.gain_db[band]
            );
            assert!(
                (0.3..=10.0).contains(&fitted.q[band]),
                "q out of range: {}",
                fitted.q[band]
            );
        }
    }
}

/// Whole chain: session snapshots -> power average -> JSON reference ->
/// engine fit -> atomic result bundle.
#[test]
fn measurement_to_fit_roundtrip() -> Result<()> {
    let mut session = MeasurementSession::new();
    session.start();
    // alternate levels 6 dB apart; the power-domain mean leans loud
    for tick in 0..20 {
        let level = if tick % 2 == 0 { -63.0 } else { -69.0 };
        session.push_snapshot(flat_measurement(level));
    }
    session.stop();
    let averaged = session.averaged();
    assert_eq!(averaged.len(), NUM_BANDS);
    assert!(averaged[0].level > -66.0, "power mean must lean loud");

    let json = serde_json::to_string(&serde_json::json!({
        "bands": BAND_FREQUENCIES
            .iter()
            .map(|f| serde_json::json!({"freq": f, "p10": -61.0, "median": -60.0, "p90": -59.0}))
            .collect::<Vec<_>>()
    }))?;
    let reference = load_reference_json(&json)?;
    assert_eq!(reference.len(), NUM_BANDS);

    let engine = FitEngine::new();
    let ticket = engine.submit_fit(
        FitInput {
            measurement: averaged,
            reference,
            start_q: Array1::from_elem(NUM_BANDS, DEFAULT_Q),
            sample_rate: 48000.0,
            input_gain_db: 0.0,
        },
        FitConfig::default(),
    )?;

    let output = ticket.wait().expect("worker delivered")?;
    assert_eq!(output.gain_db.len(), NUM_BANDS);
    assert_eq!(output.q.len(), NUM_BANDS);
    assert_eq!(output.residual_db.len(), NUM_BANDS);

    // flat vs flat: the offset absorbs the level difference
    for band in 0..NUM_BANDS {
        assert!(output.gain_db[band].abs() < 0.5);
        assert!((0.3..=10.0).contains(&output.q[band]));
    }
    assert!(output.input_gain_db.abs() < 0.5);
    Ok(())
}

/// A sharp bass peak/dip pair ends up as two broad corrections instead of a
/// comb of narrow ones.
#[test]
fn room_mode_gets_a_broad_correction() {
    let mut measurement = flat_measurement(-60.0);
    let reference = flat_reference(-60.0);

    // +10 dB room-mode peak at 63 Hz, -10 dB null at 125 Hz in the measurement
    let peak = BAND_FREQUENCIES.iter().position(|&f| f == 63.0).unwrap();
    let dip = BAND_FREQUENCIES.iter().position(|&f| f == 125.0).unwrap();
    measurement[peak].level = -50.0;
    measurement[dip].level = -70.0;

    let input = FitInput {
        measurement,
        reference,
        start_q: Array1::from_elem(NUM_BANDS, DEFAULT_Q),
        sample_rate: 48000.0,
        input_gain_db: 0.0,
    };
    let output = eqmatch::engine::run_fit(&input, &FitConfig::default()).unwrap();

    for band in 0..NUM_BANDS {
        assert!((-12.0..=12.0).contains(&output.gain_db[band]));
        assert!((0.3..=10.0).contains(&output.q[band]));
    }
    // the correction cuts the peak and fills the dip
    assert!(output.residual_db[peak] < 0.0 || output.residual_db[dip] > 0.0);
}

//! Log-frequency interpolation over band curves.
//!
//! The solver evaluates targets on a grid far denser than the 31 parametric
//! bands, so every curve lookup goes through this sampler instead of reading
//! the discrete points directly.

use crate::bands::DISPLAY_FLOOR_DB;
use crate::reference::ReferenceBand;
use crate::spectrum::BandLevel;

/// A point on a frequency-ordered curve that can be sampled.
pub trait BandPoint {
    /// Frequency of the point in Hz.
    fn frequency(&self) -> f64;
    /// Level of the point in dB.
    fn level_db(&self) -> f64;
}

impl BandPoint for BandLevel {
    fn frequency(&self) -> f64 {
        self.frequency
    }
    fn level_db(&self) -> f64 {
        self.level
    }
}

impl BandPoint for ReferenceBand {
    fn frequency(&self) -> f64 {
        self.freq
    }
    /// References are sampled through their median.
    fn level_db(&self) -> f64 {
        self.median
    }
}

/// Interpolate a dB value at `freq` from a frequency-ascending band sequence.
///
/// Queries outside the sequence's range clamp to the nearest endpoint value;
/// queries between two points interpolate linearly in log10-frequency space.
/// An empty sequence returns the display floor.
pub fn sample_db<P: BandPoint>(bands: &[P], freq: f64) -> f64 {
    let Some(first) = bands.first() else {
        return DISPLAY_FLOOR_DB;
    };
    let last = bands.last().unwrap();

    if freq <= first.frequency() {
        return first.level_db();
    }
    if freq >= last.frequency() {
        return last.level_db();
    }

    // locate the bracketing pair
    let mut hi = 1;
    while hi < bands.len() - 1 && bands[hi].frequency() < freq {
        hi += 1;
    }
    let lo = hi - 1;

    let f0 = bands[lo].frequency().max(1e-12);
    let f1 = bands[hi].frequency().max(1e-12);
    let v0 = bands[lo].level_db();
    let v1 = bands[hi].level_db();
    if (f1 - f0).abs() < 1e-12 {
        return v0;
    }

    let t = (freq.log10() - f0.log10()) / (f1.log10() - f0.log10());
    v0 + t * (v1 - v0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn curve() -> Vec<BandLevel> {
        vec![
            BandLevel { frequency: 100.0, level: -10.0 },
            BandLevel { frequency: 1000.0, level: 0.0 },
            BandLevel { frequency: 10000.0, level: -6.0 },
        ]
    }

    #[test]
    fn out_of_range_clamps_to_endpoints() {
        let c = curve();
        assert_eq!(sample_db(&c, 10.0), -10.0);
        assert_eq!(sample_db(&c, 20000.0), -6.0);
    }

    #[test]
    fn exact_frequencies_return_the_entry_value() {
        let c = curve();
        assert_eq!(sample_db(&c, 100.0), -10.0);
        assert_eq!(sample_db(&c, 1000.0), 0.0);
        assert_eq!(sample_db(&c, 10000.0), -6.0);
    }

    #[test]
    fn interpolation_is_linear_in_log_frequency() {
        let c = curve();
        // geometric midpoint of 100 and 1000 is halfway in log space
        let mid = sample_db(&c, (100.0f64 * 1000.0).sqrt());
        assert!((mid - (-5.0)).abs() < 1e-9);
    }

    #[test]
    fn empty_sequence_returns_the_floor() {
        let c: Vec<BandLevel> = Vec::new();
        assert_eq!(sample_db(&c, 1000.0), DISPLAY_FLOOR_DB);
    }
}

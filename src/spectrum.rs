//! Reduction of FFT magnitude frames to third-octave band levels.
//!
//! The estimator is a pure function: the pre-filter and post-filter signal
//! paths call it independently and share no state.

use crate::bands::{ANALYSIS_FLOOR_DB, BAND_EDGE_RATIO, BAND_FREQUENCIES};
use serde::{Deserialize, Serialize};

/// One third-octave band level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandLevel {
    /// Band center frequency in Hz (one of the 31 fixed centers).
    pub frequency: f64,
    /// Band level in dB.
    pub level: f64,
}

/// Reduce a windowed FFT magnitude frame to third-octave band levels
///
/// # Arguments
/// * `magnitudes` - Magnitude spectrum of a Hann-windowed frame; the slice
///   length is the FFT size (a power of two), bins above N/2 are ignored
/// * `sample_rate` - Sample rate in Hz
///
/// # Returns
/// Band levels ordered by ascending frequency. Bands whose lower edge reaches
/// the Nyquist frequency are omitted, so fewer than 31 entries may be
/// returned at low sample rates.
///
/// # Details
/// Per band, the power (squared magnitude, normalized by the FFT size) of all
/// bins between the band edges is averaged, converted back to magnitude and
/// then to dB with a -160 dB floor substituted for non-positive magnitudes.
pub fn band_levels(magnitudes: &[f64], sample_rate: f64) -> Vec<BandLevel> {
    let fft_size = magnitudes.len();
    let mut out = Vec::with_capacity(BAND_FREQUENCIES.len());
    if fft_size < 4 || sample_rate <= 0.0 {
        return out;
    }

    let nyquist = sample_rate / 2.0;
    let fft_norm = fft_size as f64;
    let bin_width = sample_rate / fft_norm;
    let max_bin = fft_size / 2 - 1;

    for &center in &BAND_FREQUENCIES {
        let lower_freq = center / BAND_EDGE_RATIO;
        let upper_freq = (center * BAND_EDGE_RATIO).min(nyquist);

        if lower_freq >= nyquist {
            break;
        }

        let lower_bin = ((lower_freq / bin_width).floor() as usize).clamp(1, max_bin);
        let upper_bin = ((upper_freq / bin_width).ceil() as usize).clamp(1, max_bin);
        if upper_bin < lower_bin {
            continue;
        }

        let mut band_energy = 0.0;
        for &mag in &magnitudes[lower_bin..=upper_bin] {
            let m = mag / fft_norm;
            band_energy += m * m;
        }
        band_energy /= (upper_bin - lower_bin + 1) as f64;

        let band_magnitude = band_energy.sqrt();
        let level = if band_magnitude > 0.0 {
            (20.0 * band_magnitude.log10()).max(ANALYSIS_FLOOR_DB)
        } else {
            ANALYSIS_FLOOR_DB
        };

        out.push(BandLevel {
            frequency: center,
            level,
        });
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bands::NUM_BANDS;

    #[test]
    fn silence_sits_on_the_floor() {
        let mags = vec![0.0; 4096];
        let levels = band_levels(&mags, 48000.0);
        assert_eq!(levels.len(), NUM_BANDS);
        for b in levels {
            assert_eq!(b.level, ANALYSIS_FLOOR_DB);
        }
    }

    #[test]
    fn single_bin_lands_in_its_band() {
        let fft_size = 4096usize;
        let sample_rate = 48000.0;
        let mut mags = vec![0.0; fft_size];
        // place energy at 1 kHz
        let bin = (1000.0 * fft_size as f64 / sample_rate).round() as usize;
        mags[bin] = fft_size as f64; // unit magnitude after normalization

        let levels = band_levels(&mags, sample_rate);
        let loudest = levels
            .iter()
            .max_by(|a, b| a.level.partial_cmp(&b.level).unwrap())
            .unwrap();
        assert_eq!(loudest.frequency, 1000.0);
        assert!(loudest.level > ANALYSIS_FLOOR_DB + 60.0);
    }

    #[test]
    fn bands_above_nyquist_are_omitted() {
        let mags = vec![0.0; 1024];
        let levels = band_levels(&mags, 16000.0);
        // nyquist 8 kHz: bands whose lower edge reaches 8 kHz are dropped
        assert!(levels.len() < NUM_BANDS);
        assert!(levels.last().unwrap().frequency < 8000.0 * BAND_EDGE_RATIO);
    }
}

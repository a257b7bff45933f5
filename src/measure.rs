//! Measurement sessions: snapshot collection and power-domain averaging.
//!
//! Snapshots are appended on a timer tick while a session is armed; only a
//! stopped session is averaged, so readers never race the writer.

use crate::bands::ANALYSIS_FLOOR_DB;
use crate::spectrum::BandLevel;
use log::debug;

/// One instant of the pre-filter spectrum during a measurement session.
pub type MeasurementSnapshot = Vec<BandLevel>;

/// A user-delimited measurement session.
///
/// `start` clears and arms the buffer, `stop` disarms it, `clear` resets
/// everything. Snapshots pushed while disarmed are dropped.
#[derive(Debug, Clone, Default)]
pub struct MeasurementSession {
    snapshots: Vec<MeasurementSnapshot>,
    measuring: bool,
}

impl MeasurementSession {
    /// Create an idle session with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear the buffer and start collecting snapshots.
    pub fn start(&mut self) {
        self.snapshots.clear();
        self.measuring = true;
        debug!("measurement started");
    }

    /// Stop collecting. The buffer is kept for averaging.
    pub fn stop(&mut self) {
        self.measuring = false;
        debug!("measurement stopped, {} snapshots collected", self.snapshots.len());
    }

    /// Drop all collected snapshots and disarm.
    pub fn clear(&mut self) {
        self.snapshots.clear();
        self.measuring = false;
    }

    /// Whether snapshots are currently being collected.
    pub fn is_measuring(&self) -> bool {
        self.measuring
    }

    /// Number of snapshots collected so far.
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Whether no snapshots have been collected.
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Append one spectrum snapshot. Ignored when the session is not armed or
    /// the snapshot is empty.
    pub fn push_snapshot(&mut self, snapshot: MeasurementSnapshot) {
        if self.measuring && !snapshot.is_empty() {
            self.snapshots.push(snapshot);
        }
    }

    /// Average the collected snapshots in the power domain.
    ///
    /// Per band, dB levels are converted to linear power, arithmetic-averaged
    /// across every snapshot containing that band and converted back to dB.
    /// Averaging in the dB domain would bias the result toward loud
    /// transients and is deliberately not done here.
    ///
    /// Returns an empty vector when no snapshots were collected; callers must
    /// treat that as "no measurement available".
    pub fn averaged(&self) -> Vec<BandLevel> {
        average_power_domain(&self.snapshots)
    }
}

/// Power-domain average of a snapshot buffer. See [`MeasurementSession::averaged`].
pub fn average_power_domain(snapshots: &[MeasurementSnapshot]) -> Vec<BandLevel> {
    let Some(first) = snapshots.first() else {
        return Vec::new();
    };

    let num_bands = first.len();
    let floor_power = 10f64.powf(ANALYSIS_FLOOR_DB / 10.0);
    let mut averaged = Vec::with_capacity(num_bands);

    for band in 0..num_bands {
        let mut power_sum = 0.0;
        let mut valid = 0usize;
        for snapshot in snapshots {
            if let Some(point) = snapshot.get(band) {
                power_sum += 10f64.powf(point.level / 10.0);
                valid += 1;
            }
        }

        let level = if valid > 0 {
            let mean_power = power_sum / valid as f64;
            if mean_power <= floor_power {
                ANALYSIS_FLOOR_DB
            } else {
                10.0 * mean_power.log10()
            }
        } else {
            ANALYSIS_FLOOR_DB
        };

        averaged.push(BandLevel {
            frequency: first[band].frequency,
            level,
        });
    }

    averaged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bands::BAND_FREQUENCIES;

    fn flat_snapshot(level: f64) -> MeasurementSnapshot {
        BAND_FREQUENCIES
            .iter()
            .map(|&frequency| BandLevel { frequency, level })
            .collect()
    }

    #[test]
    fn identical_snapshots_average_to_themselves() {
        let mut session = MeasurementSession::new();
        session.start();
        for _ in 0..8 {
            session.push_snapshot(flat_snapshot(-23.0));
        }
        session.stop();

        let avg = session.averaged();
        assert_eq!(avg.len(), 31);
        for b in avg {
            assert!((b.level + 23.0).abs() < 1e-9);
        }
    }

    #[test]
    fn averaging_happens_in_the_power_domain() {
        // -100 dB and 0 dB must not average to -50 dB; the correct power-domain
        // mean is 10*log10((1e-10 + 1)/2) which is about -3.01 dB.
        let snapshots = vec![flat_snapshot(-100.0), flat_snapshot(0.0)];
        let avg = average_power_domain(&snapshots);
        for b in avg {
            assert!((b.level - (-3.0103)).abs() < 0.01, "got {}", b.level);
            assert!((b.level - (-50.0)).abs() > 40.0);
        }
    }

    #[test]
    fn empty_buffer_yields_empty_result() {
        let session = MeasurementSession::new();
        assert!(session.averaged().is_empty());
    }

    #[test]
    fn snapshots_are_dropped_while_disarmed() {
        let mut session = MeasurementSession::new();
        session.push_snapshot(flat_snapshot(0.0));
        assert!(session.is_empty());

        session.start();
        session.push_snapshot(flat_snapshot(0.0));
        session.push_snapshot(Vec::new());
        session.stop();
        session.push_snapshot(flat_snapshot(0.0));
        assert_eq!(session.len(), 1);
    }
}

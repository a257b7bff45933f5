#![doc = include_str!("../README.md")]

/// Error types for eqmatch operations.
pub mod error;
pub use error::{EqMatchError, Result};

/// Third-octave band table and frequency-grid helpers
pub mod bands;
/// Hybrid bass correction for room-mode dominated residuals
pub mod bass;
/// Fit-job orchestration and asynchronous execution
pub mod engine;
/// Broadband makeup gain estimation
pub mod makeup;
/// Measurement sessions and power-domain averaging
pub mod measure;
/// Filter parameter storage and ranges
pub mod params;
/// Reference curve analysis, post-processing and loading
pub mod reference;
/// Residual (correction target) construction
pub mod residual;
/// Log-frequency sampling of band curves
pub mod sampler;
/// Moving-average smoothing helpers
pub mod smooth;
/// Curve-fitting solver for band gains and Qs
pub mod solver;
/// FFT magnitude to third-octave band levels
pub mod spectrum;

// Re-export commonly used items
pub use bands::{BAND_FREQUENCIES, NUM_BANDS};
pub use bass::{BassConfig, BassCorrection};
pub use engine::{FitConfig, FitEngine, FitInput, FitOutput, Ticket};
pub use measure::MeasurementSession;
pub use params::FilterParams;
pub use reference::{ReferenceAnalysisConfig, ReferenceBand};
pub use residual::ResidualConfig;
pub use solver::SolverConfig;
pub use spectrum::BandLevel;

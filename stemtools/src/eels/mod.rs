//! Electron energy-loss spectroscopy (EELS) spectrum-image analysis.
//!
//! Spectrum images are `(energy, y, x)` cubes. The energy axis is linear,
//! described by an [`EnergyAxis`] (channel of zero loss and eV per channel).
//!
//! - **denoise**: median and wavelet cleaning of single spectra and cubes
//! - **background**: power-law background fits and edge intensity maps

pub mod background;
pub mod denoise;

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use stem_math::StatsError;
use thiserror::Error;

pub use background::{eels_3d, energy_index, powerlaw_fit, region_intensity, PowerLawFit};
pub use denoise::{clean_eels_3d, denoise_1d, denoise_1d_median, DenoiseMethod};

/// Errors raised by the spectral routines
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EelsError {
    #[error("Energy axis has {energy} samples but the spectrum has {intensity}")]
    LengthMismatch { energy: usize, intensity: usize },

    #[error("Energy axis must increase, median step is {0}")]
    InvalidEnergyAxis(f64),

    #[error("Power-law fit needs at least {required} positive samples, got {found}")]
    TooFewPoints { found: usize, required: usize },

    #[error("Energy window selects no channels (indices {start}..{stop})")]
    EmptyWindow { start: usize, stop: usize },

    #[error("Median window must be odd, got {0}")]
    EvenWindow(usize),

    #[error("Wavelet threshold must be finite and non-negative, got {0}")]
    InvalidThreshold(f64),

    #[error("{fit} fit ranges given for {peak} peak ranges")]
    RangeCountMismatch { fit: usize, peak: usize },

    #[error("Statistics failed: {0}")]
    Stats(#[from] StatsError),
}

/// Linear energy calibration of a spectrum
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnergyAxis {
    /// Channel (fractional) holding zero energy loss
    pub origin: f64,
    /// Energy step per channel, eV
    pub dispersion: f64,
}

impl EnergyAxis {
    /// Energy of every channel of an `n`-channel spectrum
    pub fn energies(&self, n: usize) -> Array1<f64> {
        Array1::from_shape_fn(n, |i| (i as f64 - self.origin) * self.dispersion)
    }
}

//! Image processing primitives used by the diffraction and spectral pipelines.
//!
//! - **fourier**: 2D FFT helpers, hybrid cross-correlation, Fourier shifts
//! - **sobel**: gradient magnitude and direction
//! - **intensity**: log scaling, display normalization, hot-pixel clamping
//! - **gaussian_fit**: sub-pixel peak localization
//! - **rotate**: quintic-spline image rotation

pub mod fourier;
pub mod gaussian_fit;
pub mod intensity;
pub mod rotate;
pub mod sobel;

use stem_math::StatsError;
use thiserror::Error;

pub use fourier::{cross_corr, fft2, fftshift, fourier_shift, ifft2};
pub use gaussian_fit::{gaussian_peak_fit, GaussianPeak, PeakFitConfig};
pub use intensity::{clamp_outliers, log_scale, normalize_for_display};
pub use rotate::{rotate_image, rotate_spline, spline_coefficients};
pub use sobel::sobel_edges;

/// Errors raised by the image processing primitives
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ImageProcError {
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Image has no pixels")]
    EmptyImage,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Fit window holds {found} pixels, at least {required} needed")]
    TooFewPixels { found: usize, required: usize },

    #[error("Fit window at ({x:.2}, {y:.2}) is flat")]
    FlatWindow { x: f64, y: f64 },

    #[error("Statistics failed: {0}")]
    Stats(#[from] StatsError),
}

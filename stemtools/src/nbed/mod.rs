//! Nanobeam electron diffraction (NBED) analysis.
//!
//! - **disks**: locate diffraction disks and fit the reciprocal lattice basis
//! - **strain**: per-pattern strain relative to a reference basis
//! - **dataset**: reshaping, binning and preprocessing of 4D datasets
//! - **alignment**: pattern rotation search and re-centring

pub mod alignment;
pub mod dataset;
pub mod disks;
pub mod strain;

use stem_math::{LstsqError, MinimizeError, ResampleError};
use thiserror::Error;

use crate::image_proc::ImageProcError;

pub use alignment::{angle_objective, rotate_and_center_roi, rotation_finder};
pub use dataset::{bin_4d, data4d_to_2d, log_sobel};
pub use disks::{central_disk_index, fit_nbed_disks, DiskFit};
pub use strain::{
    strain_in_roi, strain_oldstyle, PatternRegistrator, ReferenceBasis, StrainComponents,
    StrainConfig, StrainMaps, StrainRoi,
};

/// Errors from locating disks and fitting the lattice basis
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DiskFitError {
    #[error("Got {positions} disk positions but {indices} lattice indices")]
    LengthMismatch { positions: usize, indices: usize },

    #[error("No (0, 0) entry among the lattice indices")]
    MissingCentralDisk,

    #[error("Lattice indices contain {0} (0, 0) entries")]
    AmbiguousCentralDisk(usize),

    #[error("Disk size must be positive and finite, got {0}")]
    InvalidDiskSize(f64),

    #[error("Peak fit failed for disk {index}: {source}")]
    PeakFit {
        index: usize,
        #[source]
        source: ImageProcError,
    },

    #[error("Lattice basis fit failed: {0}")]
    Basis(#[from] LstsqError),
}

/// Errors from registering a single pattern against the center disk
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistrationError {
    #[error("Pattern shape {actual:?} does not match the center disk {expected:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Non-finite intensity at row {row}, col {col}")]
    NonFinite { row: usize, col: usize },

    #[error("Preprocessing failed: {0}")]
    Preprocess(#[from] ImageProcError),

    #[error("Disk fit failed: {0}")]
    DiskFit(#[from] DiskFitError),
}

/// Errors from the strain pipelines
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StrainError {
    #[error("ROI contains no patterns")]
    EmptyRoi,

    #[error("Pattern shape {actual:?} does not match the center disk {expected:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Center disk has no positive area (sum {0})")]
    EmptyDiskMask(f64),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Reference lattice basis is singular")]
    SingularBasis,

    #[error("Reference pattern failed: {0}")]
    Reference(#[source] RegistrationError),

    #[error("Pattern {index} failed: {source}")]
    Pattern {
        index: usize,
        #[source]
        source: RegistrationError,
    },
}

/// Errors from dataset reshaping and rotation alignment
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DatasetError {
    #[error("Binning factor must be positive and finite, got {0}")]
    InvalidFactor(f64),

    #[error("Dataset has no patterns")]
    EmptyDataset,

    #[error("Resampling failed: {0}")]
    Resample(#[from] ResampleError),

    #[error("Image processing failed: {0}")]
    ImageProc(#[from] ImageProcError),

    #[error("Rotation search failed: {0}")]
    Minimize(#[from] MinimizeError),
}

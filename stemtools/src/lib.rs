//! Analysis of multidimensional STEM datasets.
//!
//! The central workflow is strain mapping from 4D nanobeam electron
//! diffraction scans:
//!
//! ```text
//! 4D dataset ─► (bin_4d) ─► extract_roi ─► strain_in_roi ─► StrainRoi::to_maps
//!                              ▲                │
//!                       threshold_roi /   per pattern: edge enhance,
//!                       circular_aperture  cross_corr, fit_nbed_disks,
//!                                          T = axes · ref⁻¹
//! ```
//!
//! Alongside it, the `eels` module maps ionization-edge intensities in
//! spectrum images by power-law background subtraction.

pub mod eels;
pub mod geometry;
pub mod image_proc;
pub mod nbed;

pub use eels::{EelsError, EnergyAxis};
pub use geometry::{
    aperture_image, circular_aperture, extract_roi, gather_from_map, scatter_to_map,
    threshold_roi, GeometryError, ThresholdMode,
};
pub use image_proc::ImageProcError;
pub use nbed::{
    fit_nbed_disks, strain_in_roi, strain_oldstyle, DatasetError, DiskFitError, ReferenceBasis,
    RegistrationError, StrainConfig, StrainError, StrainRoi,
};

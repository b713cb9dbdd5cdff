//! Disk localization and lattice basis fitting.
//!
//! Each disk is refined with a Gaussian fit around its starting position.
//! Disk positions are then expressed relative to the (0, 0) disk with the
//! y axis flipped to point up, and the reciprocal basis `L` is the
//! least-squares solution of `indices · L = locations`. The rows of `L`
//! are the two lattice vectors.

use nalgebra::Matrix2;
use ndarray::ArrayView2;
use stem_math::lstsq_2col;

use super::DiskFitError;
use crate::image_proc::{gaussian_peak_fit, PeakFitConfig};

/// Result of fitting a set of disks in one image
#[derive(Debug, Clone, PartialEq)]
pub struct DiskFit {
    /// Fitted disk centres `(x, y)` in image coordinates, in input order
    pub fitted_disks: Vec<(f64, f64)>,
    /// Fitted position of the (0, 0) disk, image coordinates
    pub center: (f64, f64),
    /// Rows are the lattice vectors g1 and g2, Cartesian with y up
    pub lattice_basis: Matrix2<f64>,
}

/// Position of the unique `(0, 0)` entry in `diff_spots`.
pub fn central_disk_index(diff_spots: &[(f64, f64)]) -> Result<usize, DiskFitError> {
    let central: Vec<usize> = diff_spots
        .iter()
        .enumerate()
        .filter(|(_, &(h, k))| h == 0.0 && k == 0.0)
        .map(|(i, _)| i)
        .collect();
    match central.as_slice() {
        [] => Err(DiskFitError::MissingCentralDisk),
        [index] => Ok(*index),
        many => Err(DiskFitError::AmbiguousCentralDisk(many.len())),
    }
}

/// Locate the disks of one pattern and fit its lattice basis.
///
/// # Arguments
/// * `image` - Pattern or correlation surface holding the disks
/// * `disk_size` - Fit window radius in pixels
/// * `positions` - Starting guesses `(x, y)`, one per disk
/// * `diff_spots` - Lattice indices `(h, k)` of each disk; exactly one must
///   be `(0, 0)`
/// * `config` - Peak fit settings
///
/// # Errors
/// * `DiskFitError::LengthMismatch` - `positions` and `diff_spots` differ in length
/// * `DiskFitError::MissingCentralDisk` / `AmbiguousCentralDisk` - no unique `(0, 0)`
/// * `DiskFitError::PeakFit` - a disk window could not be fitted
/// * `DiskFitError::Basis` - the indices do not span two dimensions
pub fn fit_nbed_disks(
    image: ArrayView2<f64>,
    disk_size: f64,
    positions: &[(f64, f64)],
    diff_spots: &[(f64, f64)],
    config: &PeakFitConfig,
) -> Result<DiskFit, DiskFitError> {
    if positions.len() != diff_spots.len() {
        return Err(DiskFitError::LengthMismatch {
            positions: positions.len(),
            indices: diff_spots.len(),
        });
    }
    if !(disk_size > 0.0) || !disk_size.is_finite() {
        return Err(DiskFitError::InvalidDiskSize(disk_size));
    }
    let central = central_disk_index(diff_spots)?;

    let fitted_disks = positions
        .iter()
        .enumerate()
        .map(|(index, &(x, y))| {
            gaussian_peak_fit(image, x, y, disk_size, config)
                .map(|peak| (peak.x, peak.y))
                .map_err(|source| DiskFitError::PeakFit { index, source })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let center = fitted_disks[central];
    let locations: Vec<[f64; 2]> = fitted_disks
        .iter()
        .map(|&(x, y)| [x - center.0, center.1 - y])
        .collect();
    let indices: Vec<[f64; 2]> = diff_spots.iter().map(|&(h, k)| [h, k]).collect();

    let lattice_basis = lstsq_2col(&indices, &locations)?;
    log::trace!(
        "Fitted {} disks, center ({:.3}, {:.3})",
        fitted_disks.len(),
        center.0,
        center.1
    );

    Ok(DiskFit {
        fitted_disks,
        center,
        lattice_basis,
    })
}

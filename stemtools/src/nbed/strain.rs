//! Strain mapping from nanobeam diffraction patterns.
//!
//! For every pattern in an ROI the lattice basis is measured by correlating
//! the pattern against the central disk and fitting the correlation peaks.
//! The deformation relative to a reference basis is
//!
//! ```text
//! T = pattern_axes · reference_axes⁻¹      S = T − I
//! ```
//!
//! and the reported components are
//!
//! ```text
//! e_xx = −S₀₀    e_yy = −S₁₁    e_xy = −(S₀₁ + S₁₀)    e_θ = S₀₁ − S₁₀
//! ```
//!
//! The basis lives in reciprocal space, hence the negated normal and shear
//! terms. Shear is the full sum of the off-diagonal terms, not half of it.
//!
//! Two registration pipelines are provided:
//!
//! - [`strain_in_roi`] edge-enhances each pattern (log scale, Sobel
//!   magnitude, hot-pixel clamp) and correlates it against the Sobel edges
//!   of the central disk. Robust to uneven disk filling.
//! - [`strain_oldstyle`] correlates the raw pattern against the central
//!   disk directly.

use nalgebra::Matrix2;
use ndarray::{Array1, Array2, ArrayView2, ArrayView3, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use super::disks::fit_nbed_disks;
use super::{RegistrationError, StrainError};
use crate::geometry::{scatter_to_map, GeometryError};
use crate::image_proc::{clamp_outliers, cross_corr, log_scale, sobel_edges, PeakFitConfig};

/// Where the undeformed lattice basis comes from
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum ReferenceBasis {
    /// Fit the mean pattern of the ROI
    #[default]
    MeanPattern,
    /// Externally measured basis, rows are the lattice vectors
    Supplied(Matrix2<f64>),
}

/// Settings shared by both strain pipelines
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrainConfig {
    /// Edge responses above `med_factor × median` are clamped to the median
    pub med_factor: f64,
    /// Magnitude exponent of the hybrid correlation
    pub hybridizer: f64,
    pub reference: ReferenceBasis,
    /// Worker threads; `None` uses one per logical CPU
    pub threads: Option<usize>,
    pub peak_fit: PeakFitConfig,
}

impl Default for StrainConfig {
    fn default() -> Self {
        Self {
            med_factor: 10.0,
            hybridizer: 0.1,
            reference: ReferenceBasis::MeanPattern,
            threads: None,
            peak_fit: PeakFitConfig::default(),
        }
    }
}

/// Strain tensor components of a single pattern
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StrainComponents {
    pub e_xx: f64,
    pub e_xy: f64,
    pub e_theta: f64,
    pub e_yy: f64,
}

impl StrainComponents {
    /// Decompose `pattern_axes · inverse_reference − I`.
    pub fn from_bases(pattern_axes: &Matrix2<f64>, inverse_reference: &Matrix2<f64>) -> Self {
        let s = pattern_axes * inverse_reference - Matrix2::identity();
        Self {
            e_xx: -s[(0, 0)],
            e_xy: -(s[(0, 1)] + s[(1, 0)]),
            e_theta: s[(0, 1)] - s[(1, 0)],
            e_yy: -s[(1, 1)],
        }
    }
}

/// Per-pattern strain over an ROI, in ROI order
#[derive(Debug, Clone, PartialEq)]
pub struct StrainRoi {
    pub e_xx: Array1<f64>,
    pub e_xy: Array1<f64>,
    pub e_theta: Array1<f64>,
    pub e_yy: Array1<f64>,
}

/// Strain components scattered back onto the scan grid, zero outside the ROI
#[derive(Debug, Clone, PartialEq)]
pub struct StrainMaps {
    pub e_xx: Array2<f64>,
    pub e_xy: Array2<f64>,
    pub e_theta: Array2<f64>,
    pub e_yy: Array2<f64>,
}

impl StrainRoi {
    fn from_components(components: &[StrainComponents]) -> Self {
        let column = |f: fn(&StrainComponents) -> f64| components.iter().map(f).collect();
        Self {
            e_xx: column(|c| c.e_xx),
            e_xy: column(|c| c.e_xy),
            e_theta: column(|c| c.e_theta),
            e_yy: column(|c| c.e_yy),
        }
    }

    pub fn len(&self) -> usize {
        self.e_xx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.e_xx.is_empty()
    }

    /// Components of the `index`-th pattern
    pub fn get(&self, index: usize) -> Option<StrainComponents> {
        Some(StrainComponents {
            e_xx: *self.e_xx.get(index)?,
            e_xy: *self.e_xy.get(index)?,
            e_theta: *self.e_theta.get(index)?,
            e_yy: *self.e_yy.get(index)?,
        })
    }

    /// Scatter every component into a full scan map using the ROI mask the
    /// patterns were extracted with.
    pub fn to_maps(&self, mask: ArrayView2<bool>) -> Result<StrainMaps, GeometryError> {
        Ok(StrainMaps {
            e_xx: scatter_to_map(self.e_xx.view(), mask)?,
            e_xy: scatter_to_map(self.e_xy.view(), mask)?,
            e_theta: scatter_to_map(self.e_theta.view(), mask)?,
            e_yy: scatter_to_map(self.e_yy.view(), mask)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Registration {
    EdgeEnhanced { med_factor: f64 },
    Direct,
}

/// Measures the lattice basis of individual patterns.
///
/// Holds the correlation template and disk geometry so the per-pattern work
/// is a single call. Shared read-only between worker threads.
#[derive(Debug, Clone)]
pub struct PatternRegistrator {
    registration: Registration,
    template: Array2<f64>,
    hybridizer: f64,
    disk_size: f64,
    disk_positions: Vec<(f64, f64)>,
    diff_spots: Vec<(f64, f64)>,
    peak_fit: PeakFitConfig,
}

impl PatternRegistrator {
    /// Registrator for the edge-enhanced pipeline of [`strain_in_roi`]
    pub fn edge_enhanced(
        center_disk: ArrayView2<f64>,
        disk_positions: &[(f64, f64)],
        diff_spots: &[(f64, f64)],
        config: &StrainConfig,
    ) -> Result<Self, StrainError> {
        if !(config.med_factor > 0.0) {
            return Err(StrainError::InvalidConfig(format!(
                "med_factor must be positive, got {}",
                config.med_factor
            )));
        }
        let (template, _) = sobel_edges(center_disk);
        Self::new(
            Registration::EdgeEnhanced {
                med_factor: config.med_factor,
            },
            template,
            center_disk,
            disk_positions,
            diff_spots,
            config,
        )
    }

    /// Registrator for the direct-correlation pipeline of [`strain_oldstyle`]
    pub fn direct(
        center_disk: ArrayView2<f64>,
        disk_positions: &[(f64, f64)],
        diff_spots: &[(f64, f64)],
        config: &StrainConfig,
    ) -> Result<Self, StrainError> {
        Self::new(
            Registration::Direct,
            center_disk.to_owned(),
            center_disk,
            disk_positions,
            diff_spots,
            config,
        )
    }

    fn new(
        registration: Registration,
        template: Array2<f64>,
        center_disk: ArrayView2<f64>,
        disk_positions: &[(f64, f64)],
        diff_spots: &[(f64, f64)],
        config: &StrainConfig,
    ) -> Result<Self, StrainError> {
        let area = center_disk.sum();
        if !(area > 0.0) || !area.is_finite() {
            return Err(StrainError::EmptyDiskMask(area));
        }
        if !(config.hybridizer > 0.0 && config.hybridizer <= 1.0) {
            return Err(StrainError::InvalidConfig(format!(
                "hybridizer must lie in (0, 1], got {}",
                config.hybridizer
            )));
        }

        Ok(Self {
            registration,
            template,
            hybridizer: config.hybridizer,
            disk_size: (area / PI).sqrt(),
            disk_positions: disk_positions.to_vec(),
            diff_spots: diff_spots.to_vec(),
            peak_fit: config.peak_fit,
        })
    }

    /// Radius of the central disk, `sqrt(area / π)`
    pub fn disk_size(&self) -> f64 {
        self.disk_size
    }

    /// Correlation surface of `pattern` against the template
    pub fn correlation(&self, pattern: ArrayView2<f64>) -> Result<Array2<f64>, RegistrationError> {
        if pattern.dim() != self.template.dim() {
            return Err(RegistrationError::ShapeMismatch {
                expected: self.template.dim(),
                actual: pattern.dim(),
            });
        }
        check_finite(pattern)?;
        let surface = match self.registration {
            Registration::EdgeEnhanced { med_factor } => {
                let (edges, _) = sobel_edges(log_scale(pattern)?.view());
                let edges = clamp_outliers(edges.view(), med_factor)?;
                cross_corr(edges.view(), self.template.view(), self.hybridizer)?
            }
            Registration::Direct => {
                cross_corr(pattern, self.template.view(), self.hybridizer)?
            }
        };
        Ok(surface)
    }

    fn fit_basis(&self, pattern: ArrayView2<f64>) -> Result<Matrix2<f64>, RegistrationError> {
        let surface = self.correlation(pattern)?;
        let fit = fit_nbed_disks(
            surface.view(),
            self.disk_size,
            &self.disk_positions,
            &self.diff_spots,
            &self.peak_fit,
        )?;
        Ok(fit.lattice_basis)
    }

    /// Lattice basis of a pattern measured outside an ROI, e.g. a reference
    /// region to pass as [`ReferenceBasis::Supplied`]. Rows are the lattice
    /// vectors.
    pub fn lattice_basis(&self, pattern: ArrayView2<f64>) -> Result<Matrix2<f64>, StrainError> {
        self.fit_basis(pattern).map_err(StrainError::Reference)
    }

    /// Strain of one pattern against an inverted reference basis.
    ///
    /// `index` is only used to label errors.
    pub fn strain(
        &self,
        index: usize,
        pattern: ArrayView2<f64>,
        inverse_reference: &Matrix2<f64>,
    ) -> Result<StrainComponents, StrainError> {
        let axes = self
            .fit_basis(pattern)
            .map_err(|source| StrainError::Pattern { index, source })?;
        let components = StrainComponents::from_bases(&axes, inverse_reference);
        log::trace!("Pattern {index}: {components:?}");
        Ok(components)
    }

    /// Inverse of the reference basis selected by `reference`
    fn inverse_reference(
        &self,
        roi: ArrayView3<f64>,
        reference: &ReferenceBasis,
    ) -> Result<Matrix2<f64>, StrainError> {
        let axes = match reference {
            ReferenceBasis::Supplied(axes) => *axes,
            ReferenceBasis::MeanPattern => {
                let mean = roi.mean_axis(Axis(2)).ok_or(StrainError::EmptyRoi)?;
                self.lattice_basis(mean.view())?
            }
        };
        log::debug!("Reference basis: {axes:?}");
        axes.try_inverse().ok_or(StrainError::SingularBasis)
    }
}

fn check_finite(pattern: ArrayView2<f64>) -> Result<(), RegistrationError> {
    match pattern.indexed_iter().find(|(_, v)| !v.is_finite()) {
        Some(((row, col), _)) => Err(RegistrationError::NonFinite { row, col }),
        None => Ok(()),
    }
}

fn worker_pool(threads: Option<usize>) -> Result<rayon::ThreadPool, StrainError> {
    let workers = threads.unwrap_or_else(num_cpus::get).max(1);
    rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| StrainError::InvalidConfig(format!("thread pool: {e}")))
}

fn run_roi(
    roi: ArrayView3<f64>,
    registrator: &PatternRegistrator,
    config: &StrainConfig,
) -> Result<StrainRoi, StrainError> {
    let (rows, cols, count) = roi.dim();
    if count == 0 {
        return Err(StrainError::EmptyRoi);
    }
    if (rows, cols) != registrator.template.dim() {
        return Err(StrainError::ShapeMismatch {
            expected: registrator.template.dim(),
            actual: (rows, cols),
        });
    }

    // A bad pattern would otherwise surface through the mean reference
    for (index, pattern) in roi.axis_iter(Axis(2)).enumerate() {
        check_finite(pattern).map_err(|source| StrainError::Pattern { index, source })?;
    }

    let inverse_reference = registrator.inverse_reference(roi, &config.reference)?;
    let pool = worker_pool(config.threads)?;
    log::debug!(
        "Strain over {count} patterns of {rows}x{cols}, disk size {:.3}, {} workers",
        registrator.disk_size,
        pool.current_num_threads()
    );

    let components = pool.install(|| {
        (0..count)
            .into_par_iter()
            .map(|index| {
                registrator.strain(index, roi.index_axis(Axis(2), index), &inverse_reference)
            })
            .collect::<Result<Vec<_>, _>>()
    })?;

    Ok(StrainRoi::from_components(&components))
}

/// Strain of every pattern in an ROI using edge-enhanced registration.
///
/// # Arguments
/// * `roi` - Patterns stacked as `(rows, cols, n)`
/// * `center_disk` - Template of the undiffracted disk, centred at
///   `(cols / 2, rows / 2)`; its sum sets the disk size
/// * `disk_positions` - Expected disk positions `(x, y)` in the correlation surface
/// * `diff_spots` - Lattice indices `(h, k)` matching `disk_positions`
/// * `config` - Reference basis, clamp factor and threading
///
/// # Errors
/// Any failing pattern aborts the whole ROI; `StrainError::Pattern` names
/// the pattern index. A singular reference basis is `StrainError::SingularBasis`.
pub fn strain_in_roi(
    roi: ArrayView3<f64>,
    center_disk: ArrayView2<f64>,
    disk_positions: &[(f64, f64)],
    diff_spots: &[(f64, f64)],
    config: &StrainConfig,
) -> Result<StrainRoi, StrainError> {
    let registrator =
        PatternRegistrator::edge_enhanced(center_disk, disk_positions, diff_spots, config)?;
    run_roi(roi, &registrator, config)
}

/// Strain of every pattern in an ROI using direct correlation against the
/// central disk. Arguments and errors as for [`strain_in_roi`];
/// `config.med_factor` is unused.
pub fn strain_oldstyle(
    roi: ArrayView3<f64>,
    center_disk: ArrayView2<f64>,
    disk_positions: &[(f64, f64)],
    diff_spots: &[(f64, f64)],
    config: &StrainConfig,
) -> Result<StrainRoi, StrainError> {
    let registrator = PatternRegistrator::direct(center_disk, disk_positions, diff_spots, config)?;
    run_roi(roi, &registrator, config)
}

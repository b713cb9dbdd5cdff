//! Power-law background subtraction and edge integration.
//!
//! Below an ionization edge the EELS background falls off as `A·E^r`.
//! Fitting that law in a pre-edge window and extrapolating it under the
//! edge isolates the edge signal, whose integral maps the element.
//!
//! Energy windows are converted to channel indices with
//! `floor((e − min(E)) / median(ΔE))`, clamped to `[0, n]`, and are
//! half-open: `[start, stop)`.

use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView3, Axis};
use rayon::prelude::*;
use stem_math::{median, StatsScan};

use super::denoise::{clean_eels_3d, DenoiseMethod};
use super::{EelsError, EnergyAxis};

/// Minimum number of positive samples in a fit window
const MIN_FIT_POINTS: usize = 2;

/// Fitted power-law background `constant · E^power`
#[derive(Debug, Clone, PartialEq)]
pub struct PowerLawFit {
    /// Background evaluated over the whole energy axis
    pub background: Array1<f64>,
    pub power: f64,
    pub constant: f64,
}

struct EnergyGrid {
    min: f64,
    step: f64,
    len: usize,
}

impl EnergyGrid {
    fn new(energy: ArrayView1<f64>) -> Result<Self, EelsError> {
        let len = energy.len();
        if len < 2 {
            return Err(EelsError::TooFewPoints {
                found: len,
                required: 2,
            });
        }
        let step = median(energy.windows(2).into_iter().map(|w| w[1] - w[0]))?;
        if !(step > 0.0) {
            return Err(EelsError::InvalidEnergyAxis(step));
        }
        let min = StatsScan::from_iter_values(energy.iter().copied()).min()?;
        Ok(Self { min, step, len })
    }

    fn index(&self, value: f64) -> usize {
        let raw = ((value - self.min) / self.step).floor();
        if raw <= 0.0 {
            0
        } else {
            (raw as usize).min(self.len)
        }
    }

    fn window(&self, range: (f64, f64)) -> Result<(usize, usize), EelsError> {
        let start = self.index(range.0);
        let stop = self.index(range.1);
        if start >= stop {
            return Err(EelsError::EmptyWindow { start, stop });
        }
        Ok((start, stop))
    }
}

fn check_lengths(energy: &ArrayView1<f64>, intensity: &ArrayView1<f64>) -> Result<(), EelsError> {
    if energy.len() != intensity.len() {
        return Err(EelsError::LengthMismatch {
            energy: energy.len(),
            intensity: intensity.len(),
        });
    }
    Ok(())
}

/// Channel index of `value` on the energy axis.
pub fn energy_index(energy: ArrayView1<f64>, value: f64) -> Result<usize, EelsError> {
    Ok(EnergyGrid::new(energy)?.index(value))
}

/// Fit `I = A·E^r` over the channels of `fit_range`.
///
/// The fit is a straight line in log-log space. Only channels with
/// positive energy and positive intensity enter the fit.
///
/// # Errors
/// * `EelsError::LengthMismatch` - axis and spectrum differ in length
/// * `EelsError::InvalidEnergyAxis` - energy does not increase
/// * `EelsError::EmptyWindow` - `fit_range` covers no channels
/// * `EelsError::TooFewPoints` - fewer than two distinct usable channels
pub fn powerlaw_fit(
    energy: ArrayView1<f64>,
    intensity: ArrayView1<f64>,
    fit_range: (f64, f64),
) -> Result<PowerLawFit, EelsError> {
    check_lengths(&energy, &intensity)?;
    let grid = EnergyGrid::new(energy)?;
    let (start, stop) = grid.window(fit_range)?;

    let points: Vec<(f64, f64)> = (start..stop)
        .filter(|&i| energy[i] > 0.0 && intensity[i] > 0.0)
        .map(|i| (energy[i].ln(), intensity[i].ln()))
        .collect();
    let too_few = EelsError::TooFewPoints {
        found: points.len(),
        required: MIN_FIT_POINTS,
    };
    if points.len() < MIN_FIT_POINTS {
        return Err(too_few);
    }

    let n = points.len() as f64;
    let mean_x = points.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = points.iter().map(|p| p.1).sum::<f64>() / n;
    let sxx: f64 = points.iter().map(|p| (p.0 - mean_x).powi(2)).sum();
    let sxy: f64 = points
        .iter()
        .map(|p| (p.0 - mean_x) * (p.1 - mean_y))
        .sum();
    if !(sxx > 0.0) {
        return Err(too_few);
    }

    let power = sxy / sxx;
    let constant = (mean_y - power * mean_x).exp();
    log::trace!("Power law over channels {start}..{stop}: {constant:.4e} E^{power:.4}");

    Ok(PowerLawFit {
        background: energy.mapv(|e| constant * e.powf(power)),
        power,
        constant,
    })
}

/// Integrated edge intensity above the power-law background.
///
/// The background fitted over `fit_range` is subtracted, and the residual
/// over `peak_range` is summed after lifting its minimum to zero.
pub fn region_intensity(
    energy: ArrayView1<f64>,
    intensity: ArrayView1<f64>,
    fit_range: (f64, f64),
    peak_range: (f64, f64),
) -> Result<f64, EelsError> {
    let fit = powerlaw_fit(energy, intensity, fit_range)?;
    let (start, stop) = EnergyGrid::new(energy)?.window(peak_range)?;

    let residual: Vec<f64> = (start..stop)
        .map(|i| intensity[i] - fit.background[i])
        .collect();
    let floor = StatsScan::new(&residual).min()?;
    Ok(residual.iter().map(|r| r - floor).sum())
}

/// Edge intensity maps of a spectrum image.
///
/// # Arguments
/// * `cube` - Spectrum image `(energy, y, x)`
/// * `axis` - Energy calibration of the first axis
/// * `fit_ranges` - Background window for each edge, eV
/// * `peak_ranges` - Integration window for each edge, eV
/// * `clean_window` - Median window applied to every spectrum first; 0 skips
///
/// # Returns
/// Array of shape `(y, x, edges)`
pub fn eels_3d(
    cube: ArrayView3<f64>,
    axis: EnergyAxis,
    fit_ranges: &[(f64, f64)],
    peak_ranges: &[(f64, f64)],
    clean_window: usize,
) -> Result<Array3<f64>, EelsError> {
    if fit_ranges.len() != peak_ranges.len() {
        return Err(EelsError::RangeCountMismatch {
            fit: fit_ranges.len(),
            peak: peak_ranges.len(),
        });
    }

    let cleaned;
    let data: ArrayView3<f64> = if clean_window > 0 {
        cleaned = clean_eels_3d(
            cube,
            DenoiseMethod::Median {
                window: clean_window,
            },
        )?;
        cleaned.view()
    } else {
        cube.view()
    };

    let (channels, rows, cols) = data.dim();
    let energy = axis.energies(channels);
    let edges = fit_ranges.len();
    log::debug!("Mapping {edges} edges over {rows}x{cols} spectra of {channels} channels");

    let row_maps = (0..rows)
        .into_par_iter()
        .map(|r| -> Result<Array2<f64>, EelsError> {
            let mut row = Array2::<f64>::zeros((cols, edges));
            let spectra = data.index_axis(Axis(1), r);
            for c in 0..cols {
                let spectrum = spectra.index_axis(Axis(1), c);
                for (q, (&fit, &peak)) in fit_ranges.iter().zip(peak_ranges).enumerate() {
                    row[[c, q]] = region_intensity(energy.view(), spectrum, fit, peak)?;
                }
            }
            Ok(row)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = Array3::<f64>::zeros((rows, cols, edges));
    for (r, row) in row_maps.iter().enumerate() {
        out.index_axis_mut(Axis(0), r).assign(row);
    }
    Ok(out)
}

//! Whole-dataset transforms for 4D NBED scans.
//!
//! All functions take datasets in `(pattern row, pattern col, scan row,
//! scan col)` order and work pattern by pattern in parallel.

use ndarray::{s, Array2, Array4, ArrayView2, ArrayView4, Axis};
use rayon::prelude::*;
use stem_math::resize_2d;

use super::DatasetError;
use crate::image_proc::{log_scale, sobel_edges};

fn scan_positions(data: &ArrayView4<f64>) -> Vec<(usize, usize)> {
    let (_, _, scan_rows, scan_cols) = data.dim();
    (0..scan_rows)
        .flat_map(|r| (0..scan_cols).map(move |c| (r, c)))
        .collect()
}

/// Apply `f` to every pattern and reassemble the results into a 4D array
fn map_patterns<F>(
    data: ArrayView4<f64>,
    pattern_shape: (usize, usize),
    f: F,
) -> Result<Array4<f64>, DatasetError>
where
    F: Fn(ArrayView2<f64>) -> Result<Array2<f64>, DatasetError> + Sync,
{
    let (_, _, scan_rows, scan_cols) = data.dim();
    let positions = scan_positions(&data);
    let patterns = positions
        .par_iter()
        .map(|&(r, c)| f(data.slice(s![.., .., r, c])))
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = Array4::<f64>::zeros((pattern_shape.0, pattern_shape.1, scan_rows, scan_cols));
    for (&(r, c), pattern) in positions.iter().zip(patterns) {
        out.slice_mut(s![.., .., r, c]).assign(&pattern);
    }
    Ok(out)
}

/// Bin the diffraction axes of a 4D dataset by `factor`.
///
/// The mean pattern over all scan positions is resampled to
/// `round(shape / factor)` with the exact-area resampler, and that shape is
/// then applied to every pattern. Factors below one upsample. Total
/// intensity of each pattern scales by the area ratio.
///
/// # Errors
/// * `DatasetError::InvalidFactor` - `factor` is not positive and finite
/// * `DatasetError::EmptyDataset` - any axis has zero length
/// * `DatasetError::Resample` - the target shape rounds to zero
pub fn bin_4d(data: ArrayView4<f64>, factor: f64) -> Result<Array4<f64>, DatasetError> {
    if !(factor > 0.0) || !factor.is_finite() {
        return Err(DatasetError::InvalidFactor(factor));
    }
    let mean = data
        .mean_axis(Axis(3))
        .and_then(|m| m.mean_axis(Axis(2)))
        .ok_or(DatasetError::EmptyDataset)?;
    if mean.is_empty() {
        return Err(DatasetError::EmptyDataset);
    }

    let (rows, cols) = mean.dim();
    let target = (
        (rows as f64 / factor).round() as usize,
        (cols as f64 / factor).round() as usize,
    );
    let binned_shape = resize_2d(mean.view(), target)?.dim();
    log::debug!("Binning patterns {rows}x{cols} -> {binned_shape:?}");

    map_patterns(data, binned_shape, |pattern| {
        Ok(resize_2d(pattern, binned_shape)?)
    })
}

/// Flatten a 4D dataset into a 2D matrix with one scan position per row.
///
/// # Returns
/// Array of shape `(scan rows · scan cols, pattern rows · pattern cols)`,
/// both axes flattened row-major
pub fn data4d_to_2d(data: ArrayView4<f64>) -> Array2<f64> {
    let (k_rows, k_cols, scan_rows, scan_cols) = data.dim();
    Array2::from_shape_fn((scan_rows * scan_cols, k_rows * k_cols), |(i, j)| {
        data[[j / k_cols, j % k_cols, i / scan_cols, i % scan_cols]]
    })
}

/// Edge-enhance every pattern: log scaling followed by the Sobel magnitude.
pub fn log_sobel(data: ArrayView4<f64>) -> Result<Array4<f64>, DatasetError> {
    let (k_rows, k_cols, _, _) = data.dim();
    map_patterns(data, (k_rows, k_cols), |pattern| {
        let (magnitude, _) = sobel_edges(log_scale(pattern)?.view());
        Ok(magnitude)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ramp_dataset() -> Array4<f64> {
        Array4::from_shape_fn((8, 6, 2, 3), |(kr, kc, r, c)| {
            1.0 + kr as f64 * 0.5 + kc as f64 + (r * 3 + c) as f64 * 10.0
        })
    }

    #[test]
    fn test_factor_one_is_identity() {
        let data = ramp_dataset();
        let binned = bin_4d(data.view(), 1.0).unwrap();
        assert_eq!(binned.dim(), data.dim());
        for (a, b) in binned.iter().zip(data.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_binning_by_two_averages_blocks() {
        let data = ramp_dataset();
        let binned = bin_4d(data.view(), 2.0).unwrap();
        assert_eq!(binned.dim(), (4, 3, 2, 3));
        // Mean of the 2x2 block at pattern (0, 0), scan (1, 2)
        let expected = (data[[0, 0, 1, 2]] + data[[0, 1, 1, 2]] + data[[1, 0, 1, 2]]
            + data[[1, 1, 1, 2]])
            / 4.0;
        assert_relative_eq!(binned[[0, 0, 1, 2]], expected, epsilon = 1e-12);
    }

    #[test]
    fn test_non_integer_factor_rounds_shape() {
        let data = ramp_dataset();
        let binned = bin_4d(data.view(), 3.0).unwrap();
        // 8 / 3 and 6 / 3 round to 3 and 2
        assert_eq!(binned.dim(), (3, 2, 2, 3));
    }

    #[test]
    fn test_bad_factor() {
        let data = ramp_dataset();
        assert!(matches!(
            bin_4d(data.view(), 0.0),
            Err(DatasetError::InvalidFactor(_))
        ));
        assert!(matches!(
            bin_4d(data.view(), f64::INFINITY),
            Err(DatasetError::InvalidFactor(_))
        ));
        assert!(matches!(
            bin_4d(data.view(), 100.0),
            Err(DatasetError::Resample(_))
        ));
    }

    #[test]
    fn test_flatten_layout() {
        let data = ramp_dataset();
        let flat = data4d_to_2d(data.view());
        assert_eq!(flat.dim(), (6, 48));
        // Scan (1, 0) is row 3, pattern (2, 5) is column 17
        assert_eq!(flat[[3, 17]], data[[2, 5, 1, 0]]);
    }

    #[test]
    fn test_log_sobel_keeps_shape_and_flags_edges() {
        let data = Array4::from_shape_fn((9, 9, 1, 2), |(kr, kc, _, _)| {
            if (3..6).contains(&kr) && (3..6).contains(&kc) {
                100.0
            } else {
                1.0
            }
        });
        let edges = log_sobel(data.view()).unwrap();
        assert_eq!(edges.dim(), data.dim());
        assert_eq!(edges[[0, 0, 0, 1]], 0.0);
        assert!(edges[[3, 4, 0, 0]] > 0.0);
    }
}

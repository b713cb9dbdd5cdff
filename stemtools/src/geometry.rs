//! Region-of-interest and aperture geometry.
//!
//! Masks are `Array2<bool>` in `(row, col)` layout. Points are given as
//! `(x, y)` = `(col, row)`, following the diffraction-pattern convention
//! used throughout the crate.
//!
//! 4D datasets use the axis order `(pattern row, pattern col, scan row,
//! scan col)`. ROI stacks gather the selected patterns into
//! `(pattern row, pattern col, n)` with `n` running over the mask's true
//! pixels in row-major order; [`scatter_to_map`] uses the same order, so
//! per-ROI results land back on the pixel they came from.

use ndarray::{s, Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayView4, Axis};
use serde::{Deserialize, Serialize};
use stem_math::{median, StatsError};
use thiserror::Error;

/// Errors from mask construction and ROI bookkeeping
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Aperture radius must be positive and finite, got {0}")]
    InvalidRadius(f64),

    #[error("Mask selects {expected} pixels but {actual} values were given")]
    CountMismatch { expected: usize, actual: usize },

    #[error("Statistics failed: {0}")]
    Stats(#[from] StatsError),
}

/// Which side of the threshold a ROI selects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ThresholdMode {
    /// Pixels strictly above the threshold
    #[default]
    Over,
    /// Pixels strictly below the threshold
    Under,
}

/// Circular mask of pixels within `radius` of `center = (x, y)`.
pub fn circular_aperture(
    shape: (usize, usize),
    center: (f64, f64),
    radius: f64,
) -> Result<Array2<bool>, GeometryError> {
    if !(radius > 0.0) || !radius.is_finite() {
        return Err(GeometryError::InvalidRadius(radius));
    }
    let (cx, cy) = center;
    Ok(Array2::from_shape_fn(shape, |(r, c)| {
        let dx = c as f64 - cx;
        let dy = r as f64 - cy;
        (dx * dx + dy * dy).sqrt() <= radius
    }))
}

/// Select pixels relative to `multiplier × median(image)`.
pub fn threshold_roi(
    image: ArrayView2<f64>,
    multiplier: f64,
    mode: ThresholdMode,
) -> Result<Array2<bool>, GeometryError> {
    let threshold = multiplier * median(image.iter().copied())?;
    Ok(match mode {
        ThresholdMode::Over => image.mapv(|v| v > threshold),
        ThresholdMode::Under => image.mapv(|v| v < threshold),
    })
}

/// Virtual dark-field image: diffraction intensity summed inside a circular
/// aperture, for every scan pixel.
///
/// # Returns
/// Array of shape `(scan rows, scan cols)`
pub fn aperture_image(
    data: ArrayView4<f64>,
    center: (f64, f64),
    radius: f64,
) -> Result<Array2<f64>, GeometryError> {
    let (k_rows, k_cols, scan_rows, scan_cols) = data.dim();
    let aperture = circular_aperture((k_rows, k_cols), center, radius)?;

    let mut image = Array2::<f64>::zeros((scan_rows, scan_cols));
    for ((r, c), _) in aperture.indexed_iter().filter(|(_, &inside)| inside) {
        image += &data.slice(s![r, c, .., ..]);
    }
    Ok(image)
}

/// Gather the patterns selected by `mask` into an ROI stack.
///
/// # Returns
/// Array of shape `(pattern rows, pattern cols, n)` with `n` the number of
/// true pixels in `mask`
pub fn extract_roi(
    data: ArrayView4<f64>,
    mask: ArrayView2<bool>,
) -> Result<Array3<f64>, GeometryError> {
    let (k_rows, k_cols, scan_rows, scan_cols) = data.dim();
    if mask.dim() != (scan_rows, scan_cols) {
        return Err(GeometryError::ShapeMismatch {
            expected: (scan_rows, scan_cols),
            actual: mask.dim(),
        });
    }

    let selected: Vec<(usize, usize)> = mask
        .indexed_iter()
        .filter(|(_, &inside)| inside)
        .map(|(idx, _)| idx)
        .collect();

    let mut stack = Array3::<f64>::zeros((k_rows, k_cols, selected.len()));
    for (n, &(r, c)) in selected.iter().enumerate() {
        stack
            .index_axis_mut(Axis(2), n)
            .assign(&data.slice(s![.., .., r, c]));
    }
    Ok(stack)
}

/// Place per-ROI values into a full map, zero outside the mask.
pub fn scatter_to_map(
    values: ArrayView1<f64>,
    mask: ArrayView2<bool>,
) -> Result<Array2<f64>, GeometryError> {
    let expected = mask.iter().filter(|&&inside| inside).count();
    if values.len() != expected {
        return Err(GeometryError::CountMismatch {
            expected,
            actual: values.len(),
        });
    }

    let mut map = Array2::<f64>::zeros(mask.dim());
    let mut source = values.iter();
    for (slot, &inside) in map.iter_mut().zip(mask.iter()) {
        if inside {
            if let Some(&value) = source.next() {
                *slot = value;
            }
        }
    }
    Ok(map)
}

/// Read back the values of `map` at the mask's true pixels, in ROI order.
pub fn gather_from_map(
    map: ArrayView2<f64>,
    mask: ArrayView2<bool>,
) -> Result<Array1<f64>, GeometryError> {
    if map.dim() != mask.dim() {
        return Err(GeometryError::ShapeMismatch {
            expected: mask.dim(),
            actual: map.dim(),
        });
    }
    Ok(map
        .iter()
        .zip(mask.iter())
        .filter(|(_, &inside)| inside)
        .map(|(&v, _)| v)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array4};
    use std::f64::consts::PI;

    #[test]
    fn test_aperture_area_close_to_disk_area() {
        for &radius in &[3.0, 7.5, 12.0] {
            let mask = circular_aperture((64, 64), (31.3, 30.6), radius).unwrap();
            let count = mask.iter().filter(|&&v| v).count() as f64;
            let area = PI * radius * radius;
            // One pixel ring of slack around the circumference
            assert!(
                (count - area).abs() <= 2.0 * PI * radius,
                "radius {radius}: {count} pixels vs area {area}"
            );
        }
    }

    #[test]
    fn test_aperture_rejects_bad_radius() {
        assert_eq!(
            circular_aperture((4, 4), (2.0, 2.0), 0.0),
            Err(GeometryError::InvalidRadius(0.0))
        );
        assert!(circular_aperture((4, 4), (2.0, 2.0), f64::NAN).is_err());
    }

    #[test]
    fn test_threshold_modes() {
        let image = array![[1.0, 1.0, 1.0], [1.0, 9.0, 1.0], [0.1, 1.0, 1.0]];
        let over = threshold_roi(image.view(), 2.0, ThresholdMode::Over).unwrap();
        assert_eq!(over.iter().filter(|&&v| v).count(), 1);
        assert!(over[[1, 1]]);

        let under = threshold_roi(image.view(), 0.5, ThresholdMode::Under).unwrap();
        assert_eq!(under.iter().filter(|&&v| v).count(), 1);
        assert!(under[[2, 0]]);
    }

    #[test]
    fn test_aperture_image_sums_inside_aperture() {
        // Every pattern pixel holds the scan index + 1
        let data = Array4::from_shape_fn((9, 9, 2, 3), |(_, _, r, c)| (r * 3 + c + 1) as f64);
        let aperture = circular_aperture((9, 9), (4.0, 4.0), 2.0).unwrap();
        let inside = aperture.iter().filter(|&&v| v).count() as f64;

        let df = aperture_image(data.view(), (4.0, 4.0), 2.0).unwrap();
        assert_eq!(df.dim(), (2, 3));
        assert_eq!(df[[0, 0]], inside);
        assert_eq!(df[[1, 2]], 6.0 * inside);
    }

    #[test]
    fn test_scatter_then_gather_round_trips() {
        let mask = array![[true, false, true], [false, true, true]];
        let values = array![1.5, -2.0, 3.25, 4.0];

        let map = scatter_to_map(values.view(), mask.view()).unwrap();
        assert_eq!(map[[0, 1]], 0.0);
        assert_eq!(map[[0, 2]], -2.0);

        let back = gather_from_map(map.view(), mask.view()).unwrap();
        assert_eq!(back, values);
    }

    #[test]
    fn test_scatter_count_mismatch() {
        let mask = array![[true, true]];
        assert_eq!(
            scatter_to_map(array![1.0].view(), mask.view()),
            Err(GeometryError::CountMismatch {
                expected: 2,
                actual: 1
            })
        );
    }

    #[test]
    fn test_extract_roi_matches_scatter_order() {
        let data = Array4::from_shape_fn((2, 2, 3, 3), |(kr, kc, r, c)| {
            (r * 3 + c) as f64 * 10.0 + (kr * 2 + kc) as f64
        });
        let mask = array![
            [false, true, false],
            [true, false, false],
            [false, false, true]
        ];
        let stack = extract_roi(data.view(), mask.view()).unwrap();
        assert_eq!(stack.dim(), (2, 2, 3));

        // Scan indices in row-major order: 1, 3, 8
        let firsts = stack.slice(s![0, 0, ..]).to_owned();
        let map = scatter_to_map(firsts.view(), mask.view()).unwrap();
        assert_eq!(map[[0, 1]], 10.0);
        assert_eq!(map[[1, 0]], 30.0);
        assert_eq!(map[[2, 2]], 80.0);
    }
}

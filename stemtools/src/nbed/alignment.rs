//! Rotation alignment of diffraction patterns.
//!
//! Scan coils and the detector are rarely aligned, so the disk rows of a
//! pattern sit at some angle to the pixel rows. [`rotation_finder`] finds
//! the rotation that lines a row of disks up with the pixel grid, and
//! [`rotate_and_center_roi`] applies that rotation to every ROI pattern
//! after moving its centre to the middle of the frame.

use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis};
use rayon::prelude::*;
use stem_math::minimize_scalar;

use super::DatasetError;
use crate::image_proc::{fourier_shift, rotate_image, rotate_spline, spline_coefficients};

/// Starting angle of the search, degrees
const START_ANGLE: f64 = 90.0;
const START_STEP: f64 = 5.0;
const ANGLE_TOLERANCE: f64 = 1e-8;
const MAX_ITERATIONS: usize = 200;

fn row_sum_objective(rotated: &Array2<f64>) -> f64 {
    let best = rotated
        .sum_axis(Axis(1))
        .iter()
        .fold(f64::NEG_INFINITY, |acc, &v| acc.max(v));
    -best
}

/// Negated maximum row sum of `image` rotated by `angle` degrees.
pub fn angle_objective(image: ArrayView2<f64>, angle: f64) -> f64 {
    row_sum_objective(&rotate_image(image, angle))
}

/// Angle in degrees that maximizes the brightest row sum of the rotated
/// image.
///
/// The search starts at 90° and is local, so the result is the nearest
/// optimum to that start; any multiple of 180° added to it is equally
/// valid.
///
/// # Errors
/// * `DatasetError::EmptyDataset` - image has no pixels
/// * `DatasetError::Minimize` - the objective was non-finite or no minimum
///   could be bracketed
pub fn rotation_finder(image: ArrayView2<f64>) -> Result<f64, DatasetError> {
    if image.is_empty() {
        return Err(DatasetError::EmptyDataset);
    }
    let coeffs = spline_coefficients(image);
    let result = minimize_scalar(
        |angle| row_sum_objective(&rotate_spline(&coeffs, angle)),
        START_ANGLE,
        START_STEP,
        ANGLE_TOLERANCE,
        MAX_ITERATIONS,
    )?;
    log::debug!(
        "Rotation search converged to {:.4}° after {} iterations",
        result.x,
        result.iterations
    );
    Ok(result.x)
}

/// Centre and rotate every pattern of an ROI stack.
///
/// Each pattern is translated with a Fourier phase ramp so that
/// `(xcenter, ycenter)` lands on `(cols / 2, rows / 2)`, its magnitude is
/// taken, and it is rotated by `angle` degrees counter-clockwise about the
/// frame centre. The output has the shape of `roi`, `(rows, cols, n)`.
pub fn rotate_and_center_roi(
    roi: ArrayView3<f64>,
    angle: f64,
    xcenter: f64,
    ycenter: f64,
) -> Array3<f64> {
    let (rows, cols, count) = roi.dim();
    let dx = cols as f64 / 2.0 - xcenter;
    let dy = rows as f64 / 2.0 - ycenter;

    let corrected: Vec<Array2<f64>> = (0..count)
        .into_par_iter()
        .map(|n| {
            let moved = fourier_shift(roi.index_axis(Axis(2), n), dx, dy).mapv(|v| v.norm());
            rotate_image(moved.view(), angle)
        })
        .collect();

    let mut out = Array3::<f64>::zeros((rows, cols, count));
    for (n, pattern) in corrected.iter().enumerate() {
        out.index_axis_mut(Axis(2), n).assign(pattern);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Horizontal Gaussian line through the centre of a 41x41 frame
    fn line_image() -> Array2<f64> {
        Array2::from_shape_fn((41, 41), |(r, c)| {
            let along = if (6..=34).contains(&c) { 1.0 } else { 0.0 };
            let dr = r as f64 - 20.0;
            along * (-(dr * dr) / 2.0).exp()
        })
    }

    #[test]
    fn test_horizontal_line_objective() {
        let image = line_image();
        let flat = angle_objective(image.view(), 0.0);
        // 29 pixels of peak value 1 in the centre row
        assert_relative_eq!(flat, -29.0, epsilon = 1e-6);
        assert!(angle_objective(image.view(), 30.0) > flat);
    }

    #[test]
    fn test_finds_angle_that_restores_tilted_line() {
        let tilted = rotate_image(line_image().view(), 30.0);
        let angle = rotation_finder(tilted.view()).unwrap();

        // Nearest horizontal orientation to the 90° start
        assert!((angle - 150.0).abs() < 1.0, "found {angle}");
        let best = angle_objective(tilted.view(), angle);
        assert!(best <= angle_objective(tilted.view(), angle + 3.0));
        assert!(best <= angle_objective(tilted.view(), angle - 3.0));
    }

    #[test]
    fn test_rotation_finder_rejects_empty() {
        let image = Array2::<f64>::zeros((0, 4));
        assert!(matches!(
            rotation_finder(image.view()),
            Err(DatasetError::EmptyDataset)
        ));
    }

    #[test]
    fn test_center_moves_to_frame_middle() {
        // Single bright pixel at (x, y) = (5, 9) in a 16x16 frame
        let mut roi = Array3::<f64>::zeros((16, 16, 2));
        roi[[9, 5, 0]] = 1.0;
        roi[[9, 5, 1]] = 2.0;

        let out = rotate_and_center_roi(roi.view(), 0.0, 5.0, 9.0);
        assert_eq!(out.dim(), (16, 16, 2));
        assert_relative_eq!(out[[8, 8, 0]], 1.0, epsilon = 1e-9);
        assert_relative_eq!(out[[8, 8, 1]], 2.0, epsilon = 1e-9);
        assert_relative_eq!(out[[9, 5, 0]], 0.0, epsilon = 1e-9);
    }
}

//! Exact-area resampling of 1D and 2D intensity data.
//!
//! Each output bin covers `M/N` input samples and accumulates every input
//! sample it overlaps, weighted by the fractional overlap. The result is
//! scaled by `N/M`, which makes the routine a box-average: a constant input
//! stays constant, and the total intensity scales exactly as
//! `sum(output) = sum(input) * N / M`.
//!
//! Works for decimation and interpolation alike, including non-integer
//! ratios. Overlap tests are done in integer arithmetic (`m·N` against
//! `(n+1)·M`) so bin boundaries never drift with floating point error.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use thiserror::Error;

/// Errors that can occur during resampling
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResampleError {
    #[error("Cannot resample an empty input")]
    EmptyInput,
    #[error("Target length must be positive")]
    ZeroTargetLength,
}

/// Resample a 1D array to `n_out` bins, preserving intensity per unit length.
///
/// # Arguments
/// * `data` - Input samples (length `M`)
/// * `n_out` - Output length `N`
///
/// # Returns
/// Array of length `N` with `sum(out) == sum(data) * N / M` up to rounding.
///
/// # Errors
/// * `ResampleError::EmptyInput` - `data` has no samples
/// * `ResampleError::ZeroTargetLength` - `n_out == 0`
///
/// # Examples
/// ```
/// use ndarray::array;
/// use stem_math::resize_1d;
///
/// let binned = resize_1d(array![1.0, 2.0, 3.0, 4.0].view(), 2).unwrap();
/// assert_eq!(binned.to_vec(), vec![1.5, 3.5]);
/// ```
pub fn resize_1d(data: ArrayView1<f64>, n_out: usize) -> Result<Array1<f64>, ResampleError> {
    let m_len = data.len();
    if m_len == 0 {
        return Err(ResampleError::EmptyInput);
    }
    if n_out == 0 {
        return Err(ResampleError::ZeroTargetLength);
    }

    let scale = n_out as f64 / m_len as f64;
    let mut out = Array1::<f64>::zeros(n_out);
    let mut carry = 0.0;
    let mut m = 0usize;

    for n in 0..n_out {
        let mut bin_sum = carry;
        // Input sample m starts inside output bin n while m·N < (n+1)·M
        while m < m_len && m * n_out < (n + 1) * m_len {
            bin_sum += data[m];
            m += 1;
        }
        // Part of the last sample that spills over into the next bin
        let overlap = m as f64 - (n + 1) as f64 * m_len as f64 / n_out as f64;
        carry = overlap * data[m - 1];
        bin_sum -= carry;
        out[n] = bin_sum * scale;
    }

    Ok(out)
}

/// Resample a 2D array to `shape = (rows, cols)`.
///
/// Rows are resampled along the column axis first, then every column of the
/// intermediate result along the row axis. Both passes are linear, so the
/// order does not change the result beyond rounding.
///
/// # Errors
/// * `ResampleError::EmptyInput` - input has a zero-length axis
/// * `ResampleError::ZeroTargetLength` - either target dimension is zero
pub fn resize_2d(
    data: ArrayView2<f64>,
    shape: (usize, usize),
) -> Result<Array2<f64>, ResampleError> {
    let (rows, cols) = data.dim();
    if rows == 0 || cols == 0 {
        return Err(ResampleError::EmptyInput);
    }
    let (out_rows, out_cols) = shape;
    if out_rows == 0 || out_cols == 0 {
        return Err(ResampleError::ZeroTargetLength);
    }

    let mut along_cols = Array2::<f64>::zeros((rows, out_cols));
    for (src, mut dst) in data
        .axis_iter(Axis(0))
        .zip(along_cols.axis_iter_mut(Axis(0)))
    {
        dst.assign(&resize_1d(src, out_cols)?);
    }

    let mut out = Array2::<f64>::zeros((out_rows, out_cols));
    for (src, mut dst) in along_cols
        .axis_iter(Axis(1))
        .zip(out.axis_iter_mut(Axis(1)))
    {
        dst.assign(&resize_1d(src, out_rows)?);
    }

    Ok(out)
}

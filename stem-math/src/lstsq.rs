//! Linear least squares for two-column regressions.
//!
//! Solves `A · X ≈ B` for `X` where `A` and `B` both have shape `[n, 2]`
//! and no intercept column is added. The solution is computed through the
//! SVD of `A`, so an over-determined system gets the minimum-norm
//! least-squares answer, and a rank-deficient `A` is reported instead of
//! yielding an arbitrary matrix.

use nalgebra::{DMatrix, Matrix2};
use thiserror::Error;

/// Relative singular value below which `A` is treated as rank deficient
const RANK_TOLERANCE: f64 = 1e-12;

/// Errors that can occur while solving the regression
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LstsqError {
    #[error("Row count mismatch: design has {design} rows, targets have {targets}")]
    RowMismatch { design: usize, targets: usize },
    #[error("At least 2 rows are required, got {0}")]
    TooFewRows(usize),
    #[error("Design matrix is rank deficient (singular value ratio {0:e})")]
    RankDeficient(f64),
    #[error("SVD failed to produce U or V^T matrices")]
    SvdFailed,
}

/// Solve `design · X ≈ targets` in the least-squares sense.
///
/// # Arguments
/// * `design` - Rows of the design matrix `A`
/// * `targets` - Rows of the target matrix `B`
///
/// # Returns
/// The 2×2 matrix `X` minimizing `‖A·X − B‖_F`
///
/// # Errors
/// * `LstsqError::RowMismatch` - row counts differ
/// * `LstsqError::TooFewRows` - fewer than two rows
/// * `LstsqError::RankDeficient` - the columns of `A` are collinear
pub fn lstsq_2col(
    design: &[[f64; 2]],
    targets: &[[f64; 2]],
) -> Result<Matrix2<f64>, LstsqError> {
    if design.len() != targets.len() {
        return Err(LstsqError::RowMismatch {
            design: design.len(),
            targets: targets.len(),
        });
    }
    let n = design.len();
    if n < 2 {
        return Err(LstsqError::TooFewRows(n));
    }

    let a = DMatrix::from_fn(n, 2, |r, c| design[r][c]);
    let b = DMatrix::from_fn(n, 2, |r, c| targets[r][c]);

    let svd = a.svd(true, true);
    let s_max = svd.singular_values.max();
    let s_min = svd.singular_values.min();
    let ratio = if s_max > 0.0 { s_min / s_max } else { 0.0 };
    if ratio < RANK_TOLERANCE {
        return Err(LstsqError::RankDeficient(ratio));
    }

    let u = svd.u.ok_or(LstsqError::SvdFailed)?;
    let v_t = svd.v_t.ok_or(LstsqError::SvdFailed)?;

    // X = V · Σ⁻¹ · Uᵀ · B
    let utb = u.transpose() * b;
    let mut scaled = utb;
    for (i, s) in svd.singular_values.iter().enumerate() {
        for c in 0..2 {
            scaled[(i, c)] /= s;
        }
    }
    let x = v_t.transpose() * scaled;

    Ok(Matrix2::new(x[(0, 0)], x[(0, 1)], x[(1, 0)], x[(1, 1)]))
}

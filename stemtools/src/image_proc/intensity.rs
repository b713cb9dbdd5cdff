//! Intensity transforms applied to patterns before registration.

use ndarray::{Array2, ArrayView2};
use stem_math::{median, StatsScan};

use super::ImageProcError;

/// Dynamic range mapped onto the log scale (16-bit detector counts)
pub const LOG_DYNAMIC_RANGE: f64 = 65536.0;

/// Rescale an image linearly onto `[0, 1]`.
///
/// A flat image maps to all zeros. Intended for display; the numeric
/// pipeline never depends on it.
pub fn normalize_for_display(image: ArrayView2<f64>) -> Result<Array2<f64>, ImageProcError> {
    let scan = StatsScan::from_iter_values(image.iter().copied());
    let (min, max) = scan.min_max()?;
    let range = max - min;
    if range <= 0.0 {
        return Ok(Array2::zeros(image.dim()));
    }
    Ok(image.mapv(|v| (v - min) / range))
}

/// Logarithmic intensity scaling onto `[0, 1]`.
///
/// The image is first rescaled to `[0, 1]`, which floors every value at the
/// image minimum, so zero and negative counts are safe. It is then mapped
/// through `ln(1 + x·(R − 1)) / ln(R)` with `R = LOG_DYNAMIC_RANGE`, which
/// compresses the direct beam and lifts weak higher-order disks.
pub fn log_scale(image: ArrayView2<f64>) -> Result<Array2<f64>, ImageProcError> {
    let normalized = normalize_for_display(image)?;
    let denominator = LOG_DYNAMIC_RANGE.ln();
    Ok(normalized.mapv(|v| (v.max(0.0) * (LOG_DYNAMIC_RANGE - 1.0)).ln_1p() / denominator))
}

/// Replace hot pixels by the image median.
///
/// Every value strictly greater than `med_factor × median` is set to the
/// median. Used after edge detection, where isolated detector hot pixels
/// produce edge responses far above the disk rims.
pub fn clamp_outliers(
    image: ArrayView2<f64>,
    med_factor: f64,
) -> Result<Array2<f64>, ImageProcError> {
    let med = median(image.iter().copied())?;
    let limit = med_factor * med;
    Ok(image.mapv(|v| if v > limit { med } else { v }))
}

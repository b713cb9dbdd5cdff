//! Frequency-domain operations on diffraction patterns.
//!
//! 2D transforms are done row-column with `rustfft`; a fresh planner is
//! created per call so no transform state is shared between worker threads.
//!
//! The registration entry point is [`cross_corr`], a hybrid correlation:
//! the cross-power spectrum is divided by its own magnitude raised to the
//! `hybridizer` exponent. `h = 1` gives pure phase correlation (sharpest
//! peak, most noise sensitive); as `h` approaches 0 the surface approaches
//! the plain cross-correlation.

use ndarray::{Array2, ArrayView2, Axis};
use num_complex::Complex;
use rustfft::{FftDirection, FftPlanner};
use std::f64::consts::TAU;

use super::ImageProcError;

fn fft2_in_place(data: &mut Array2<Complex<f64>>, direction: FftDirection) {
    let (rows, cols) = data.dim();
    let mut planner = FftPlanner::<f64>::new();
    let row_fft = planner.plan_fft(cols, direction);
    let col_fft = planner.plan_fft(rows, direction);

    let mut buffer = vec![Complex::new(0.0, 0.0); cols.max(rows)];

    for mut row in data.axis_iter_mut(Axis(0)) {
        let line = &mut buffer[..cols];
        for (dst, src) in line.iter_mut().zip(row.iter()) {
            *dst = *src;
        }
        row_fft.process(line);
        for (dst, src) in row.iter_mut().zip(line.iter()) {
            *dst = *src;
        }
    }

    for mut col in data.axis_iter_mut(Axis(1)) {
        let line = &mut buffer[..rows];
        for (dst, src) in line.iter_mut().zip(col.iter()) {
            *dst = *src;
        }
        col_fft.process(line);
        for (dst, src) in col.iter_mut().zip(line.iter()) {
            *dst = *src;
        }
    }
}

/// Forward 2D FFT of a real image
pub fn fft2(image: ArrayView2<f64>) -> Array2<Complex<f64>> {
    let mut spectrum = image.mapv(|v| Complex::new(v, 0.0));
    fft2_in_place(&mut spectrum, FftDirection::Forward);
    spectrum
}

/// Inverse 2D FFT, normalized by the number of samples
pub fn ifft2(spectrum: &Array2<Complex<f64>>) -> Array2<Complex<f64>> {
    let mut field = spectrum.clone();
    fft2_in_place(&mut field, FftDirection::Inverse);
    let n = (field.len().max(1)) as f64;
    field.mapv_inplace(|v| v / n);
    field
}

/// Move the zero-frequency sample to `(rows / 2, cols / 2)`
pub fn fftshift<T: Clone>(data: &Array2<T>) -> Array2<T> {
    let (rows, cols) = data.dim();
    Array2::from_shape_fn((rows, cols), |(r, c)| {
        let src_r = (r + rows - rows / 2) % rows;
        let src_c = (c + cols - cols / 2) % cols;
        data[[src_r, src_c]].clone()
    })
}

/// Signed frequency index for bin `k` of an `n`-point transform
fn signed_frequency(k: usize, n: usize) -> f64 {
    if k < n.div_ceil(2) {
        k as f64
    } else {
        k as f64 - n as f64
    }
}

fn l2_normalized(image: ArrayView2<f64>) -> Array2<f64> {
    let norm = image.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm > 0.0 {
        image.mapv(|v| v / norm)
    } else {
        image.to_owned()
    }
}

/// Hybrid cross-correlation of `image` against `template`.
///
/// Both inputs are scaled to unit L2 norm first, so patterns with different
/// overall intensity give comparable surfaces. The returned surface is
/// `fftshift`ed: a feature of `image` that coincides with the template
/// centre `(rows / 2, cols / 2)` produces its peak at the feature's own
/// pixel position.
///
/// # Arguments
/// * `image` - Pattern to register
/// * `template` - Reference disk or probe, same shape as `image`
/// * `hybridizer` - Magnitude exponent in `(0, 1]`
///
/// # Errors
/// * `ImageProcError::ShapeMismatch` - inputs differ in shape
/// * `ImageProcError::EmptyImage` - inputs have no pixels
/// * `ImageProcError::InvalidArgument` - `hybridizer` outside `(0, 1]`
pub fn cross_corr(
    image: ArrayView2<f64>,
    template: ArrayView2<f64>,
    hybridizer: f64,
) -> Result<Array2<f64>, ImageProcError> {
    if image.dim() != template.dim() {
        return Err(ImageProcError::ShapeMismatch {
            expected: image.dim(),
            actual: template.dim(),
        });
    }
    if image.is_empty() {
        return Err(ImageProcError::EmptyImage);
    }
    if !(hybridizer > 0.0 && hybridizer <= 1.0) {
        return Err(ImageProcError::InvalidArgument(format!(
            "hybridizer must lie in (0, 1], got {hybridizer}"
        )));
    }

    let image_fft = fft2(l2_normalized(image).view());
    let template_fft = fft2(l2_normalized(template).view());

    let mut cross_power = image_fft;
    cross_power.zip_mut_with(&template_fft, |a, b| {
        let product = *a * b.conj();
        let magnitude = product.norm().powf(hybridizer);
        *a = if magnitude > 0.0 {
            product / magnitude
        } else {
            product
        };
    });

    let correlation = ifft2(&cross_power);
    Ok(fftshift(&correlation).mapv(|v| v.norm()))
}

/// Translate an image by `(dx, dy)` pixels with a Fourier phase ramp.
///
/// Positive `dx` moves content towards higher column indices, positive `dy`
/// towards higher row indices. The shift is circular. The complex field is
/// returned; for non-integer shifts of even-sized images the Nyquist bin
/// leaves a small imaginary part, so callers usually take the magnitude.
pub fn fourier_shift(image: ArrayView2<f64>, dx: f64, dy: f64) -> Array2<Complex<f64>> {
    let (rows, cols) = image.dim();
    let mut spectrum = fft2(image);

    for ((r, c), value) in spectrum.indexed_iter_mut() {
        let phase = -TAU
            * (signed_frequency(c, cols) * dx / cols as f64
                + signed_frequency(r, rows) * dy / rows as f64);
        *value *= Complex::from_polar(1.0, phase);
    }

    ifft2(&spectrum)
}

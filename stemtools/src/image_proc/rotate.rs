//! Image rotation with quintic B-spline interpolation.
//!
//! The image is converted to B-spline coefficients with the recursive
//! prefilter of Unser, Aldroubi and Eden (mirror boundaries), then every
//! output pixel is mapped back into the input frame and evaluated with the
//! 6×6 quintic kernel. Output keeps the input shape; samples that map
//! outside the input are zero.

use ndarray::{Array2, ArrayView2, Axis};

/// Poles of the degree-5 B-spline prefilter
const QUINTIC_POLES: [f64; 2] = [-0.430_575_347_099_973_8, -0.043_096_288_203_264_65];
/// Support of the quintic kernel in samples
const SUPPORT: usize = 6;
/// Slack for output coordinates landing a hair outside the input domain
const EDGE_SLACK: f64 = 1e-9;

/// Centered quintic B-spline β⁵(t)
fn bspline5(t: f64) -> f64 {
    const BINOMIAL_6: [f64; 7] = [1.0, 6.0, 15.0, 20.0, 15.0, 6.0, 1.0];
    let mut sum = 0.0;
    for (k, &binom) in BINOMIAL_6.iter().enumerate() {
        let shifted = t + 3.0 - k as f64;
        if shifted > 0.0 {
            let term = binom * shifted.powi(5);
            sum += if k % 2 == 0 { term } else { -term };
        }
    }
    sum / 120.0
}

fn mirror_index(index: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let period = 2 * n as isize - 2;
    let k = index.rem_euclid(period);
    if k >= n as isize {
        (period - k) as usize
    } else {
        k as usize
    }
}

fn initial_causal(c: &[f64], z: f64) -> f64 {
    let n = c.len();
    let horizon = (f64::EPSILON.ln() / z.abs().ln()).ceil() as usize;
    if horizon < n {
        let mut zn = z;
        let mut sum = c[0];
        for value in c.iter().take(horizon).skip(1) {
            sum += zn * value;
            zn *= z;
        }
        sum
    } else {
        let mut zn = z;
        let iz = 1.0 / z;
        let mut z2n = z.powi(n as i32 - 1);
        let mut sum = c[0] + z2n * c[n - 1];
        z2n *= z2n * iz;
        for value in c.iter().take(n - 1).skip(1) {
            sum += (zn + z2n) * value;
            zn *= z;
            z2n *= iz;
        }
        sum / (1.0 - zn * zn)
    }
}

fn initial_anticausal(c: &[f64], z: f64) -> f64 {
    let n = c.len();
    (z / (z * z - 1.0)) * (z * c[n - 2] + c[n - 1])
}

/// Convert samples into interpolating B-spline coefficients in place
fn prefilter_line(c: &mut [f64]) {
    let n = c.len();
    if n < 2 {
        return;
    }
    let gain: f64 = QUINTIC_POLES
        .iter()
        .map(|&z| (1.0 - z) * (1.0 - 1.0 / z))
        .product();
    c.iter_mut().for_each(|v| *v *= gain);

    for &z in &QUINTIC_POLES {
        c[0] = initial_causal(c, z);
        for k in 1..n {
            c[k] += z * c[k - 1];
        }
        c[n - 1] = initial_anticausal(c, z);
        for k in (0..n - 1).rev() {
            c[k] = z * (c[k + 1] - c[k]);
        }
    }
}

/// B-spline coefficients of an image, separable along rows then columns
pub fn spline_coefficients(image: ArrayView2<f64>) -> Array2<f64> {
    let mut coeffs = image.to_owned();
    let mut line = Vec::new();
    for axis in [Axis(1), Axis(0)] {
        for mut lane in coeffs.lanes_mut(axis) {
            line.clear();
            line.extend(lane.iter().copied());
            prefilter_line(&mut line);
            for (dst, src) in lane.iter_mut().zip(line.iter()) {
                *dst = *src;
            }
        }
    }
    coeffs
}

/// Evaluate the spline defined by `coeffs` at fractional `(row, col)`
pub fn spline_sample(coeffs: &Array2<f64>, row: f64, col: f64) -> f64 {
    let (rows, cols) = coeffs.dim();
    let r_start = row.floor() as isize - 2;
    let c_start = col.floor() as isize - 2;

    let mut col_weights = [0.0; SUPPORT];
    let mut col_index = [0usize; SUPPORT];
    for j in 0..SUPPORT {
        let idx = c_start + j as isize;
        col_weights[j] = bspline5(col - idx as f64);
        col_index[j] = mirror_index(idx, cols);
    }

    let mut value = 0.0;
    for i in 0..SUPPORT {
        let idx = r_start + i as isize;
        let w_row = bspline5(row - idx as f64);
        if w_row == 0.0 {
            continue;
        }
        let r = mirror_index(idx, rows);
        let mut acc = 0.0;
        for j in 0..SUPPORT {
            acc += col_weights[j] * coeffs[[r, col_index[j]]];
        }
        value += w_row * acc;
    }
    value
}

/// Rotate an image about its centre by `angle_degrees`.
///
/// Positive angles rotate the content counter-clockwise as displayed with
/// row 0 at the top. The centre is `((rows − 1) / 2, (cols − 1) / 2)`.
pub fn rotate_image(image: ArrayView2<f64>, angle_degrees: f64) -> Array2<f64> {
    if image.is_empty() {
        return Array2::zeros(image.dim());
    }
    rotate_spline(&spline_coefficients(image), angle_degrees)
}

/// [`rotate_image`] on precomputed [`spline_coefficients`], for callers
/// that rotate the same image many times.
pub fn rotate_spline(coeffs: &Array2<f64>, angle_degrees: f64) -> Array2<f64> {
    let (rows, cols) = coeffs.dim();
    let (sin, cos) = angle_degrees.to_radians().sin_cos();
    let center_r = (rows as f64 - 1.0) / 2.0;
    let center_c = (cols as f64 - 1.0) / 2.0;
    let max_r = rows as f64 - 1.0 + EDGE_SLACK;
    let max_c = cols as f64 - 1.0 + EDGE_SLACK;

    Array2::from_shape_fn((rows, cols), |(r, c)| {
        let dr = r as f64 - center_r;
        let dc = c as f64 - center_c;
        let in_c = center_c + dc * cos - dr * sin;
        let in_r = center_r + dc * sin + dr * cos;
        if in_r < -EDGE_SLACK || in_c < -EDGE_SLACK || in_r > max_r || in_c > max_c {
            0.0
        } else {
            spline_sample(coeffs, in_r, in_c)
        }
    })
}

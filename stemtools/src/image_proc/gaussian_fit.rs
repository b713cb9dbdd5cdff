//! Sub-pixel peak localization by 2D Gaussian fitting.
//!
//! The fit uses only pixels inside a circular window around the starting
//! position. The model is an axis-aligned elliptical Gaussian on a constant
//! background:
//!
//! ```text
//! I(x, y) = b + A · exp(−(x − x₀)² / 2σx² − (y − y₀)² / 2σy²)
//! ```
//!
//! and is solved with Levenberg-Marquardt, seeded from the intensity-weighted
//! centroid and second moments of the window. Steps are kept inside the
//! window, and the window follows the fitted centre.

use nalgebra::{Matrix6, Vector6};
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use super::ImageProcError;

/// Minimum number of window pixels for a 6-parameter fit
const MIN_WINDOW_PIXELS: usize = 7;
const MIN_SIGMA: f64 = 0.3;
const MAX_DAMPING: f64 = 1e12;
const MAX_RECENTRE_PASSES: usize = 3;
/// Centre shift in pixels below which the window is not re-collected
const RECENTRE_TOLERANCE: f64 = 0.05;

/// Convergence settings for the Gaussian peak fit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeakFitConfig {
    /// Maximum Levenberg-Marquardt iterations
    pub max_iterations: usize,
    /// Relative cost change treated as converged
    pub tolerance: f64,
}

impl Default for PeakFitConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-10,
        }
    }
}

/// Fitted Gaussian peak parameters, positions in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianPeak {
    /// Column coordinate of the peak centre
    pub x: f64,
    /// Row coordinate of the peak centre
    pub y: f64,
    pub sigma_x: f64,
    pub sigma_y: f64,
    pub amplitude: f64,
    pub background: f64,
    /// False when the fit diverged and the half-max centroid was returned
    pub converged: bool,
}

struct WindowSample {
    x: f64,
    y: f64,
    value: f64,
}

fn collect_window(
    image: ArrayView2<f64>,
    x0: f64,
    y0: f64,
    radius: f64,
) -> Vec<WindowSample> {
    let (rows, cols) = image.dim();
    let r_min = (y0 - radius).floor().max(0.0) as usize;
    let r_max = ((y0 + radius).ceil().max(0.0) as usize).min(rows.saturating_sub(1));
    let c_min = (x0 - radius).floor().max(0.0) as usize;
    let c_max = ((x0 + radius).ceil().max(0.0) as usize).min(cols.saturating_sub(1));

    let mut samples = Vec::new();
    if rows == 0 || cols == 0 {
        return samples;
    }
    for r in r_min..=r_max {
        for c in c_min..=c_max {
            let dx = c as f64 - x0;
            let dy = r as f64 - y0;
            if dx * dx + dy * dy <= radius * radius {
                samples.push(WindowSample {
                    x: c as f64,
                    y: r as f64,
                    value: image[[r, c]],
                });
            }
        }
    }
    samples
}

/// Parameter vector layout: [x0, y0, sigma_x, sigma_y, amplitude, background]
fn model_and_gradient(p: &Vector6<f64>, x: f64, y: f64) -> (f64, Vector6<f64>) {
    let dx = x - p[0];
    let dy = y - p[1];
    let sx2 = p[2] * p[2];
    let sy2 = p[3] * p[3];
    let e = (-(dx * dx) / (2.0 * sx2) - (dy * dy) / (2.0 * sy2)).exp();
    let ae = p[4] * e;
    let gradient = Vector6::new(
        ae * dx / sx2,
        ae * dy / sy2,
        ae * dx * dx / (sx2 * p[2]),
        ae * dy * dy / (sy2 * p[3]),
        e,
        1.0,
    );
    (p[5] + ae, gradient)
}

fn cost(p: &Vector6<f64>, samples: &[WindowSample]) -> f64 {
    samples
        .iter()
        .map(|s| {
            let (model, _) = model_and_gradient(p, s.x, s.y);
            (model - s.value).powi(2)
        })
        .sum()
}

fn value_range(samples: &[WindowSample]) -> (f64, f64) {
    samples
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), s| {
            (lo.min(s.value), hi.max(s.value))
        })
}

/// Centroid of the pixels above half maximum, weighted by their height over
/// the cut. Unlike the full-window centroid it ignores the tails clipped by
/// the window edge.
fn half_max_centroid(samples: &[WindowSample]) -> (f64, f64) {
    let (min, max) = value_range(samples);
    let cut = 0.5 * (min + max);
    let (mut weight, mut sx, mut sy) = (0.0, 0.0, 0.0);
    for s in samples.iter().filter(|s| s.value > cut) {
        let w = s.value - cut;
        weight += w;
        sx += w * s.x;
        sy += w * s.y;
    }
    (sx / weight, sy / weight)
}

/// Levenberg-Marquardt on one window. Steps that move the centre out of the
/// window, flip the amplitude sign or widen the peak past the window are
/// rejected like a cost increase.
fn levenberg_marquardt(
    samples: &[WindowSample],
    mut params: Vector6<f64>,
    centre: (f64, f64),
    radius: f64,
    config: &PeakFitConfig,
) -> Vector6<f64> {
    let admissible = |p: &Vector6<f64>| {
        let dx = p[0] - centre.0;
        let dy = p[1] - centre.1;
        (dx * dx + dy * dy).sqrt() <= radius
            && p[4] > 0.0
            && p[2] <= 2.0 * radius
            && p[3] <= 2.0 * radius
    };

    let mut current_cost = cost(&params, samples);
    let mut damping = 1e-3;

    for _ in 0..config.max_iterations {
        let mut jtj = Matrix6::<f64>::zeros();
        let mut jtr = Vector6::<f64>::zeros();
        for s in samples {
            let (model, gradient) = model_and_gradient(&params, s.x, s.y);
            let residual = model - s.value;
            jtj += gradient * gradient.transpose();
            jtr += gradient * residual;
        }

        let mut improved = false;
        while damping < MAX_DAMPING {
            let mut lhs = jtj;
            for i in 0..6 {
                lhs[(i, i)] += damping * jtj[(i, i)].max(1e-12);
            }
            let Some(step) = lhs.lu().solve(&(-jtr)) else {
                damping *= 10.0;
                continue;
            };

            let mut candidate = params + step;
            candidate[2] = candidate[2].abs().max(MIN_SIGMA);
            candidate[3] = candidate[3].abs().max(MIN_SIGMA);
            if !admissible(&candidate) {
                damping *= 10.0;
                continue;
            }
            let candidate_cost = cost(&candidate, samples);

            if candidate_cost.is_finite() && candidate_cost < current_cost {
                let relative_change = (current_cost - candidate_cost) / current_cost.max(f64::MIN_POSITIVE);
                params = candidate;
                current_cost = candidate_cost;
                damping = (damping / 10.0).max(1e-12);
                improved = relative_change > config.tolerance;
                break;
            }
            damping *= 10.0;
        }

        if !improved {
            break;
        }
    }
    params
}

/// Fit a 2D Gaussian to the pixels within `window_radius` of `(x0, y0)`.
///
/// After each fit the window is re-collected around the fitted centre and
/// the fit repeated, up to three passes, so a guess that sits off the peak
/// does not leave the peak clipped by the window edge.
///
/// # Arguments
/// * `image` - Image holding the peak (raw pattern or correlation surface)
/// * `x0`, `y0` - Starting column and row position
/// * `window_radius` - Radius of the circular fit window in pixels
/// * `config` - Iteration limits
///
/// # Returns
/// The fitted peak. If the fit wanders more than `window_radius` from the
/// start or produces a non-finite result, the half-maximum centroid of the
/// starting window is returned with `converged = false`.
///
/// # Errors
/// * `ImageProcError::InvalidArgument` - non-positive radius
/// * `ImageProcError::TooFewPixels` - window holds fewer than 7 pixels
/// * `ImageProcError::FlatWindow` - all window pixels are equal
pub fn gaussian_peak_fit(
    image: ArrayView2<f64>,
    x0: f64,
    y0: f64,
    window_radius: f64,
    config: &PeakFitConfig,
) -> Result<GaussianPeak, ImageProcError> {
    if !(window_radius > 0.0) {
        return Err(ImageProcError::InvalidArgument(format!(
            "window radius must be positive, got {window_radius}"
        )));
    }

    let samples = collect_window(image, x0, y0, window_radius);
    if samples.len() < MIN_WINDOW_PIXELS {
        return Err(ImageProcError::TooFewPixels {
            found: samples.len(),
            required: MIN_WINDOW_PIXELS,
        });
    }

    let (min, max) = value_range(&samples);
    if !(max > min) {
        return Err(ImageProcError::FlatWindow { x: x0, y: y0 });
    }

    // Moments of the background-subtracted window
    let weight: f64 = samples.iter().map(|s| s.value - min).sum();
    let cx = samples.iter().map(|s| (s.value - min) * s.x).sum::<f64>() / weight;
    let cy = samples.iter().map(|s| (s.value - min) * s.y).sum::<f64>() / weight;
    let var_x = samples
        .iter()
        .map(|s| (s.value - min) * (s.x - cx).powi(2))
        .sum::<f64>()
        / weight;
    let var_y = samples
        .iter()
        .map(|s| (s.value - min) * (s.y - cy).powi(2))
        .sum::<f64>()
        / weight;
    let sx0 = var_x.sqrt().clamp(MIN_SIGMA, window_radius);
    let sy0 = var_y.sqrt().clamp(MIN_SIGMA, window_radius);

    let mut params = Vector6::new(cx, cy, sx0, sy0, max - min, min);
    let mut centre = (x0, y0);

    for pass in 0..MAX_RECENTRE_PASSES {
        let recentred;
        let window: &[WindowSample] = if pass == 0 {
            &samples
        } else {
            recentred = collect_window(image, centre.0, centre.1, window_radius);
            if recentred.len() < MIN_WINDOW_PIXELS {
                break;
            }
            &recentred
        };
        params = levenberg_marquardt(window, params, centre, window_radius, config);

        let drift = ((params[0] - x0).powi(2) + (params[1] - y0).powi(2)).sqrt();
        if !params.iter().all(|v| v.is_finite()) || drift > window_radius {
            let (hx, hy) = half_max_centroid(&samples);
            log::warn!(
                "Gaussian fit at ({x0:.2}, {y0:.2}) drifted {drift:.2} px, using half-max centroid ({hx:.2}, {hy:.2})"
            );
            return Ok(GaussianPeak {
                x: hx,
                y: hy,
                sigma_x: sx0,
                sigma_y: sy0,
                amplitude: max - min,
                background: min,
                converged: false,
            });
        }

        let moved = ((params[0] - centre.0).powi(2) + (params[1] - centre.1).powi(2)).sqrt();
        centre = (params[0], params[1]);
        if moved < RECENTRE_TOLERANCE {
            break;
        }
    }

    Ok(GaussianPeak {
        x: params[0],
        y: params[1],
        sigma_x: params[2],
        sigma_y: params[3],
        amplitude: params[4],
        background: params[5],
        converged: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array2;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn gaussian_image(
        shape: (usize, usize),
        x0: f64,
        y0: f64,
        sigma: f64,
        amplitude: f64,
        background: f64,
    ) -> Array2<f64> {
        Array2::from_shape_fn(shape, |(r, c)| {
            let dx = c as f64 - x0;
            let dy = r as f64 - y0;
            background + amplitude * (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp()
        })
    }

    #[test]
    fn test_recovers_subpixel_centre() {
        let image = gaussian_image((32, 32), 14.3, 17.8, 2.0, 100.0, 5.0);
        let peak = gaussian_peak_fit(image.view(), 14.0, 18.0, 6.0, &PeakFitConfig::default())
            .unwrap();

        assert!(peak.converged);
        assert_relative_eq!(peak.x, 14.3, epsilon = 1e-6);
        assert_relative_eq!(peak.y, 17.8, epsilon = 1e-6);
        assert_relative_eq!(peak.sigma_x, 2.0, epsilon = 1e-5);
        assert_relative_eq!(peak.amplitude, 100.0, epsilon = 1e-4);
        assert_relative_eq!(peak.background, 5.0, epsilon = 1e-4);
    }

    #[test]
    fn test_noisy_peak_within_tenth_pixel() {
        let mut image = gaussian_image((40, 40), 20.6, 19.2, 2.5, 200.0, 10.0);
        let mut rng = ChaCha8Rng::seed_from_u64(99);
        image.mapv_inplace(|v| v + rng.random_range(-2.0..2.0));

        let peak = gaussian_peak_fit(image.view(), 21.0, 19.0, 7.0, &PeakFitConfig::default())
            .unwrap();
        assert!((peak.x - 20.6).abs() < 0.1);
        assert!((peak.y - 19.2).abs() < 0.1);
    }

    #[test]
    fn test_off_centre_guess_recentres() {
        let image = gaussian_image((40, 40), 20.4, 19.7, 2.5, 80.0, 3.0);
        let peak = gaussian_peak_fit(image.view(), 17.0, 21.0, 5.0, &PeakFitConfig::default())
            .unwrap();

        assert!(peak.converged);
        assert_relative_eq!(peak.x, 20.4, epsilon = 1e-4);
        assert_relative_eq!(peak.y, 19.7, epsilon = 1e-4);
    }

    #[test]
    fn test_ramp_stays_within_window() {
        // No peak at all: the fit must not run off along the gradient
        let image = Array2::from_shape_fn((32, 32), |(_, c)| c as f64);
        let peak = gaussian_peak_fit(image.view(), 16.0, 16.0, 4.0, &PeakFitConfig::default())
            .unwrap();

        let drift = ((peak.x - 16.0).powi(2) + (peak.y - 16.0).powi(2)).sqrt();
        assert!(drift <= 4.0 + 1e-9, "drifted {drift}");
        assert!(peak.x > 16.0);
        assert_relative_eq!(peak.y, 16.0, epsilon = 1e-6);
    }

    #[test]
    fn test_half_max_centroid_ignores_clipped_tails() {
        let image = gaussian_image((32, 32), 18.0, 16.0, 1.5, 50.0, 0.0);
        let samples = collect_window(image.view(), 16.0, 16.0, 5.0);

        let (hx, hy) = half_max_centroid(&samples);
        assert_relative_eq!(hx, 18.0, epsilon = 1e-9);
        assert_relative_eq!(hy, 16.0, epsilon = 1e-9);
    }

    #[test]
    fn test_flat_window_is_an_error() {
        let image = Array2::from_elem((16, 16), 3.0);
        assert!(matches!(
            gaussian_peak_fit(image.view(), 8.0, 8.0, 4.0, &PeakFitConfig::default()),
            Err(ImageProcError::FlatWindow { .. })
        ));
    }

    #[test]
    fn test_window_outside_image() {
        let image = gaussian_image((16, 16), 8.0, 8.0, 2.0, 1.0, 0.0);
        assert!(matches!(
            gaussian_peak_fit(image.view(), 40.0, 40.0, 3.0, &PeakFitConfig::default()),
            Err(ImageProcError::TooFewPixels { .. })
        ));
    }

    #[test]
    fn test_rejects_non_positive_radius() {
        let image = gaussian_image((16, 16), 8.0, 8.0, 2.0, 1.0, 0.0);
        assert!(matches!(
            gaussian_peak_fit(image.view(), 8.0, 8.0, 0.0, &PeakFitConfig::default()),
            Err(ImageProcError::InvalidArgument(_))
        ));
    }
}

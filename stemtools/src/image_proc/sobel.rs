//! Sobel edge operator.

use ndarray::{Array2, ArrayView2};

const KERNEL_X: [[f64; 3]; 3] = [[-1.0, 0.0, 1.0], [-2.0, 0.0, 2.0], [-1.0, 0.0, 1.0]];
const KERNEL_Y: [[f64; 3]; 3] = [[-1.0, -2.0, -1.0], [0.0, 0.0, 0.0], [1.0, 2.0, 1.0]];

/// Gradient magnitude and direction of an image.
///
/// Borders replicate the nearest edge pixel, so a constant image has zero
/// gradient everywhere including the frame.
///
/// # Returns
/// `(magnitude, direction)` where direction is `atan2(gy, gx)` in radians
pub fn sobel_edges(image: ArrayView2<f64>) -> (Array2<f64>, Array2<f64>) {
    let (rows, cols) = image.dim();
    let mut magnitude = Array2::<f64>::zeros((rows, cols));
    let mut direction = Array2::<f64>::zeros((rows, cols));
    if rows == 0 || cols == 0 {
        return (magnitude, direction);
    }

    let clamp = |i: isize, n: usize| i.clamp(0, n as isize - 1) as usize;

    for r in 0..rows {
        for c in 0..cols {
            let mut gx = 0.0;
            let mut gy = 0.0;
            for (kr, (row_x, row_y)) in KERNEL_X.iter().zip(KERNEL_Y.iter()).enumerate() {
                let rr = clamp(r as isize + kr as isize - 1, rows);
                for kc in 0..3 {
                    let cc = clamp(c as isize + kc as isize - 1, cols);
                    let v = image[[rr, cc]];
                    gx += row_x[kc] * v;
                    gy += row_y[kc] * v;
                }
            }
            magnitude[[r, c]] = gx.hypot(gy);
            direction[[r, c]] = gy.atan2(gx);
        }
    }

    (magnitude, direction)
}

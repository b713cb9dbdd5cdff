//! Synthetic data for exercising the STEM analysis crates.
//!
//! Nothing here models a real microscope beyond what the tests need:
//!
//! - a nanobeam diffraction pattern is a lattice of bright disks on a flat
//!   background, with a known reciprocal basis
//! - an EELS spectrum is a power-law background with Gaussian-broadened
//!   edge steps on top
//!
//! All randomness goes through `ChaCha8Rng` seeded by the caller, so every
//! generated dataset is reproducible.
//!
//! # Coordinate conventions
//! Points are `(x, y)` = `(col, row)` in image convention (row 0 at the top).
//! Lattice vectors are Cartesian with y pointing up, matching the basis
//! returned by the disk locator: the rows of [`SyntheticLattice::basis`] are
//! the two reciprocal lattice vectors.

use nalgebra::Matrix2;
use ndarray::{Array1, Array2, Array3, ArrayView1, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Intensity profile of a single diffraction disk
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DiskProfile {
    /// Isotropic Gaussian spot
    Gaussian { sigma: f64 },
    /// Flat disk with a logistic rim of width `edge_width`
    TopHat { radius: f64, edge_width: f64 },
}

impl DiskProfile {
    fn value(&self, distance: f64) -> f64 {
        match *self {
            DiskProfile::Gaussian { sigma } => (-(distance * distance) / (2.0 * sigma * sigma)).exp(),
            DiskProfile::TopHat { radius, edge_width } => {
                1.0 / (1.0 + ((distance - radius) / edge_width).exp())
            }
        }
    }
}

/// Diffraction pattern generator with a known disk lattice
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticLattice {
    /// Pattern shape `(rows, cols)`
    pub shape: (usize, usize),
    /// Position of the (0, 0) disk, `(x, y)`
    pub center: (f64, f64),
    /// Rows are the lattice vectors g1 and g2, Cartesian with y up
    pub basis: Matrix2<f64>,
    /// Miller-style indices `(h, k)` of the disks to draw
    pub indices: Vec<(f64, f64)>,
    pub profile: DiskProfile,
    pub amplitude: f64,
    pub background: f64,
}

impl SyntheticLattice {
    /// Square lattice with the central disk at `(cols / 2, rows / 2)` and
    /// every disk up to `order` steps away along each axis.
    pub fn square(shape: (usize, usize), spacing: f64, order: i32, profile: DiskProfile) -> Self {
        Self {
            shape,
            center: ((shape.1 / 2) as f64, (shape.0 / 2) as f64),
            basis: Matrix2::new(spacing, 0.0, 0.0, spacing),
            indices: square_indices(order),
            profile,
            amplitude: 1000.0,
            background: 10.0,
        }
    }

    /// Same lattice with every lattice vector multiplied on the right by
    /// `deformation`
    pub fn deformed(&self, deformation: &Matrix2<f64>) -> Self {
        Self {
            basis: self.basis * deformation,
            ..self.clone()
        }
    }

    /// Disk centres in image coordinates, in `indices` order
    pub fn disk_positions(&self) -> Vec<(f64, f64)> {
        let (cx, cy) = self.center;
        self.indices
            .iter()
            .map(|&(h, k)| {
                let gx = h * self.basis[(0, 0)] + k * self.basis[(1, 0)];
                let gy = h * self.basis[(0, 1)] + k * self.basis[(1, 1)];
                (cx + gx, cy - gy)
            })
            .collect()
    }

    /// Render the pattern
    pub fn pattern(&self) -> Array2<f64> {
        let positions = self.disk_positions();
        Array2::from_shape_fn(self.shape, |(r, c)| {
            let disks: f64 = positions
                .iter()
                .map(|&(x, y)| {
                    let dx = c as f64 - x;
                    let dy = r as f64 - y;
                    self.profile.value((dx * dx + dy * dy).sqrt())
                })
                .sum();
            self.background + self.amplitude * disks
        })
    }
}

/// Indices `(h, k)` with `|h|, |k| <= order`, row-major from `(-order, -order)`
pub fn square_indices(order: i32) -> Vec<(f64, f64)> {
    let mut indices = Vec::new();
    for k in -order..=order {
        for h in -order..=order {
            indices.push((h as f64, k as f64));
        }
    }
    indices
}

/// Binary disk of `radius` centred on `(cols / 2, rows / 2)`, the template
/// position the correlation routines expect.
pub fn disk_template(shape: (usize, usize), radius: f64) -> Array2<f64> {
    let cx = (shape.1 / 2) as f64;
    let cy = (shape.0 / 2) as f64;
    Array2::from_shape_fn(shape, |(r, c)| {
        let dx = c as f64 - cx;
        let dy = r as f64 - cy;
        if (dx * dx + dy * dy).sqrt() <= radius {
            1.0
        } else {
            0.0
        }
    })
}

/// Add uniform noise in `[-amplitude, amplitude)` to every pixel
pub fn add_uniform_noise(image: &mut Array2<f64>, amplitude: f64, seed: u64) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    image.mapv_inplace(|v| v + rng.random_range(-amplitude..amplitude));
}

/// Stack patterns into an ROI array of shape `(rows, cols, n)`
pub fn stack_patterns(patterns: &[Array2<f64>]) -> Array3<f64> {
    let shape = patterns.first().map(|p| p.dim()).unwrap_or((0, 0));
    let mut stack = Array3::zeros((shape.0, shape.1, patterns.len()));
    for (n, pattern) in patterns.iter().enumerate() {
        stack.index_axis_mut(Axis(2), n).assign(pattern);
    }
    stack
}

/// An ionization edge: a smoothed step of `height` at `onset` eV
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyntheticEdge {
    pub onset: f64,
    pub width: f64,
    pub height: f64,
}

/// Power-law background `constant · E^power` plus the given edges.
///
/// Each edge is an error-function-like step built from a logistic curve
/// that decays back towards zero over 20 widths, so the integrated edge
/// intensity is finite within a typical window.
pub fn powerlaw_spectrum(
    energies: ArrayView1<f64>,
    constant: f64,
    power: f64,
    edges: &[SyntheticEdge],
) -> Array1<f64> {
    energies.mapv(|e| {
        let background = constant * e.powf(power);
        let signal: f64 = edges
            .iter()
            .map(|edge| {
                let rel = e - edge.onset;
                let step = 1.0 / (1.0 + (-rel / edge.width).exp());
                let decay = if rel > 0.0 {
                    (-rel / (20.0 * edge.width)).exp()
                } else {
                    1.0
                };
                edge.height * step * decay
            })
            .sum();
        background + signal
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_square_lattice_positions() {
        let lattice = SyntheticLattice::square(
            (64, 64),
            16.0,
            1,
            DiskProfile::Gaussian { sigma: 2.0 },
        );
        let positions = lattice.disk_positions();
        assert_eq!(positions.len(), 9);
        // (h, k) = (1, 1) sits right of and above the centre
        assert_eq!(positions[8], (48.0, 16.0));
        assert_eq!(positions[4], (32.0, 32.0));
    }

    #[test]
    fn test_pattern_peaks_on_disks() {
        let lattice = SyntheticLattice::square(
            (48, 48),
            12.0,
            1,
            DiskProfile::TopHat {
                radius: 3.0,
                edge_width: 0.5,
            },
        );
        let pattern = lattice.pattern();
        assert!(pattern[[24, 24]] > 500.0);
        assert!(pattern[[24, 30]] < 50.0);
    }

    #[test]
    fn test_noise_is_reproducible() {
        let mut a = Array2::zeros((8, 8));
        let mut b = Array2::zeros((8, 8));
        add_uniform_noise(&mut a, 1.0, 7);
        add_uniform_noise(&mut b, 1.0, 7);
        assert_eq!(a, b);
        assert!(a.iter().all(|v| v.abs() <= 1.0));
    }
}

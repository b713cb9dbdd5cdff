//! Numeric primitives shared by the STEM analysis crates.
//!
//! Contains the pieces that carry no microscopy semantics of their own:
//! summary statistics, the exact-area resampler, a small least-squares
//! solver for 2-column regressions and a scalar minimizer.

pub mod lstsq;
pub mod minimize;
pub mod resample;
pub mod stats_scan;

pub use lstsq::{lstsq_2col, LstsqError};
pub use minimize::{minimize_scalar, MinimizeError, MinimizeResult};
pub use resample::{resize_1d, resize_2d, ResampleError};
pub use stats_scan::{median, StatsError, StatsScan};

//! Local scalar minimization.
//!
//! A downhill bracket search from a starting guess followed by Brent's
//! method (golden section with parabolic interpolation). Derivative-free,
//! so it copes with objectives that are only piecewise smooth, such as
//! interpolated image sums.

use thiserror::Error;

/// Golden ratio used to grow the bracket
const GOLD: f64 = 1.618_033_988_749_895;
/// Golden-section fraction `(3 - √5) / 2`
const CGOLD: f64 = 0.381_966_011_250_105;
/// Guards the tolerance when the minimum sits at zero
const ZEPS: f64 = 1e-12;
const MAX_BRACKET_STEPS: usize = 60;

/// Errors that can occur during minimization
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MinimizeError {
    #[error("Objective returned a non-finite value at x = {0}")]
    NonFinite(f64),
    #[error("No bracketing interval found within {0} expansion steps")]
    NoBracket(usize),
    #[error("Invalid argument: {0}")]
    ArgumentError(String),
}

/// Outcome of a scalar minimization
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinimizeResult {
    /// Location of the minimum
    pub x: f64,
    /// Objective value at `x`
    pub fun: f64,
    /// Number of Brent iterations performed
    pub iterations: usize,
}

fn evaluate<F: FnMut(f64) -> f64>(f: &mut F, x: f64) -> Result<f64, MinimizeError> {
    let value = f(x);
    if value.is_finite() {
        Ok(value)
    } else {
        Err(MinimizeError::NonFinite(x))
    }
}

/// Expand downhill from `(a, b)` until `f(b)` is below both neighbours.
fn bracket<F: FnMut(f64) -> f64>(
    f: &mut F,
    mut a: f64,
    mut b: f64,
) -> Result<(f64, f64, f64), MinimizeError> {
    let mut fa = evaluate(f, a)?;
    let mut fb = evaluate(f, b)?;
    if fb > fa {
        std::mem::swap(&mut a, &mut b);
        std::mem::swap(&mut fa, &mut fb);
    }

    let mut c = b + GOLD * (b - a);
    let mut fc = evaluate(f, c)?;
    let mut steps = 0;
    while fc < fb {
        if steps == MAX_BRACKET_STEPS {
            return Err(MinimizeError::NoBracket(MAX_BRACKET_STEPS));
        }
        a = b;
        b = c;
        fb = fc;
        c = b + GOLD * (b - a);
        fc = evaluate(f, c)?;
        steps += 1;
    }

    if fb >= fa && fb >= fc {
        // Flat objective: every probe returned the same value
        return Err(MinimizeError::NoBracket(steps));
    }

    Ok((a, b, c))
}

/// Minimize a scalar function starting from `x0`.
///
/// # Arguments
/// * `f` - Objective to minimize
/// * `x0` - Starting guess
/// * `step` - Initial probe distance for bracketing (non-zero)
/// * `tol` - Relative tolerance on `x`
/// * `max_iterations` - Cap on Brent iterations
///
/// # Errors
/// * `MinimizeError::ArgumentError` - `step` is zero or `tol` not positive
/// * `MinimizeError::NonFinite` - the objective returned NaN or infinity
/// * `MinimizeError::NoBracket` - no downhill direction was found
pub fn minimize_scalar<F>(
    mut f: F,
    x0: f64,
    step: f64,
    tol: f64,
    max_iterations: usize,
) -> Result<MinimizeResult, MinimizeError>
where
    F: FnMut(f64) -> f64,
{
    if step == 0.0 || !step.is_finite() {
        return Err(MinimizeError::ArgumentError(format!(
            "step must be finite and non-zero, got {step}"
        )));
    }
    if tol <= 0.0 {
        return Err(MinimizeError::ArgumentError(format!(
            "tol must be positive, got {tol}"
        )));
    }

    let (ax, bx, cx) = bracket(&mut f, x0, x0 + step)?;
    let (mut a, mut b) = if ax < cx { (ax, cx) } else { (cx, ax) };

    let mut x = bx;
    let mut w = bx;
    let mut v = bx;
    let mut fx = evaluate(&mut f, x)?;
    let mut fw = fx;
    let mut fv = fx;
    let mut d: f64 = 0.0;
    let mut e: f64 = 0.0;

    for iteration in 0..max_iterations {
        let xm = 0.5 * (a + b);
        let tol1 = tol * x.abs() + ZEPS;
        let tol2 = 2.0 * tol1;

        if (x - xm).abs() <= tol2 - 0.5 * (b - a) {
            return Ok(MinimizeResult {
                x,
                fun: fx,
                iterations: iteration,
            });
        }

        if e.abs() > tol1 {
            // Try a parabolic step through x, v, w
            let r = (x - w) * (fx - fv);
            let mut q = (x - v) * (fx - fw);
            let mut p = (x - v) * q - (x - w) * r;
            q = 2.0 * (q - r);
            if q > 0.0 {
                p = -p;
            }
            q = q.abs();
            let e_prev = e;
            e = d;

            if p.abs() >= (0.5 * q * e_prev).abs() || p <= q * (a - x) || p >= q * (b - x) {
                e = if x >= xm { a - x } else { b - x };
                d = CGOLD * e;
            } else {
                d = p / q;
                let u = x + d;
                if u - a < tol2 || b - u < tol2 {
                    d = tol1.copysign(xm - x);
                }
            }
        } else {
            e = if x >= xm { a - x } else { b - x };
            d = CGOLD * e;
        }

        let u = if d.abs() >= tol1 {
            x + d
        } else {
            x + tol1.copysign(d)
        };
        let fu = evaluate(&mut f, u)?;

        if fu <= fx {
            if u >= x {
                a = x;
            } else {
                b = x;
            }
            v = w;
            fv = fw;
            w = x;
            fw = fx;
            x = u;
            fx = fu;
        } else {
            if u < x {
                a = u;
            } else {
                b = u;
            }
            if fu <= fw || w == x {
                v = w;
                fv = fw;
                w = u;
                fw = fu;
            } else if fu <= fv || v == x || v == w {
                v = u;
                fv = fu;
            }
        }
    }

    log::debug!("minimize_scalar hit the iteration cap at x = {x}");
    Ok(MinimizeResult {
        x,
        fun: fx,
        iterations: max_iterations,
    })
}

//! Per-column projection of multiplicative updates onto the probability simplex.
//!
//! Both searches look for a shift ν per column such that a strictly decreasing
//! function of ν equals one. All columns advance in lock-step: every iteration
//! evaluates the column sums of the whole batch once.

use crate::error::{NmfError, Result};
use ndarray::{Array1, Array2, ArrayView2, Zip};

/// Upper bound on the number of times a bracket may be doubled.
const MAX_DOUBLINGS: usize = 1024;
/// Upper bound on the number of bisections, enough to exhaust f64 resolution.
const MAX_BISECTIONS: usize = 200;

/// Solves `Σᵢ numᵢⱼ / (denumᵢⱼ + νⱼ) = 1` for every column `j`.
///
/// `denum` is either `(k, p)` like `num` or a single `(k, 1)` column shared by all pixels.
/// When the unshifted ratio already sums to one within `tol`, ν is exactly zero.
/// ν may be negative, down to the first pole `-min{denumᵢ : numᵢ > 0}`.
pub fn dichotomy_simplex(num: &Array2<f64>, denum: &Array2<f64>, tol: f64) -> Result<Array1<f64>> {
    let denum = broadcast_like(denum, num, "denum")?;
    check_finite_non_negative(num.view(), "num")?;
    check_finite_non_negative(denum, "denum")?;

    // Pole of each column: the ratio sum goes to +inf as ν approaches it from above.
    let mut poles = Array1::from_elem(num.ncols(), f64::NAN);
    Zip::from(&mut poles)
        .and(num.columns())
        .and(denum.columns())
        .for_each(|pole, n, d| {
            let min_active = n
                .iter()
                .zip(d.iter())
                .filter(|(n, _)| **n > 0.0)
                .map(|(_, d)| *d)
                .fold(f64::INFINITY, f64::min);
            if min_active.is_finite() {
                *pole = -min_active;
            }
        });
    if let Some(column) = poles.iter().position(|p| p.is_nan()) {
        return Err(NmfError::DegenerateSimplex {
            column,
            reason: "all numerators are zero".to_string(),
        });
    }

    let eval = |nu: &Array1<f64>| -> Array1<f64> {
        let mut sums = Array1::zeros(nu.len());
        Zip::from(&mut sums)
            .and(num.columns())
            .and(denum.columns())
            .and(nu)
            .for_each(|s, n, d, &nu| {
                *s = n
                    .iter()
                    .zip(d.iter())
                    .filter(|(n, _)| **n > 0.0)
                    .map(|(n, d)| n / (d + nu))
                    .sum::<f64>()
                    - 1.0;
            });
        sums
    };

    solve_decreasing(num.ncols(), tol, Some(&poles), eval)
}

/// Solves `Σᵢ rᵢⱼ(νⱼ) = 1` for every column `j`, where `rᵢⱼ(ν)` is the positive root of
/// `a·r² + (bᵢⱼ + ν)·r - cᵢⱼ = 0`.
///
/// This is the projection used by the quadratic H update with Laplacian smoothing.
pub fn dichotomy_simplex_acc(
    a: f64,
    b: &Array2<f64>,
    minus_c: &Array2<f64>,
    tol: f64,
) -> Result<Array1<f64>> {
    if !(a > 0.0) || !a.is_finite() {
        return Err(NmfError::Config(format!(
            "the quadratic coefficient must be positive, got {}",
            a
        )));
    }
    let b = broadcast_like(b, minus_c, "b")?;
    check_finite_non_negative(minus_c.view(), "minus_c")?;
    if b.iter().any(|v| !v.is_finite()) {
        return Err(NmfError::DegenerateSimplex {
            column: first_non_finite_column(b),
            reason: "linear coefficient is not finite".to_string(),
        });
    }

    let eval = |nu: &Array1<f64>| -> Array1<f64> {
        let mut sums = Array1::zeros(nu.len());
        Zip::from(&mut sums)
            .and(b.columns())
            .and(minus_c.columns())
            .and(nu)
            .for_each(|s, b, c, &nu| {
                *s = b
                    .iter()
                    .zip(c.iter())
                    .map(|(b, c)| quadratic_root(a, b + nu, *c))
                    .sum::<f64>()
                    - 1.0;
            });
        sums
    };

    solve_decreasing(minus_c.ncols(), tol, None, eval)
}

/// Positive root of `a·r² + beta·r - c = 0` for `a > 0`, `c >= 0`.
///
/// Uses the form that avoids cancellation for the sign of `beta`.
pub fn quadratic_root(a: f64, beta: f64, c: f64) -> f64 {
    let disc = (beta * beta + 4.0 * a * c).sqrt();
    if beta >= 0.0 {
        let den = beta + disc;
        if den == 0.0 {
            0.0
        } else {
            2.0 * c / den
        }
    } else {
        (disc - beta) / (2.0 * a)
    }
}

/// Root search on `n_cols` strictly decreasing functions evaluated together by `eval`,
/// which returns `f(ν) - 1` per column.
///
/// `poles` gives, per column, a lower limit where `f` goes to +inf. Without it the
/// lower end of the bracket is found by doubling as well.
fn solve_decreasing<F>(
    n_cols: usize,
    tol: f64,
    poles: Option<&Array1<f64>>,
    eval: F,
) -> Result<Array1<f64>>
where
    F: Fn(&Array1<f64>) -> Array1<f64>,
{
    let mut nu = Array1::<f64>::zeros(n_cols);
    let g0 = eval(&nu);
    if let Some(column) = g0.iter().position(|g| g.is_nan()) {
        return Err(NmfError::DegenerateSimplex {
            column,
            reason: "column sum is not a number".to_string(),
        });
    }

    let mut lo = Array1::<f64>::zeros(n_cols);
    let mut hi = Array1::<f64>::zeros(n_cols);
    let mut active = vec![false; n_cols];
    let mut grow_up = vec![false; n_cols];
    let mut grow_down = vec![false; n_cols];

    for j in 0..n_cols {
        if g0[j].abs() <= tol {
            continue;
        }
        active[j] = true;
        if g0[j] > 0.0 {
            // Root lies right of zero.
            hi[j] = 1.0;
            grow_up[j] = true;
        } else {
            // Root lies left of zero.
            match poles {
                Some(poles) => lo[j] = poles[j],
                None => {
                    lo[j] = -1.0;
                    grow_down[j] = true;
                }
            }
        }
    }

    // Bracketing: double the open end until the sign changes.
    let mut doublings = 0;
    while grow_up.iter().chain(grow_down.iter()).any(|g| *g) {
        if doublings > MAX_DOUBLINGS {
            let column = grow_up
                .iter()
                .zip(grow_down.iter())
                .position(|(u, d)| *u || *d)
                .unwrap_or(0);
            return Err(NmfError::DegenerateSimplex {
                column,
                reason: format!("no bracket found after {} doublings", MAX_DOUBLINGS),
            });
        }
        doublings += 1;

        let probe = Array1::from_shape_fn(n_cols, |j| {
            if grow_up[j] {
                hi[j]
            } else if grow_down[j] {
                lo[j]
            } else {
                0.0
            }
        });
        let g = eval(&probe);
        for j in 0..n_cols {
            if !(grow_up[j] || grow_down[j]) {
                continue;
            }
            if g[j].is_nan() || !probe[j].is_finite() {
                return Err(NmfError::DegenerateSimplex {
                    column: j,
                    reason: "column sum diverged while bracketing".to_string(),
                });
            }
            if grow_up[j] {
                if g[j] >= 0.0 {
                    lo[j] = hi[j];
                    hi[j] *= 2.0;
                } else {
                    grow_up[j] = false;
                }
            } else if g[j] <= 0.0 {
                hi[j] = lo[j];
                lo[j] *= 2.0;
            } else {
                grow_down[j] = false;
            }
        }
    }

    // Bisection, all columns in lock-step.
    for _ in 0..MAX_BISECTIONS {
        if !active.iter().any(|a| *a) {
            break;
        }
        let mid = Array1::from_shape_fn(n_cols, |j| {
            if active[j] {
                0.5 * (lo[j] + hi[j])
            } else {
                nu[j]
            }
        });
        let g = eval(&mid);
        for j in 0..n_cols {
            if !active[j] {
                continue;
            }
            nu[j] = mid[j];
            let width = hi[j] - lo[j];
            if g[j].abs() <= tol || width <= f64::EPSILON * mid[j].abs().max(1.0) {
                active[j] = false;
            } else if g[j] > 0.0 {
                lo[j] = mid[j];
            } else {
                hi[j] = mid[j];
            }
        }
    }

    if active.iter().any(|a| *a) {
        tracing::debug!(
            "Simplex search stopped after {} bisections on {} columns",
            MAX_BISECTIONS,
            active.iter().filter(|a| **a).count()
        );
    }

    Ok(nu)
}

fn broadcast_like<'a>(
    m: &'a Array2<f64>,
    like: &Array2<f64>,
    what: &'static str,
) -> Result<ArrayView2<'a, f64>> {
    m.broadcast(like.raw_dim())
        .ok_or(NmfError::ShapeMismatch {
            what,
            expected: like.dim(),
            found: m.dim(),
        })
}

fn check_finite_non_negative(m: ArrayView2<f64>, what: &str) -> Result<()> {
    for (column, col) in m.columns().into_iter().enumerate() {
        if col.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(NmfError::DegenerateSimplex {
                column,
                reason: format!("{} must be finite and non-negative", what),
            });
        }
    }
    Ok(())
}

fn first_non_finite_column(m: ArrayView2<f64>) -> usize {
    m.columns()
        .into_iter()
        .position(|col| col.iter().any(|v| !v.is_finite()))
        .unwrap_or(0)
}

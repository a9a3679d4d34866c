//! Objective functions of the factorization.
//!
//! All functions are pure. The KL divergence is split into its linear and
//! logarithmic parts, which keeps it accurate when the data holds many zeros.

use crate::error::{NmfError, Result};
use crate::routines::updates::check_floor;
use crate::structs::factors::{check_shapes, expect_shape};
use crate::structs::options::{SolverOptions, Sparsity};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

/// How elementwise terms are reduced to a scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reduction {
    #[default]
    Sum,
    /// Mean over the entries of the term
    Average,
}

impl Reduction {
    fn reduce(&self, total: f64, n: usize) -> f64 {
        match self {
            Reduction::Sum => total,
            Reduction::Average => {
                if n == 0 {
                    0.0
                } else {
                    total / n as f64
                }
            }
        }
    }
}

/// `Σ (D·A - X)²`
pub fn frobenius_loss(
    x: &Array2<f64>,
    d: &Array2<f64>,
    a: &Array2<f64>,
    reduction: Reduction,
) -> Result<f64> {
    let da = product(x, d, a)?;
    let mut total = 0.0;
    Zip::from(&da).and(x).for_each(|p, x| total += (p - x).powi(2));
    Ok(reduction.reduce(total, x.len()))
}

/// Generalized KL divergence `Σ X log(X / DA) + (DA - X)`.
pub fn kl_div(
    x: &Array2<f64>,
    d: &Array2<f64>,
    a: &Array2<f64>,
    eps: f64,
    safe: bool,
    reduction: Reduction,
) -> Result<f64> {
    if safe {
        check_floor("A", a, eps)?;
        check_floor("D", d, eps)?;
    }
    let da = product(x, d, a)?;
    Ok(kl(x, &da, eps, reduction))
}

/// KL divergence between `x` and an already computed model `da`.
pub fn kl(x: &Array2<f64>, da: &Array2<f64>, eps: f64, reduction: Reduction) -> f64 {
    let mut lin = 0.0;
    let mut log = 0.0;
    Zip::from(x).and(da).for_each(|&x, &m| {
        lin += m - x;
        log += x * (x + eps).ln() - x * (m + eps).ln();
    });
    reduction.reduce(lin, x.len()) + reduction.reduce(log, x.len())
}

/// The part of the KL divergence that depends on D and A: `Σ DA - X log(DA)`.
pub fn kl_div_loss(
    x: &Array2<f64>,
    d: &Array2<f64>,
    a: &Array2<f64>,
    eps: f64,
    safe: bool,
    reduction: Reduction,
) -> Result<f64> {
    if safe {
        check_floor("A", a, eps)?;
        check_floor("D", d, eps)?;
    }
    let da = product(x, d, a)?;
    let mut lin = 0.0;
    let mut log = 0.0;
    Zip::from(x).and(&da).for_each(|&x, &m| {
        lin += m;
        log += x * (m + eps).ln();
    });
    Ok(reduction.reduce(lin, x.len()) - reduction.reduce(log, x.len()))
}

/// Sparsity penalty `Σᵢⱼ muᵢ log(Aᵢⱼ + epsilon)`.
pub fn log_reg(a: &Array2<f64>, mu: &Sparsity, epsilon: f64, reduction: Reduction) -> Result<f64> {
    let mu = mu.column(a.nrows())?;
    let mut total = 0.0;
    for (row, m) in a.rows().into_iter().zip(mu.iter()) {
        total += m * row.iter().map(|v| (v + epsilon).ln()).sum::<f64>();
    }
    Ok(reduction.reduce(total, a.len()))
}

/// Laplacian quadratic form `Σ x ⊙ (L·x)`, i.e. `tr(xᵀLx)`.
pub fn trace_xtlx(l: &Array2<f64>, x: &Array2<f64>, reduction: Reduction) -> Result<f64> {
    expect_shape("L", l, (x.nrows(), x.nrows()))?;
    let lx = l.dot(x);
    let total = (x * &lx).sum();
    Ok(reduction.reduce(total, x.len()))
}

/// Full objective of a run: data term plus the active regularizations.
///
/// The data term is the KL divergence, or the Frobenius loss when `opts.l2`.
/// Laplacian smoothing adds `λ/2·tr(H L Hᵀ)` and sparsity adds [log_reg].
pub fn objective(
    x: &Array2<f64>,
    g: &Array2<f64>,
    w: &Array2<f64>,
    h: &Array2<f64>,
    opts: &SolverOptions,
    laplacian: Option<&Array2<f64>>,
    reduction: Reduction,
) -> Result<f64> {
    check_shapes(x, g, w, h)?;
    let gw = g.dot(w);
    let mut loss = if opts.l2 {
        frobenius_loss(x, &gw, h, reduction)?
    } else {
        kl_div(x, &gw, h, opts.log_shift, opts.safe, reduction)?
    };

    if opts.laplacian_active() {
        let l = laplacian.ok_or(NmfError::MissingLaplacian {
            lambda_l: opts.lambda_l,
        })?;
        let ht = h.t().to_owned();
        loss += opts.lambda_l / 2.0 * trace_xtlx(l, &ht, reduction)?;
    }
    if !opts.mu.is_zero() {
        loss += log_reg(h, &opts.mu, opts.epsilon_reg, reduction)?;
    }
    Ok(loss)
}

fn product(x: &Array2<f64>, d: &Array2<f64>, a: &Array2<f64>) -> Result<Array2<f64>> {
    if d.ncols() != a.nrows() {
        return Err(NmfError::ShapeMismatch {
            what: "A",
            expected: (d.ncols(), x.ncols()),
            found: a.dim(),
        });
    }
    let da = d.dot(a);
    expect_shape("D·A", &da, x.dim())?;
    Ok(da)
}

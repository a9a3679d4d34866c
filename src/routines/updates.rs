//! Multiplicative updates of the factorization `X ≈ G·W·H`.
//!
//! Every step is a pure function of its inputs: it returns a new matrix and leaves
//! X, G, W and H untouched. With `safe` set, inputs holding entries below
//! `-log_shift / 2` are rejected instead of being silently clamped.

use crate::error::{NmfError, Result};
use crate::routines::simplex::{dichotomy_simplex, dichotomy_simplex_acc, quadratic_root};
use crate::structs::factors::{check_shapes, expect_shape};
use crate::structs::options::SolverOptions;
use ndarray::{Array1, Array2, Array3, Axis, Zip};

/// Multiplicative step in W.
///
/// KL form: `W ⊙ Gᵀ(X ⊘ GWH)Hᵀ ⊘ (Gᵀ1·(H1)ᵀ)`.
/// Frobenius form: `W ⊙ GᵀXHᵀ ⊘ GᵀG·W·HHᵀ`.
///
/// The result is floored at `log_shift` in both forms, then the cells of `fixed_w`
/// holding non-negative values are overwritten with them.
pub fn multiplicative_step_w(
    x: &Array2<f64>,
    g: &Array2<f64>,
    w: &Array2<f64>,
    h: &Array2<f64>,
    opts: &SolverOptions,
    fixed_w: Option<&Array2<f64>>,
) -> Result<Array2<f64>> {
    check_shapes(x, g, w, h)?;
    if let Some(fixed) = fixed_w {
        expect_shape("fixed_W", fixed, w.dim())?;
    }

    let (w, h) = prepare_inputs(x, g, w, h, opts)?;

    let mut new_w = if opts.l2 {
        let gg = g.t().dot(g);
        let hh = h.dot(&h.t());
        let ggwhh = gg.dot(&w).dot(&hh);
        let gxh = g.t().dot(&x.dot(&h.t()));
        &w / &ggwhh * &gxh
    } else {
        let gwh = g.dot(&w).dot(&h);
        let op1 = x / &gwh;
        let term1 = g.t().dot(&op1).dot(&h.t());
        let term2 = outer(&g.sum_axis(Axis(0)), &h.sum_axis(Axis(1)));
        &w / &term2 * &term1
    };

    floor_inplace(&mut new_w, opts.log_shift);
    pin(&mut new_w, fixed_w);
    tracing::trace!("W step done ({}x{})", new_w.nrows(), new_w.ncols());
    Ok(new_w)
}

/// Multiplicative step in H.
///
/// The numerator and denominator of the ratio are assembled first:
/// - KL: `num = H ⊙ (GW)ᵀ(X ⊘ GWH)`, `denum = (GW)ᵀ1`
/// - Frobenius: `num = H ⊙ (GW)ᵀX`, `denum = (GW)ᵀ(GW)H`
///
/// A non-zero `mu` adds the linearized log penalty `mu / (H + epsilon_reg)` to the
/// denominator. A non-zero `lambda_l` majorizes the Laplacian penalty around the
/// current H: `λσ·max(H)` is added to both terms and `λ·H·L` to the denominator.
/// With `force_simplex`, a shift ν per pixel is found so that every column of
/// `num / (denum + ν)` sums to one.
pub fn multiplicative_step_h(
    x: &Array2<f64>,
    g: &Array2<f64>,
    w: &Array2<f64>,
    h: &Array2<f64>,
    opts: &SolverOptions,
    laplacian: Option<&Array2<f64>>,
    fixed_h: Option<&Array2<f64>>,
) -> Result<Array2<f64>> {
    let dims = check_shapes(x, g, w, h)?;
    let laplacian = laplacian_for(opts, laplacian, dims.pixels)?;
    if let Some(fixed) = fixed_h {
        expect_shape("fixed_H", fixed, h.dim())?;
    }

    let (w, h) = prepare_inputs(x, g, w, h, opts)?;
    let gw = g.dot(&w);

    let (mut num, mut denum) = if opts.l2 {
        let num = gw.t().dot(x);
        let denum = gw.t().dot(&gw).dot(&h);
        (num, denum)
    } else {
        let gwh = gw.dot(&h);
        let num = gw.t().dot(&(x / &gwh));
        let denum = broadcast_column(&gw.sum_axis(Axis(0)), dims.pixels);
        (num, denum)
    };

    if !opts.mu.is_zero() {
        let mu = opts.mu.column(dims.components)?;
        denum = denum + &mu / &(&h + opts.epsilon_reg);
    }

    if let Some(l) = laplacian {
        let hl = h.dot(l);
        let max_h = row_max(&h);
        let shift = max_h.mapv(|m| opts.lambda_l * opts.sigma_l * m);
        num = num + &shift;
        denum = denum + &shift + &(hl * opts.lambda_l);
    }

    let num = &h * &num;

    if opts.safe {
        check_no_negative("H", "num", &num)?;
        check_no_negative("H", "denum", &denum)?;
    }

    let mut new_h = if opts.force_simplex {
        let nu = dichotomy_simplex(&num, &denum, opts.dicotomy_tol)?;
        num / &(denum + &nu.insert_axis(Axis(0)))
    } else {
        num / &denum
    };

    floor_inplace(&mut new_h, opts.log_shift);
    pin(&mut new_h, fixed_h);
    tracing::trace!("H step done ({}x{})", new_h.nrows(), new_h.ncols());
    Ok(new_h)
}

/// Multiplicative step in H solving the Laplacian-regularized KL problem exactly.
///
/// Each entry is the positive root of `a·h² + b·h - c = 0` with `a = λσ`,
/// `b = (GW)ᵀ1 + λ·H·L - λσ·H` and `c = H ⊙ (GW)ᵀ(X ⊘ GWH)`; the simplex shift is
/// searched on `b`. Without Laplacian smoothing this reduces to the classic KL step.
pub fn multiplicative_step_hq(
    x: &Array2<f64>,
    g: &Array2<f64>,
    w: &Array2<f64>,
    h: &Array2<f64>,
    opts: &SolverOptions,
    laplacian: Option<&Array2<f64>>,
    fixed_h: Option<&Array2<f64>>,
) -> Result<Array2<f64>> {
    if opts.l2 {
        return Err(NmfError::Config(
            "the quadratic H step is only defined for the KL loss".to_string(),
        ));
    }
    let dims = check_shapes(x, g, w, h)?;
    let laplacian = laplacian_for(opts, laplacian, dims.pixels)?;
    if let Some(fixed) = fixed_h {
        expect_shape("fixed_H", fixed, h.dim())?;
    }

    let (w, h) = prepare_inputs(x, g, w, h, opts)?;
    let gw = g.dot(&w);
    let gwh = gw.dot(&h);

    let minus_c = &h * &gw.t().dot(&(x / &(gwh + opts.log_shift)));
    let mut b = broadcast_column(&gw.sum_axis(Axis(0)), dims.pixels);
    if !opts.mu.is_zero() {
        let mu = opts.mu.column(dims.components)?;
        b = b + &mu / &(&h + opts.epsilon_reg);
    }

    if opts.safe {
        check_no_negative("H", "minus_c", &minus_c)?;
    }

    let mut new_h = match laplacian {
        Some(l) => {
            let a = opts.lambda_l * opts.sigma_l;
            b = b + &(h.dot(l) * opts.lambda_l) - &(&h * a);
            if opts.force_simplex {
                let nu = dichotomy_simplex_acc(a, &b, &minus_c, opts.dicotomy_tol)?;
                b = b + &nu.insert_axis(Axis(0));
            }
            let mut roots = Array2::zeros(b.raw_dim());
            Zip::from(&mut roots)
                .and(&b)
                .and(&minus_c)
                .par_for_each(|r, &b, &c| *r = quadratic_root(a, b, c));
            roots
        }
        None => {
            if opts.safe {
                check_no_negative("H", "b", &b)?;
            }
            if opts.force_simplex {
                let nu = dichotomy_simplex(&minus_c, &b, opts.dicotomy_tol)?;
                b = b + &nu.insert_axis(Axis(0));
            }
            minus_c / &b
        }
    };

    floor_inplace(&mut new_h, opts.log_shift);
    pin(&mut new_h, fixed_h);
    Ok(new_h)
}

/// Latent tensor `Q[c, p, k] = H[k, p]·D[c, k] / ((D·H)[c, p] + log_shift)`.
///
/// `Q[c, p, ·]` splits the modelled count of channel `c` at pixel `p` among the phases.
pub fn update_q(d: &Array2<f64>, h: &Array2<f64>, log_shift: f64) -> Array3<f64> {
    let (channels, components) = d.dim();
    let pixels = h.ncols();
    let dh = d.dot(h);
    Array3::from_shape_fn((channels, pixels, components), |(c, p, k)| {
        h[[k, p]] * d[[c, k]] / (dh[[c, p]] + log_shift)
    })
}

/// W step written with the latent tensor of [update_q].
///
/// Computes the same update as the KL form of [multiplicative_step_w] up to the
/// `log_shift` terms, at a cost of `O(c·p·k)` memory.
pub fn multiplicative_step_wq(
    x: &Array2<f64>,
    g: &Array2<f64>,
    w: &Array2<f64>,
    h: &Array2<f64>,
    opts: &SolverOptions,
) -> Result<Array2<f64>> {
    check_shapes(x, g, w, h)?;
    if opts.safe {
        check_floor("H", h, opts.log_shift)?;
        check_floor("W", w, opts.log_shift)?;
        check_floor("G", g, opts.log_shift)?;
    }

    let gw = g.dot(w);
    let q = update_q(&gw, h, opts.log_shift);

    // XQ[c, k] = Σₚ X[c, p]·Q[c, p, k]
    let mut xq = Array2::<f64>::zeros(gw.raw_dim());
    for ((c, k), v) in xq.indexed_iter_mut() {
        *v = x
            .row(c)
            .iter()
            .zip(q.index_axis(Axis(0), c).column(k).iter())
            .map(|(x, q)| x * q)
            .sum();
    }

    let term1 = g.t().dot(&(xq / &(gw + opts.log_shift)));
    let term2 = outer(&g.sum_axis(Axis(0)), &h.sum_axis(Axis(1)));
    let mut new_w = w / &term2 * &term1;
    floor_inplace(&mut new_w, opts.log_shift);
    Ok(new_w)
}

/// Validates and floors W and H, as every step does before computing ratios.
fn prepare_inputs(
    x: &Array2<f64>,
    g: &Array2<f64>,
    w: &Array2<f64>,
    h: &Array2<f64>,
    opts: &SolverOptions,
) -> Result<(Array2<f64>, Array2<f64>)> {
    if !opts.safe {
        return Ok((w.to_owned(), h.to_owned()));
    }
    check_floor("X", x, opts.log_shift)?;
    check_floor("H", h, opts.log_shift)?;
    check_floor("W", w, opts.log_shift)?;
    check_floor("G", g, opts.log_shift)?;
    let mut w = w.to_owned();
    let mut h = h.to_owned();
    floor_inplace(&mut w, opts.log_shift);
    floor_inplace(&mut h, opts.log_shift);
    Ok((w, h))
}

fn laplacian_for<'a>(
    opts: &SolverOptions,
    laplacian: Option<&'a Array2<f64>>,
    pixels: usize,
) -> Result<Option<&'a Array2<f64>>> {
    if !opts.laplacian_active() {
        return Ok(None);
    }
    let l = laplacian.ok_or(NmfError::MissingLaplacian {
        lambda_l: opts.lambda_l,
    })?;
    expect_shape("L", l, (pixels, pixels))?;
    Ok(Some(l))
}

/// Fails when `m` holds entries below `-log_shift / 2`, or entries that are not numbers.
pub(crate) fn check_floor(matrix: &'static str, m: &Array2<f64>, log_shift: f64) -> Result<()> {
    let threshold = log_shift / 2.0;
    let count = m.iter().filter(|v| !(**v >= -threshold)).count();
    if count > 0 {
        let min = m.iter().cloned().fold(f64::INFINITY, f64::min);
        return Err(NmfError::InvariantViolation {
            matrix,
            count,
            min,
            threshold,
        });
    }
    Ok(())
}

fn check_no_negative(step: &'static str, term: &'static str, m: &Array2<f64>) -> Result<()> {
    let count = m.iter().filter(|v| !(**v >= 0.0)).count();
    if count > 0 {
        return Err(NmfError::NegativeTerm { step, term, count });
    }
    Ok(())
}

pub(crate) fn floor_inplace(m: &mut Array2<f64>, log_shift: f64) {
    m.par_mapv_inplace(|v| v.max(log_shift));
}

/// Overwrites the cells where `fixed` is non-negative.
pub(crate) fn pin(m: &mut Array2<f64>, fixed: Option<&Array2<f64>>) {
    if let Some(fixed) = fixed {
        Zip::from(m).and(fixed).for_each(|v, &f| {
            if f >= 0.0 {
                *v = f;
            }
        });
    }
}

fn outer(a: &Array1<f64>, b: &Array1<f64>) -> Array2<f64> {
    Array2::from_shape_fn((a.len(), b.len()), |(i, j)| a[i] * b[j])
}

fn broadcast_column(col: &Array1<f64>, ncols: usize) -> Array2<f64> {
    Array2::from_shape_fn((col.len(), ncols), |(i, _)| col[i])
}

/// Row maxima as a `(k, 1)` column.
fn row_max(m: &Array2<f64>) -> Array2<f64> {
    m.map_axis(Axis(1), |row| row.iter().cloned().fold(f64::NEG_INFINITY, f64::max))
        .insert_axis(Axis(1))
}

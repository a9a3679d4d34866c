use crate::error::{NmfError, Result};
use crate::routines::linalg::{lstsq, thin_svd};
use crate::routines::updates::check_floor;
use crate::structs::dictionary::Dictionary;
use crate::structs::factors::{check_shapes, expect_shape, Factors};
use ndarray::{concatenate, s, Array1, Array2, Axis, Zip};
use ndarray_stats::QuantileExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Values below this are zeroed by the NNDSVD seeding.
const NNDSVD_EPS: f64 = 1e-6;
/// Channels where the characteristic part of G is below this fraction of its maximum
/// are used to fit the background.
const BACKGROUND_THRESHOLD: f64 = 0.001;
/// Number of trailing columns of G spanning the background.
const BACKGROUND_COLUMNS: usize = 2;

/// Seeding of the reference NMF used when neither W nor H is supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitStrategy {
    /// Scaled absolute Gaussian noise
    Random,
    /// Non-negative double SVD
    Nndsvd,
    /// NNDSVD with zeros filled by the data mean
    Nndsvda,
    /// NNDSVD with zeros filled by small random values
    #[default]
    Nndsvdar,
    /// Caller supplies both W and H
    Custom,
}

impl FromStr for InitStrategy {
    type Err = NmfError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "random" => Ok(InitStrategy::Random),
            "nndsvd" => Ok(InitStrategy::Nndsvd),
            "nndsvda" => Ok(InitStrategy::Nndsvda),
            "nndsvdar" => Ok(InitStrategy::Nndsvdar),
            "custom" => Ok(InitStrategy::Custom),
            other => Err(NmfError::InvalidInit(format!(
                "unknown strategy '{}', expected one of: random, nndsvd, nndsvda, nndsvdar, custom",
                other
            ))),
        }
    }
}

/// Produces starting values of G, W and H from whichever of them the caller supplied.
///
/// - Without W and H, a reference NMF of X seeds H, which is renormalized to the
///   simplex when `force_simplex`, and W is fitted by least squares.
/// - Without H only, `H = |lstsq(G·W, X)|`.
/// - Without W only, W is fitted by least squares against H.
///
/// With a physics dictionary, W is fitted in two stages: first on the characteristic
/// columns of G, then on its two trailing background columns restricted to the
/// channels where the characteristic lines are negligible. A single joint fit lets the
/// strong lines absorb the residual and starves the weak background.
///
/// All returned factors are floored at `log_shift`.
#[allow(clippy::too_many_arguments)]
pub fn initialize_algorithms(
    x: &Array2<f64>,
    dictionary: &Dictionary,
    w: Option<Array2<f64>>,
    h: Option<Array2<f64>>,
    n_components: usize,
    init: InitStrategy,
    random_state: u64,
    force_simplex: bool,
    log_shift: f64,
) -> Result<Factors> {
    if n_components == 0 {
        return Err(NmfError::Config(
            "the number of components must be positive".to_string(),
        ));
    }
    check_floor("X", x, log_shift)?;

    let g = dictionary.materialize(x.nrows())?;
    let two_stage = !dictionary.is_identity();

    let (w, h) = match (w, h) {
        (None, h) => {
            let h = match h {
                Some(h) => {
                    expect_shape("H", &h, (n_components, x.ncols()))?;
                    h
                }
                None => {
                    let (_, mut h) = initialize_nmf(x, n_components, init, random_state)?;
                    if force_simplex {
                        normalize_columns(&mut h);
                    }
                    h
                }
            };
            // D = |lstsq(Hᵀ, Xᵀ)ᵀ|, one spectrum per phase
            let d = lstsq(&h.t().to_owned(), &x.t().to_owned())?
                .reversed_axes()
                .mapv(f64::abs);
            let w = if two_stage { fit_loadings(&g, &d)? } else { d };
            (w, h)
        }
        (Some(w), None) => {
            expect_shape("W", &w, (g.ncols(), n_components))?;
            let d = g.dot(&w);
            let mut h = lstsq(&d, x)?.mapv(f64::abs);
            if force_simplex {
                normalize_columns(&mut h);
            }
            (w, h)
        }
        (Some(w), Some(h)) => (w, h),
    };

    let w = w.mapv(|v| v.max(log_shift));
    let h = h.mapv(|v| v.max(log_shift));
    check_shapes(x, &g, &w, &h)?;

    tracing::debug!(
        "Initialized G {:?}, W {:?}, H {:?} (two stage fit: {})",
        g.dim(),
        w.dim(),
        h.dim(),
        two_stage
    );
    Ok(Factors::new(g, w, h))
}

/// Two-stage least squares fit of `G·W ≈ D`.
fn fit_loadings(g: &Array2<f64>, d: &Array2<f64>) -> Result<Array2<f64>> {
    let r = g.ncols();
    if r <= BACKGROUND_COLUMNS {
        tracing::warn!(
            "G has {} columns, not enough for a separate background fit",
            r
        );
        return Ok(lstsq(g, d)?.mapv(|v| v.max(0.0)));
    }
    let split = r - BACKGROUND_COLUMNS;
    let g_carac = g.slice(s![.., ..split]).to_owned();
    let g_brem = g.slice(s![.., split..]).to_owned();

    let w_carac = lstsq(&g_carac, d)?.mapv(|v| v.max(0.0));

    let carac_mean = g_carac
        .mean_axis(Axis(1))
        .ok_or_else(|| NmfError::LeastSquares("G has no characteristic columns".to_string()))?;
    let carac_max = *carac_mean
        .max()
        .map_err(|e| NmfError::LeastSquares(format!("invalid characteristic columns: {}", e)))?;
    let filter: Vec<usize> = carac_mean
        .iter()
        .enumerate()
        .filter(|(_, m)| **m < carac_max * BACKGROUND_THRESHOLD)
        .map(|(i, _)| i)
        .collect();

    let w_brem = if filter.len() >= BACKGROUND_COLUMNS {
        let g_f = g_brem.select(Axis(0), &filter);
        let d_f = d.select(Axis(0), &filter);
        lstsq(&g_f, &d_f)?
    } else {
        // No background-only channels: fit what the lines leave unexplained.
        tracing::warn!(
            "Only {} background-only channels, fitting the background on the residual",
            filter.len()
        );
        let residual = d - &g_carac.dot(&w_carac);
        lstsq(&g_brem, &residual)?
    };
    let w_brem = w_brem.mapv(|v| v.max(0.0));

    concatenate(Axis(0), &[w_carac.view(), w_brem.view()])
        .map_err(|e| NmfError::LeastSquares(format!("cannot stack loadings: {}", e)))
}

/// Reference NMF seeding of `X ≈ W·H`, returning `(W, H)` with shapes `(c, k)` and `(k, p)`.
pub fn initialize_nmf(
    x: &Array2<f64>,
    n_components: usize,
    init: InitStrategy,
    random_state: u64,
) -> Result<(Array2<f64>, Array2<f64>)> {
    let (n_rows, n_cols) = x.dim();
    let mean = x.mean().unwrap_or(0.0);
    let mut rng = StdRng::seed_from_u64(random_state);

    if init == InitStrategy::Random {
        let avg = (mean / n_components as f64).sqrt();
        let h = Array2::from_shape_fn((n_components, n_cols), |_| {
            avg * rng.sample::<f64, _>(StandardNormal).abs()
        });
        let w = Array2::from_shape_fn((n_rows, n_components), |_| {
            avg * rng.sample::<f64, _>(StandardNormal).abs()
        });
        return Ok((w, h));
    }
    if init == InitStrategy::Custom {
        return Err(NmfError::InvalidInit(
            "custom initialization requires both W and H".to_string(),
        ));
    }
    if n_components > n_rows.min(n_cols) {
        return Err(NmfError::InvalidInit(format!(
            "{:?} needs n_components <= min(n_channels, n_pixels) = {}, got {}",
            init,
            n_rows.min(n_cols),
            n_components
        )));
    }

    let svd = thin_svd(x)?;
    let mut w = Array2::<f64>::zeros((n_rows, n_components));
    let mut h = Array2::<f64>::zeros((n_components, n_cols));

    // The leading singular vectors of a non-negative matrix can be chosen non-negative.
    let s0 = svd.s[0].sqrt();
    w.column_mut(0)
        .assign(&svd.u.column(0).mapv(|v| s0 * v.abs()));
    h.row_mut(0).assign(&svd.vt.row(0).mapv(|v| s0 * v.abs()));

    for j in 1..n_components {
        let u = svd.u.column(j);
        let v = svd.vt.row(j);
        let (u_p, u_n) = split_signs(&u.to_owned());
        let (v_p, v_n) = split_signs(&v.to_owned());
        let (u_p_nrm, v_p_nrm) = (norm(&u_p), norm(&v_p));
        let (u_n_nrm, v_n_nrm) = (norm(&u_n), norm(&v_n));
        let m_p = u_p_nrm * v_p_nrm;
        let m_n = u_n_nrm * v_n_nrm;

        // Keep the dominating sign pattern
        let (u, v, sigma) = if m_p > m_n {
            (u_p / u_p_nrm, v_p / v_p_nrm, m_p)
        } else {
            (u_n / u_n_nrm, v_n / v_n_nrm, m_n)
        };
        let lbd = (svd.s[j] * sigma).sqrt();
        w.column_mut(j).assign(&(u * lbd));
        h.row_mut(j).assign(&(v * lbd));
    }

    w.mapv_inplace(|v| if v < NNDSVD_EPS || !v.is_finite() { 0.0 } else { v });
    h.mapv_inplace(|v| if v < NNDSVD_EPS || !v.is_finite() { 0.0 } else { v });

    match init {
        InitStrategy::Nndsvda => {
            w.mapv_inplace(|v| if v == 0.0 { mean } else { v });
            h.mapv_inplace(|v| if v == 0.0 { mean } else { v });
        }
        InitStrategy::Nndsvdar => {
            let mut fill = |v: &mut f64| {
                if *v == 0.0 {
                    *v = (mean * rng.sample::<f64, _>(StandardNormal) / 100.0).abs();
                }
            };
            w.iter_mut().for_each(&mut fill);
            h.iter_mut().for_each(&mut fill);
        }
        _ => {}
    }
    Ok((w, h))
}

/// Rescales every column to sum to one. Columns summing to zero become uniform.
pub fn normalize_columns(h: &mut Array2<f64>) {
    let k = h.nrows() as f64;
    for mut col in h.columns_mut() {
        let total: f64 = col.sum();
        if total > 0.0 && total.is_finite() {
            col /= total;
        } else {
            col.fill(1.0 / k);
        }
    }
}

fn split_signs(v: &Array1<f64>) -> (Array1<f64>, Array1<f64>) {
    let mut pos = Array1::zeros(v.len());
    let mut neg = Array1::zeros(v.len());
    Zip::from(&mut pos)
        .and(&mut neg)
        .and(v)
        .for_each(|p, n, &v| {
            *p = v.max(0.0);
            *n = (-v).max(0.0);
        });
    (pos, neg)
}

fn norm(v: &Array1<f64>) -> f64 {
    v.dot(v).sqrt()
}

//! Scores for comparing a factorization against ground truth phases.

use crate::error::{NmfError, Result};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rayon::prelude::*;

/// Largest matrix accepted by [unique_min]. The search visits all `n!` permutations.
pub const MAX_UNIQUE_MIN_SIZE: usize = 10;

/// Angle in degrees between two spectra.
pub fn spectral_angle(v1: ArrayView1<f64>, v2: ArrayView1<f64>) -> Result<f64> {
    if v1.len() != v2.len() {
        return Err(NmfError::ShapeMismatch {
            what: "spectrum",
            expected: (v1.len(), 1),
            found: (v2.len(), 1),
        });
    }
    let cos = v1.dot(&v2) / (v1.dot(&v1).sqrt() * v2.dot(&v2).sqrt());
    Ok(cos.clamp(-1.0, 1.0).acos().to_degrees())
}

/// Angles in degrees between every row of `v1` and every row of `v2`.
pub fn spectral_angles(v1: &Array2<f64>, v2: &Array2<f64>) -> Result<Array2<f64>> {
    if v1.ncols() != v2.ncols() {
        return Err(NmfError::ShapeMismatch {
            what: "spectra",
            expected: (v2.nrows(), v1.ncols()),
            found: v2.dim(),
        });
    }
    let (n1, n2) = (v1.nrows(), v2.nrows());
    let angles = (0..n1 * n2)
        .into_par_iter()
        .map(|idx| spectral_angle(v1.row(idx / n2), v2.row(idx % n2)))
        .collect::<Result<Vec<f64>>>()?;
    Ok(Array2::from_shape_fn((n1, n2), |(i, j)| angles[i * n2 + j]))
}

/// Sum of squared differences between two maps.
pub fn mse(map1: &Array2<f64>, map2: &Array2<f64>) -> Result<f64> {
    if map1.dim() != map2.dim() {
        return Err(NmfError::ShapeMismatch {
            what: "map",
            expected: map1.dim(),
            found: map2.dim(),
        });
    }
    Ok((map1 - map2).mapv(|d| d * d).sum())
}

/// Pairwise squared Euclidean distances between the rows of `x` and the rows of `y`.
pub fn square_distance(x: &Array2<f64>, y: &Array2<f64>) -> Result<Array2<f64>> {
    if x.ncols() != y.ncols() {
        return Err(NmfError::ShapeMismatch {
            what: "rows",
            expected: (y.nrows(), x.ncols()),
            found: y.dim(),
        });
    }
    let xx = x.map_axis(Axis(1), |r| r.dot(&r));
    let yy = y.map_axis(Axis(1), |r| r.dot(&r));
    let xy = x.dot(&y.t());
    Ok(Array2::from_shape_fn((x.nrows(), y.nrows()), |(i, j)| {
        (xx[i] + yy[j] - 2.0 * xy[[i, j]]).abs()
    }))
}

/// Per row, the smallest entry and its column. Several rows may pick the same column.
pub fn global_min(matr: &Array2<f64>) -> (Vec<f64>, Vec<usize>) {
    let mut mins = Vec::with_capacity(matr.nrows());
    let mut indices = Vec::with_capacity(matr.nrows());
    for row in matr.rows() {
        let (idx, min) = row
            .iter()
            .enumerate()
            .fold((0, f64::INFINITY), |acc, (j, &v)| if v < acc.1 { (j, v) } else { acc });
        mins.push(min);
        indices.push(idx);
    }
    let mut seen = indices.clone();
    seen.sort_unstable();
    seen.dedup();
    if seen.len() < indices.len() {
        tracing::warn!("Several results share the same truth");
    }
    (mins, indices)
}

/// Assignment of rows to columns minimizing the summed entries, by exhaustive search.
///
/// For an `n × n` matrix, returns `mins[i] = matr[perm[i], i]` and `perm`. Only
/// matrices up to [MAX_UNIQUE_MIN_SIZE] are accepted.
pub fn unique_min(matr: &Array2<f64>) -> Result<(Vec<f64>, Vec<usize>)> {
    let n = matr.nrows();
    if matr.ncols() != n {
        return Err(NmfError::ShapeMismatch {
            what: "assignment matrix",
            expected: (n, n),
            found: matr.dim(),
        });
    }
    if n > MAX_UNIQUE_MIN_SIZE {
        return Err(NmfError::Config(format!(
            "unique_min visits n! permutations and is limited to n <= {}, got {}",
            MAX_UNIQUE_MIN_SIZE, n
        )));
    }

    let cost = |perm: &[usize]| -> f64 { (0..n).map(|i| matr[[perm[i], i]]).sum() };

    // Heap's algorithm, iterative form
    let mut perm: Vec<usize> = (0..n).collect();
    let mut best = perm.clone();
    let mut best_cost = cost(&perm);
    let mut c = vec![0usize; n];
    let mut i = 1;
    while i < n {
        if c[i] < i {
            if i % 2 == 0 {
                perm.swap(0, i);
            } else {
                perm.swap(c[i], i);
            }
            let value = cost(&perm);
            if value < best_cost {
                best_cost = value;
                best = perm.clone();
            }
            c[i] += 1;
            i = 1;
        } else {
            c[i] = 0;
            i += 1;
        }
    }

    let mins = (0..n).map(|i| matr[[best[i], i]]).collect();
    Ok((mins, best))
}

/// Matches true spectra (rows of `true_vectors`) with estimated ones by spectral angle.
///
/// With `unique`, returns the assignment of [unique_min]: entry `i` pairs estimate `i`
/// with a distinct truth. Otherwise each truth gets its closest estimate, see [global_min].
pub fn find_min_angle(
    true_vectors: &Array2<f64>,
    algo_vectors: &Array2<f64>,
    unique: bool,
) -> Result<(Vec<f64>, Vec<usize>)> {
    let angles = spectral_angles(true_vectors, algo_vectors)?;
    if unique {
        unique_min(&angles)
    } else {
        Ok(global_min(&angles))
    }
}

/// Same as [find_min_angle] for abundance maps, scored by relative squared error.
pub fn find_min_mse(
    true_maps: &Array2<f64>,
    algo_maps: &Array2<f64>,
    unique: bool,
) -> Result<(Vec<f64>, Vec<usize>)> {
    let dist = square_distance(true_maps, algo_maps)?;
    let norms = true_maps.map_axis(Axis(1), |r| r.dot(&r));
    let rel = &dist / &norms.insert_axis(Axis(1));
    if unique {
        unique_min(&rel)
    } else {
        Ok(global_min(&rel))
    }
}

/// Relative squared error of each estimated map `i` against the true map `indices[i]`.
pub fn ordered_mse(
    true_maps: &Array2<f64>,
    algo_maps: &Array2<f64>,
    indices: &[usize],
) -> Result<Vec<f64>> {
    indices
        .iter()
        .enumerate()
        .map(|(i, &j)| {
            let t = true_row(true_maps, j)?;
            let a = algo_maps.row(i);
            let diff: Array1<f64> = &t - &a;
            Ok(diff.dot(&diff) / t.dot(&t))
        })
        .collect()
}

/// Spectral angle of each estimated spectrum `i` against the true spectrum `indices[i]`.
pub fn ordered_angles(
    true_spectra: &Array2<f64>,
    algo_spectra: &Array2<f64>,
    indices: &[usize],
) -> Result<Vec<f64>> {
    indices
        .iter()
        .enumerate()
        .map(|(i, &j)| spectral_angle(true_row(true_spectra, j)?, algo_spectra.row(i)))
        .collect()
}

fn true_row(m: &Array2<f64>, j: usize) -> Result<ArrayView1<'_, f64>> {
    if j >= m.nrows() {
        return Err(NmfError::ShapeMismatch {
            what: "truth index",
            expected: (m.nrows(), m.ncols()),
            found: (j + 1, m.ncols()),
        });
    }
    Ok(m.row(j))
}

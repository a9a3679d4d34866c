use ndarray::Array2;

/// Largest eigenvalue a 4-neighbour grid Laplacian can have (twice the maximum degree).
pub const GRID_SIGMA_L: f64 = 8.0;

/// Unnormalized graph Laplacian `L = D - A` of an `nx × ny` pixel grid with 4-neighbour edges.
///
/// Pixels are indexed row-major, `i * ny + j`, which matches flattening a
/// `(nx, ny)` map into the pixel axis of H.
pub fn create_laplacian_matrix(nx: usize, ny: usize) -> Array2<f64> {
    let n = nx * ny;
    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..nx {
        for j in 0..ny {
            let p = i * ny + j;
            let mut neighbours = Vec::with_capacity(4);
            if i > 0 {
                neighbours.push(p - ny);
            }
            if i + 1 < nx {
                neighbours.push(p + ny);
            }
            if j > 0 {
                neighbours.push(p - 1);
            }
            if j + 1 < ny {
                neighbours.push(p + 1);
            }
            l[[p, p]] = neighbours.len() as f64;
            for q in neighbours {
                l[[p, q]] = -1.0;
            }
        }
    }
    l
}

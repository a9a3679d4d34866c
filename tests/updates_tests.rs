use approx::assert_abs_diff_eq;
use eyre::Result;
use ndarray::{array, Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use snmfcore::prelude::*;
use snmfcore::routines::loss::kl_div;
use snmfcore::routines::updates::update_q;

/// Random positive matrix with entries in `[low, high)`
fn uniform(rng: &mut StdRng, shape: (usize, usize), low: f64, high: f64) -> Array2<f64> {
    Array2::from_shape_fn(shape, |_| rng.gen_range(low..high))
}

fn simplex_columns(rng: &mut StdRng, k: usize, p: usize) -> Array2<f64> {
    let h = uniform(rng, (k, p), 0.05, 1.0);
    let sums = h.sum_axis(Axis(0));
    &h / &sums.insert_axis(Axis(0))
}

fn assert_columns_sum_to_one(h: &Array2<f64>, eps: f64) {
    for (j, col) in h.columns().into_iter().enumerate() {
        let sum = col.sum();
        assert!(
            (sum - 1.0).abs() < eps,
            "Column {} should sum to 1, got {}",
            j,
            sum
        );
    }
}

/// Synthetic `X = G·W·H` of rank `k` with G the identity
fn low_rank_problem(seed: u64, c: usize, p: usize, k: usize) -> (Array2<f64>, Array2<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let w = uniform(&mut rng, (c, k), 0.1, 1.0);
    let h = simplex_columns(&mut rng, k, p);
    (w.dot(&h) * 100.0, Array2::eye(c))
}

/// Every entry is floored at log_shift, even where the data is zero
#[test]
fn steps_floor_their_output() -> Result<()> {
    let x = array![[0.0, 0.0, 0.0], [1.0, 2.0, 3.0], [0.5, 0.0, 4.0]];
    let g = Array2::eye(3);
    let w = array![[1.0, 0.5], [0.3, 0.2], [0.8, 0.9]];
    let h = array![[0.5, 0.2, 0.9], [0.5, 0.8, 0.1]];

    for l2 in [false, true] {
        let opts = SolverOptions {
            l2,
            ..Default::default()
        };
        let new_w = multiplicative_step_w(&x, &g, &w, &h, &opts, None)?;
        assert!(
            new_w.iter().all(|v| *v >= opts.log_shift),
            "W entries should be at least log_shift (l2 = {})",
            l2
        );
        let new_h = multiplicative_step_h(&x, &g, &new_w, &h, &opts, None, None)?;
        assert!(
            new_h.iter().all(|v| *v >= opts.log_shift),
            "H entries should be at least log_shift (l2 = {})",
            l2
        );
    }
    Ok(())
}

/// H columns lie on the simplex after the H step, with and without regularization
#[test]
fn h_step_projects_on_simplex() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(7);
    let (nx, ny) = (4, 5);
    let x = uniform(&mut rng, (12, nx * ny), 0.0, 10.0);
    let g = Array2::eye(12);
    let w = uniform(&mut rng, (12, 3), 0.1, 2.0);
    let h = simplex_columns(&mut rng, 3, nx * ny);
    let laplacian = create_laplacian_matrix(nx, ny);

    let cases = [
        SolverOptions::default(),
        SolverOptions {
            l2: true,
            ..Default::default()
        },
        SolverOptions {
            mu: Sparsity::PerComponent(vec![0.5, 0.0, 2.0]),
            ..Default::default()
        },
        SolverOptions {
            lambda_l: 3.0,
            ..Default::default()
        },
    ];
    for opts in cases.iter() {
        let new_h = multiplicative_step_h(&x, &g, &w, &h, opts, Some(&laplacian), None)?;
        assert_columns_sum_to_one(&new_h, 1e-8);
    }
    Ok(())
}

/// At an exact factorization on the simplex, the steps leave W and H in place
#[test]
fn fixed_point_is_preserved() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(11);
    let g = uniform(&mut rng, (8, 4), 0.1, 1.0);
    let w = uniform(&mut rng, (4, 3), 0.1, 1.0);
    let h = simplex_columns(&mut rng, 3, 10);
    let x = g.dot(&w).dot(&h);
    let opts = SolverOptions::default();

    let mut w_k = w.clone();
    let mut h_k = h.clone();
    for _ in 0..5 {
        w_k = multiplicative_step_w(&x, &g, &w_k, &h_k, &opts, None)?;
        h_k = multiplicative_step_h(&x, &g, &w_k, &h_k, &opts, None, None)?;
    }
    for (a, b) in w.iter().zip(w_k.iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-9);
    }
    for (a, b) in h.iter().zip(h_k.iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-9);
    }
    Ok(())
}

/// The KL divergence never increases along alternating steps
#[test]
fn kl_decreases_monotonically() -> Result<()> {
    let (x, g) = low_rank_problem(3, 20, 30, 3);
    let mut rng = StdRng::seed_from_u64(5);
    let mut w = uniform(&mut rng, (20, 3), 0.5, 1.5);
    let mut h = uniform(&mut rng, (3, 30), 0.5, 1.5);
    let opts = SolverOptions {
        force_simplex: false,
        ..Default::default()
    };

    let mut previous = kl_div(&x, &g.dot(&w), &h, opts.log_shift, true, Reduction::Sum)?;
    let first = previous;
    for i in 0..30 {
        w = multiplicative_step_w(&x, &g, &w, &h, &opts, None)?;
        h = multiplicative_step_h(&x, &g, &w, &h, &opts, None, None)?;
        let loss = kl_div(&x, &g.dot(&w), &h, opts.log_shift, true, Reduction::Sum)?;
        assert!(
            loss <= previous + 1e-9 * previous.abs().max(1.0),
            "Loss increased at iteration {}: {} -> {}",
            i,
            previous,
            loss
        );
        previous = loss;
    }
    assert!(previous < first, "The fit should improve");
    Ok(())
}

/// Pinned cells hold their value, free cells (negative mask) are updated
#[test]
fn pinned_cells_are_kept() -> Result<()> {
    let (x, g) = low_rank_problem(9, 6, 8, 2);
    let mut rng = StdRng::seed_from_u64(2);
    let w = uniform(&mut rng, (6, 2), 0.5, 1.5);
    let h = simplex_columns(&mut rng, 2, 8);
    let opts = SolverOptions::default();

    let mut fixed_w = Array2::from_elem((6, 2), -1.0);
    fixed_w[[0, 0]] = 0.25;
    fixed_w[[3, 1]] = 0.0;
    let new_w = multiplicative_step_w(&x, &g, &w, &h, &opts, Some(&fixed_w))?;
    assert_eq!(new_w[[0, 0]], 0.25);
    assert_eq!(new_w[[3, 1]], 0.0);

    let mut fixed_h = Array2::from_elem((2, 8), -1.0);
    fixed_h[[1, 4]] = 0.75;
    let new_h = multiplicative_step_h(&x, &g, &new_w, &h, &opts, None, Some(&fixed_h))?;
    assert_eq!(new_h[[1, 4]], 0.75);

    let new_h = multiplicative_step_hq(&x, &g, &new_w, &h, &opts, None, Some(&fixed_h))?;
    assert_eq!(new_h[[1, 4]], 0.75);
    Ok(())
}

/// Without a Laplacian, the quadratic H step is the classic KL step
#[test]
fn quadratic_step_matches_classic_step() -> Result<()> {
    let (x, g) = low_rank_problem(21, 10, 12, 3);
    let mut rng = StdRng::seed_from_u64(4);
    let w = uniform(&mut rng, (10, 3), 0.5, 1.5);
    let h = simplex_columns(&mut rng, 3, 12);

    for force_simplex in [false, true] {
        let opts = SolverOptions {
            force_simplex,
            ..Default::default()
        };
        let classic = multiplicative_step_h(&x, &g, &w, &h, &opts, None, None)?;
        let quadratic = multiplicative_step_hq(&x, &g, &w, &h, &opts, None, None)?;
        for (a, b) in classic.iter().zip(quadratic.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-8);
        }
    }
    Ok(())
}

/// The quadratic step with Laplacian smoothing stays on the simplex and above the floor
#[test]
fn quadratic_step_with_laplacian() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(8);
    let (nx, ny) = (3, 4);
    let x = uniform(&mut rng, (9, nx * ny), 0.0, 5.0);
    let g = Array2::eye(9);
    let w = uniform(&mut rng, (9, 2), 0.5, 1.5);
    let h = simplex_columns(&mut rng, 2, nx * ny);
    let l = create_laplacian_matrix(nx, ny);
    let opts = SolverOptions {
        lambda_l: 2.0,
        accelerate: true,
        ..Default::default()
    };

    let new_h = multiplicative_step_hq(&x, &g, &w, &h, &opts, Some(&l), None)?;
    assert_columns_sum_to_one(&new_h, 1e-8);
    assert!(new_h.iter().all(|v| *v >= opts.log_shift));
    Ok(())
}

/// The latent tensor form of the W step agrees with the direct form
#[test]
fn latent_w_step_matches_direct_step() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(13);
    let x = uniform(&mut rng, (7, 9), 0.5, 5.0);
    let g = uniform(&mut rng, (7, 4), 0.1, 1.0);
    let w = uniform(&mut rng, (4, 2), 0.5, 1.5);
    let h = simplex_columns(&mut rng, 2, 9);
    let opts = SolverOptions::default();

    let direct = multiplicative_step_w(&x, &g, &w, &h, &opts, None)?;
    let latent = multiplicative_step_wq(&x, &g, &w, &h, &opts)?;
    for (a, b) in direct.iter().zip(latent.iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-8);
    }

    // Q splits every modelled entry among the phases
    let q = update_q(&g.dot(&w), &h, opts.log_shift);
    assert_eq!(q.dim(), (7, 9, 2));
    for s in q.sum_axis(Axis(2)).iter() {
        assert_abs_diff_eq!(*s, 1.0, epsilon = 1e-10);
    }
    Ok(())
}

#[test]
fn laplacian_smoothing_needs_a_laplacian() {
    let (x, g) = low_rank_problem(1, 4, 6, 2);
    let w = Array2::from_elem((4, 2), 0.5);
    let h = Array2::from_elem((2, 6), 0.5);
    let opts = SolverOptions {
        lambda_l: 1.0,
        ..Default::default()
    };
    let err = multiplicative_step_h(&x, &g, &w, &h, &opts, None, None).unwrap_err();
    assert_eq!(err, NmfError::MissingLaplacian { lambda_l: 1.0 });
    let err = multiplicative_step_hq(&x, &g, &w, &h, &opts, None, None).unwrap_err();
    assert_eq!(err, NmfError::MissingLaplacian { lambda_l: 1.0 });
}

#[test]
fn mismatched_shapes_are_rejected() {
    let (x, g) = low_rank_problem(1, 4, 6, 2);
    let w = Array2::from_elem((4, 3), 0.5);
    let h = Array2::from_elem((2, 6), 0.5);
    let opts = SolverOptions::default();
    assert!(matches!(
        multiplicative_step_w(&x, &g, &w, &h, &opts, None),
        Err(NmfError::ShapeMismatch { .. })
    ));

    let w = Array2::from_elem((4, 2), 0.5);
    let fixed = Array2::from_elem((3, 3), -1.0);
    assert!(matches!(
        multiplicative_step_w(&x, &g, &w, &h, &opts, Some(&fixed)),
        Err(NmfError::ShapeMismatch { .. })
    ));
}

/// Negative inputs are reported in safe mode
#[test]
fn negative_inputs_violate_the_floor() {
    let (x, g) = low_rank_problem(1, 4, 6, 2);
    let w = Array2::from_elem((4, 2), 0.5);
    let mut h = Array2::from_elem((2, 6), 0.5);
    h[[0, 2]] = -0.1;
    let opts = SolverOptions::default();

    match multiplicative_step_h(&x, &g, &w, &h, &opts, None, None) {
        Err(NmfError::InvariantViolation { matrix, count, .. }) => {
            assert_eq!(matrix, "H");
            assert_eq!(count, 1);
        }
        other => panic!("Expected an invariant violation, got {:?}", other),
    }

    // Entries within half a log_shift of zero are tolerated
    h[[0, 2]] = -opts.log_shift / 4.0;
    assert!(multiplicative_step_h(&x, &g, &w, &h, &opts, None, None).is_ok());
}

#[test]
fn quadratic_step_rejects_frobenius() {
    let (x, g) = low_rank_problem(1, 4, 6, 2);
    let w = Array2::from_elem((4, 2), 0.5);
    let h = Array2::from_elem((2, 6), 0.5);
    let opts = SolverOptions {
        l2: true,
        ..Default::default()
    };
    assert!(multiplicative_step_hq(&x, &g, &w, &h, &opts, None, None).is_err());
}

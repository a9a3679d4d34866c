use crate::algorithms::{Algorithm, Constraints, NmfResult};
use crate::error::NmfError;
use crate::routines::initialization::initialize_algorithms;
use crate::routines::laplacian::create_laplacian_matrix;
use crate::routines::loss::{objective, Reduction};
use crate::routines::settings::Settings;
use crate::routines::updates::{
    multiplicative_step_h, multiplicative_step_hq, multiplicative_step_w, pin,
};
use crate::structs::dictionary::Dictionary;
use crate::structs::factors::{expect_shape, Factors};
use eyre::{Result, WrapErr};
use ndarray::Array2;
use std::time::Instant;

/// Alternating multiplicative updates of `X ≈ G·W·H`.
///
/// Each cycle takes one W step then one H step, and evaluates the objective. The run
/// stops when the relative change of the objective falls below `fit.tol`, or after
/// `fit.max_iter` cycles.
#[derive(Debug, Clone)]
pub struct SmoothNmf {
    settings: Settings,
}

impl SmoothNmf {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn fit(
        &self,
        x: &Array2<f64>,
        dictionary: &Dictionary,
        constraints: Constraints,
    ) -> Result<NmfResult> {
        let now = Instant::now();
        self.settings.validate()?;
        let opts = &self.settings.solver;
        let fit = &self.settings.fit;

        let laplacian = self.laplacian(x, constraints.laplacian)?;
        let Factors { g, mut w, mut h } = initialize_algorithms(
            x,
            dictionary,
            constraints.w0,
            constraints.h0,
            fit.n_components,
            fit.init,
            fit.random_state,
            opts.force_simplex,
            opts.log_shift,
        )
        .wrap_err("Initialization failed")?;
        if let Some(fixed) = &constraints.fixed_w {
            expect_shape("fixed_W", fixed, w.dim())?;
        }
        if let Some(fixed) = &constraints.fixed_h {
            expect_shape("fixed_H", fixed, h.dim())?;
        }
        pin(&mut w, constraints.fixed_w.as_ref());
        pin(&mut h, constraints.fixed_h.as_ref());

        let mut losses = Vec::new();
        let mut loss = objective(x, &g, &w, &h, opts, laplacian.as_ref(), Reduction::Sum)?;
        losses.push(loss);
        tracing::info!(
            "Starting {:?} with {} components, initial loss {:.6e}",
            fit.algorithm,
            fit.n_components,
            loss
        );

        let mut cycle = 0;
        let mut converged = false;
        while cycle < fit.max_iter {
            cycle += 1;

            w = multiplicative_step_w(x, &g, &w, &h, opts, constraints.fixed_w.as_ref())
                .wrap_err_with(|| format!("W step failed at cycle {}", cycle))?;
            h = if opts.accelerate {
                multiplicative_step_hq(
                    x,
                    &g,
                    &w,
                    &h,
                    opts,
                    laplacian.as_ref(),
                    constraints.fixed_h.as_ref(),
                )
            } else {
                multiplicative_step_h(
                    x,
                    &g,
                    &w,
                    &h,
                    opts,
                    laplacian.as_ref(),
                    constraints.fixed_h.as_ref(),
                )
            }
            .wrap_err_with(|| format!("H step failed at cycle {}", cycle))?;

            let previous = loss;
            loss = objective(x, &g, &w, &h, opts, laplacian.as_ref(), Reduction::Sum)?;
            losses.push(loss);

            let change = (previous - loss).abs() / previous.abs().max(f64::MIN_POSITIVE);
            tracing::debug!(
                "Cycle {}: loss {:.6e}, relative change {:.3e}",
                cycle,
                loss,
                change
            );
            if !loss.is_finite() {
                return Err(eyre::eyre!(
                    "The objective is not finite ({}) at cycle {}",
                    loss,
                    cycle
                ));
            }
            if change < fit.tol {
                converged = true;
                tracing::info!("Objective converged after {} cycles", cycle);
                break;
            }
        }

        if !converged {
            tracing::warn!(
                "Maximum number of cycles reached ({}) without convergence",
                fit.max_iter
            );
        }
        tracing::info!("Final loss {:.6e}, total time: {:.2?}", loss, now.elapsed());

        Ok(NmfResult::new(Factors::new(g, w, h), losses, cycle, converged))
    }

    /// The Laplacian of the run: the supplied one, or the grid Laplacian of `fit.shape_2d`.
    fn laplacian(
        &self,
        x: &Array2<f64>,
        supplied: Option<Array2<f64>>,
    ) -> Result<Option<Array2<f64>>> {
        let opts = &self.settings.solver;
        if !opts.laplacian_active() {
            return Ok(None);
        }
        if self.settings.fit.algorithm != Algorithm::SmoothNmf {
            return Err(NmfError::InvalidProblemType(
                "Laplacian smoothing requires SmoothNMF".to_string(),
            )
            .into());
        }
        let l = match (supplied, self.settings.fit.shape_2d) {
            (Some(l), _) => l,
            (None, Some((nx, ny))) => {
                if nx * ny != x.ncols() {
                    return Err(NmfError::ShapeMismatch {
                        what: "shape_2d",
                        expected: (x.ncols(), 1),
                        found: (nx, ny),
                    }
                    .into());
                }
                tracing::debug!("Building the {}x{} grid Laplacian", nx, ny);
                create_laplacian_matrix(nx, ny)
            }
            (None, None) => {
                return Err(NmfError::MissingLaplacian {
                    lambda_l: opts.lambda_l,
                }
                .into())
            }
        };
        expect_shape("L", &l, (x.ncols(), x.ncols()))?;
        Ok(Some(l))
    }
}

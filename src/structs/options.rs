use crate::error::{NmfError, Result};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// Strength of the log-sparsity regularization on H.
///
/// Either a single value shared by every phase, or one value per phase (row of H).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Sparsity {
    Scalar(f64),
    PerComponent(Vec<f64>),
}

impl Default for Sparsity {
    fn default() -> Self {
        Sparsity::Scalar(0.0)
    }
}

impl Sparsity {
    /// Only a scalar zero disables the penalty. A per-component vector of zeros is still applied.
    pub fn is_zero(&self) -> bool {
        matches!(self, Sparsity::Scalar(mu) if *mu == 0.0)
    }

    /// The penalty as a `(k, 1)` column, ready to broadcast against H.
    pub fn column(&self, n_components: usize) -> Result<Array2<f64>> {
        match self {
            Sparsity::Scalar(mu) => Ok(Array2::from_elem((n_components, 1), *mu)),
            Sparsity::PerComponent(mu) => {
                if mu.len() != n_components {
                    return Err(NmfError::ShapeMismatch {
                        what: "mu",
                        expected: (n_components, 1),
                        found: (mu.len(), 1),
                    });
                }
                Ok(Array1::from(mu.clone()).insert_axis(ndarray::Axis(1)))
            }
        }
    }

    fn any_negative(&self) -> bool {
        match self {
            Sparsity::Scalar(mu) => *mu < 0.0,
            Sparsity::PerComponent(mu) => mu.iter().any(|m| *m < 0.0),
        }
    }
}

impl From<f64> for Sparsity {
    fn from(mu: f64) -> Self {
        Sparsity::Scalar(mu)
    }
}

impl From<Vec<f64>> for Sparsity {
    fn from(mu: Vec<f64>) -> Self {
        Sparsity::PerComponent(mu)
    }
}

/// Numeric options shared by the update operators, the initializer and the loss.
///
/// One value is owned by each factorization run, there is no process-wide state.
#[derive(Debug, Deserialize, Clone, Serialize, PartialEq)]
pub struct SolverOptions {
    /// Use the Frobenius (least squares) updates instead of the KL ones
    #[serde(default)]
    pub l2: bool,
    /// Constrain every column of H to the probability simplex
    #[serde(default = "default_true")]
    pub force_simplex: bool,
    #[serde(default)]
    pub mu: Sparsity,
    #[serde(default = "default_epsilon_reg")]
    pub epsilon_reg: f64,
    /// Strength of the graph Laplacian smoothness penalty
    #[serde(default)]
    pub lambda_l: f64,
    /// Upper bound on the spectrum of the Laplacian, used for the majorization
    #[serde(default = "default_sigma_l")]
    pub sigma_l: f64,
    /// Entrywise floor of every factor
    #[serde(default = "default_log_shift")]
    pub log_shift: f64,
    #[serde(default = "default_dicotomy_tol")]
    pub dicotomy_tol: f64,
    /// Check the inputs of every step for negative entries
    #[serde(default = "default_true")]
    pub safe: bool,
    /// Solve the Laplacian H step exactly with the quadratic update
    #[serde(default)]
    pub accelerate: bool,
}

/// The options as seen by a single update step.
pub type StepOptions = SolverOptions;

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            l2: false,
            force_simplex: true,
            mu: Sparsity::default(),
            epsilon_reg: default_epsilon_reg(),
            lambda_l: 0.0,
            sigma_l: default_sigma_l(),
            log_shift: default_log_shift(),
            dicotomy_tol: default_dicotomy_tol(),
            safe: true,
            accelerate: false,
        }
    }
}

impl SolverOptions {
    pub fn laplacian_active(&self) -> bool {
        self.lambda_l != 0.0
    }

    /// Rejects values for which the updates are not defined.
    pub fn validate(&self) -> Result<()> {
        if !(self.log_shift > 0.0) {
            return Err(NmfError::Config(format!(
                "log_shift must be positive, got {}",
                self.log_shift
            )));
        }
        if !(self.dicotomy_tol > 0.0) {
            return Err(NmfError::Config(format!(
                "dicotomy_tol must be positive, got {}",
                self.dicotomy_tol
            )));
        }
        if !(self.epsilon_reg > 0.0) {
            return Err(NmfError::Config(format!(
                "epsilon_reg must be positive, got {}",
                self.epsilon_reg
            )));
        }
        if self.mu.any_negative() {
            return Err(NmfError::Config("mu must be non-negative".to_string()));
        }
        if self.lambda_l < 0.0 || !self.lambda_l.is_finite() {
            return Err(NmfError::Config(format!(
                "lambda_L must be a non-negative number, got {}",
                self.lambda_l
            )));
        }
        if self.laplacian_active() && !(self.sigma_l > 0.0) {
            return Err(NmfError::Config(format!(
                "sigma_L must be positive when lambda_L is set, got {}",
                self.sigma_l
            )));
        }
        if self.accelerate && self.l2 {
            return Err(NmfError::Config(
                "the accelerated H step is only defined for the KL loss".to_string(),
            ));
        }
        Ok(())
    }
}

// *********************************
// Default values for deserializing
// *********************************
fn default_true() -> bool {
    true
}

fn default_epsilon_reg() -> f64 {
    1.0
}

fn default_sigma_l() -> f64 {
    8.0
}

fn default_log_shift() -> f64 {
    1e-14
}

fn default_dicotomy_tol() -> f64 {
    1e-10
}

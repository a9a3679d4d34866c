use crate::error::NmfError;
use crate::structs::factors::Factors;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub mod smooth_nmf;

pub use smooth_nmf::SmoothNmf;

/// Problem solved by a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Algorithm {
    /// KL (or Frobenius) factorization with optional sparsity
    #[default]
    #[serde(rename = "NMF")]
    Nmf,
    /// Same, with graph Laplacian smoothing of the abundance maps
    #[serde(rename = "SmoothNMF")]
    SmoothNmf,
}

impl FromStr for Algorithm {
    type Err = NmfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NMF" => Ok(Algorithm::Nmf),
            "SmoothNMF" => Ok(Algorithm::SmoothNmf),
            other => Err(NmfError::InvalidProblemType(format!(
                "unknown problem '{}', expected NMF or SmoothNMF",
                other
            ))),
        }
    }
}

/// Optional inputs of a run besides the data and the dictionary.
///
/// In `fixed_w` and `fixed_h`, non-negative cells are held at their value for the
/// whole run and negative cells are free.
#[derive(Debug, Clone, Default)]
pub struct Constraints {
    pub w0: Option<Array2<f64>>,
    pub h0: Option<Array2<f64>>,
    /// Pixel graph Laplacian `(p, p)`
    pub laplacian: Option<Array2<f64>>,
    pub fixed_w: Option<Array2<f64>>,
    pub fixed_h: Option<Array2<f64>>,
}

/// Outcome of a factorization run.
#[derive(Debug, Clone)]
pub struct NmfResult {
    pub g: Array2<f64>,
    pub w: Array2<f64>,
    pub h: Array2<f64>,
    /// Objective after initialization, then after every cycle
    pub losses: Vec<f64>,
    pub cycles: usize,
    pub converged: bool,
}

impl NmfResult {
    pub(crate) fn new(factors: Factors, losses: Vec<f64>, cycles: usize, converged: bool) -> Self {
        let (g, w, h) = factors.into_parts();
        Self {
            g,
            w,
            h,
            losses,
            cycles,
            converged,
        }
    }

    /// `G·W·H`
    pub fn reconstruction(&self) -> Array2<f64> {
        self.g.dot(&self.w).dot(&self.h)
    }

    /// `G·W`, one spectrum per phase
    pub fn phase_spectra(&self) -> Array2<f64> {
        self.g.dot(&self.w)
    }

    /// Final value of the objective
    pub fn objf(&self) -> f64 {
        self.losses.last().copied().unwrap_or(f64::NAN)
    }
}

//! Error types for the factorization core

use thiserror::Error;

/// Result type for the factorization core
pub type Result<T> = std::result::Result<T, NmfError>;

/// Errors raised by the update operators, the initializer and the driver.
///
/// A step that returns an error never hands back a partially updated matrix.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NmfError {
    /// An input matrix holds entries below `-log_shift / 2`
    #[error("{matrix} has {count} entries below -{threshold:e} (min {min:e})")]
    InvariantViolation {
        matrix: &'static str,
        count: usize,
        min: f64,
        threshold: f64,
    },

    /// A numerator or denominator of a multiplicative ratio went negative
    #[error("{term} of the {step} update has {count} negative entries")]
    NegativeTerm {
        step: &'static str,
        term: &'static str,
        count: usize,
    },

    /// Laplacian smoothing requested without a Laplacian matrix
    #[error("lambda_L is {lambda_l} but no Laplacian matrix was provided")]
    MissingLaplacian { lambda_l: f64 },

    /// Unknown problem type string
    #[error("invalid problem type: {0}")]
    InvalidProblemType(String),

    /// Unknown or unusable initialization strategy
    #[error("invalid initialization: {0}")]
    InvalidInit(String),

    /// The simplex root-finder could not bracket the root of a column
    #[error("simplex search failed on column {column}: {reason}")]
    DegenerateSimplex { column: usize, reason: String },

    /// Two operands of the factorization do not have compatible shapes
    #[error("shape mismatch for {what}: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: (usize, usize),
        found: (usize, usize),
    },

    /// A least squares problem could not be solved
    #[error("least squares failed: {0}")]
    LeastSquares(String),

    /// Invalid numeric configuration
    #[error("invalid configuration: {0}")]
    Config(String),
}

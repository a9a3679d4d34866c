//! Regularized non-negative matrix factorization `X ≈ G·W·H` for spectral images.
//!
//! X holds one spectrum per pixel, G is a dictionary of physics-derived spectral
//! shapes, W the loadings of each phase on that dictionary and H the abundance maps.
//! The [routines::updates] operators implement single multiplicative steps, and
//! [algorithms::SmoothNmf] chains them into a full run.

pub mod algorithms;
pub mod error;
pub mod logger;
pub mod routines {
    pub mod initialization;
    pub mod laplacian;
    pub mod linalg;
    pub mod loss;
    pub mod measures;
    pub mod settings;
    pub mod simplex;
    pub mod updates;
}
pub mod structs {
    pub mod dictionary;
    pub mod factors;
    pub mod options;
}

pub mod prelude {
    pub use crate::algorithms::{Algorithm, Constraints, NmfResult, SmoothNmf};
    pub use crate::error::{NmfError, Result};
    pub use crate::logger::setup_log;
    pub use crate::routines::initialization::{initialize_algorithms, initialize_nmf, InitStrategy};
    pub use crate::routines::laplacian::create_laplacian_matrix;
    pub use crate::routines::loss::{objective, Reduction};
    pub use crate::routines::settings::{parse_settings, read_settings, Settings};
    pub use crate::routines::simplex::{dichotomy_simplex, dichotomy_simplex_acc};
    pub use crate::routines::updates::{
        multiplicative_step_h, multiplicative_step_hq, multiplicative_step_w,
        multiplicative_step_wq,
    };
    pub use crate::routines::*;
    pub use crate::structs::dictionary::Dictionary;
    pub use crate::structs::factors::{Dims, Factors};
    pub use crate::structs::options::{SolverOptions, Sparsity, StepOptions};
}

//Tests
mod tests;

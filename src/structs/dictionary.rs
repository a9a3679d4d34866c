use crate::error::{NmfError, Result};
use ndarray::Array2;
use std::fmt;
use std::sync::Arc;

/// Produces a dictionary matrix on demand, e.g. from a physical emission model.
pub type DictionaryBuilder = Arc<dyn Fn() -> Array2<f64> + Send + Sync>;

/// The spectral dictionary `G` of the factorization `X ≈ G·W·H`.
///
/// With [Dictionary::Identity] the loadings W absorb the whole factorization and
/// are the phase spectra themselves. The other two variants carry a physics
/// dictionary whose last two columns span the smooth background.
#[derive(Clone, Default)]
pub enum Dictionary {
    #[default]
    Identity,
    Fixed(Array2<f64>),
    Rebuildable(DictionaryBuilder),
}

impl Dictionary {
    pub fn rebuildable<F>(builder: F) -> Self
    where
        F: Fn() -> Array2<f64> + Send + Sync + 'static,
    {
        Dictionary::Rebuildable(Arc::new(builder))
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, Dictionary::Identity)
    }

    /// Dense `(n_channels, rank)` matrix for this dictionary.
    pub fn materialize(&self, n_channels: usize) -> Result<Array2<f64>> {
        let g = match self {
            Dictionary::Identity => Array2::eye(n_channels),
            Dictionary::Fixed(g) => g.clone(),
            Dictionary::Rebuildable(builder) => builder(),
        };
        if g.nrows() != n_channels {
            return Err(NmfError::ShapeMismatch {
                what: "G",
                expected: (n_channels, g.ncols()),
                found: g.dim(),
            });
        }
        if g.ncols() == 0 {
            return Err(NmfError::Config("G must have at least one column".to_string()));
        }
        Ok(g)
    }
}

impl fmt::Debug for Dictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dictionary::Identity => write!(f, "Identity"),
            Dictionary::Fixed(g) => write!(f, "Fixed({}x{})", g.nrows(), g.ncols()),
            Dictionary::Rebuildable(_) => write!(f, "Rebuildable(..)"),
        }
    }
}

impl From<Array2<f64>> for Dictionary {
    fn from(g: Array2<f64>) -> Self {
        Dictionary::Fixed(g)
    }
}

impl From<Option<Array2<f64>>> for Dictionary {
    fn from(g: Option<Array2<f64>>) -> Self {
        match g {
            Some(g) => Dictionary::Fixed(g),
            None => Dictionary::Identity,
        }
    }
}

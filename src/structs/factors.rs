use crate::error::{NmfError, Result};
use ndarray::Array2;

/// Dimensions of one factorization run: channels, pixels, dictionary rank and phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dims {
    pub channels: usize,
    pub pixels: usize,
    pub rank: usize,
    pub components: usize,
}

/// Checks that `X:(c,p)`, `G:(c,r)`, `W:(r,k)` and `H:(k,p)` agree.
pub fn check_shapes(
    x: &Array2<f64>,
    g: &Array2<f64>,
    w: &Array2<f64>,
    h: &Array2<f64>,
) -> Result<Dims> {
    let (channels, pixels) = x.dim();
    let rank = g.ncols();
    let components = w.ncols();
    expect_shape("G", g, (channels, rank))?;
    expect_shape("W", w, (rank, components))?;
    expect_shape("H", h, (components, pixels))?;
    Ok(Dims {
        channels,
        pixels,
        rank,
        components,
    })
}

pub(crate) fn expect_shape(
    what: &'static str,
    m: &Array2<f64>,
    expected: (usize, usize),
) -> Result<()> {
    if m.dim() != expected {
        return Err(NmfError::ShapeMismatch {
            what,
            expected,
            found: m.dim(),
        });
    }
    Ok(())
}

/// The three factors of `X ≈ G·W·H`.
#[derive(Debug, Clone, PartialEq)]
pub struct Factors {
    pub g: Array2<f64>,
    pub w: Array2<f64>,
    pub h: Array2<f64>,
}

impl Factors {
    pub fn new(g: Array2<f64>, w: Array2<f64>, h: Array2<f64>) -> Self {
        Self { g, w, h }
    }

    pub fn dims(&self, x: &Array2<f64>) -> Result<Dims> {
        check_shapes(x, &self.g, &self.w, &self.h)
    }

    /// Phase spectra `G·W`, one column per phase.
    pub fn phase_spectra(&self) -> Array2<f64> {
        self.g.dot(&self.w)
    }

    /// The modelled data `G·W·H`.
    pub fn reconstruction(&self) -> Array2<f64> {
        self.phase_spectra().dot(&self.h)
    }

    pub fn into_parts(self) -> (Array2<f64>, Array2<f64>, Array2<f64>) {
        (self.g, self.w, self.h)
    }
}

use crate::algorithms::Algorithm;
use crate::error::{NmfError, Result};
use crate::routines::initialization::InitStrategy;
use crate::structs::options::SolverOptions;
use config::Config as eConfig;
use eyre::WrapErr;
use serde::Deserialize;
use serde_derive::Serialize;

/// Settings of a factorization run.
///
/// Read from a TOML file with the sections `[solver]`, `[fit]` and `[log]`.
/// Every value can be overridden from the environment with the `SNMF_` prefix,
/// using `__` between the section and the key, e.g. `SNMF_FIT__MAX_ITER=500`.
#[derive(Debug, Deserialize, Clone, Serialize, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub solver: SolverOptions,
    pub fit: Fit,
    #[serde(default)]
    pub log: Log,
}

#[derive(Debug, Deserialize, Clone, Serialize, PartialEq)]
pub struct Fit {
    #[serde(default)]
    pub algorithm: Algorithm,
    /// Number of phases, the row count of H
    pub n_components: usize,
    #[serde(default = "default_max_iter")]
    pub max_iter: usize,
    /// Relative change of the objective below which the run stops
    #[serde(default = "default_tol")]
    pub tol: f64,
    #[serde(default)]
    pub init: InitStrategy,
    #[serde(default = "default_seed")]
    pub random_state: u64,
    /// Shape `(nx, ny)` of the pixel grid, used to build the Laplacian when none is given
    pub shape_2d: Option<(usize, usize)>,
}

#[derive(Debug, Deserialize, Clone, Serialize, PartialEq)]
pub struct Log {
    #[serde(default = "default_log_level")]
    pub level: String,
    pub file: Option<String>,
}

impl Default for Log {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl Settings {
    /// Default settings for `n_components` phases.
    pub fn new(n_components: usize) -> Self {
        Self {
            solver: SolverOptions::default(),
            fit: Fit {
                algorithm: Algorithm::default(),
                n_components,
                max_iter: default_max_iter(),
                tol: default_tol(),
                init: InitStrategy::default(),
                random_state: default_seed(),
                shape_2d: None,
            },
            log: Log::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.solver.validate()?;
        if self.fit.n_components == 0 {
            return Err(NmfError::Config(
                "n_components must be at least 1".to_string(),
            ));
        }
        if self.fit.max_iter == 0 {
            return Err(NmfError::Config("max_iter must be at least 1".to_string()));
        }
        if !(self.fit.tol >= 0.0) {
            return Err(NmfError::Config(format!(
                "tol must be non-negative, got {}",
                self.fit.tol
            )));
        }
        if let Some((nx, ny)) = self.fit.shape_2d {
            if nx == 0 || ny == 0 {
                return Err(NmfError::Config(format!(
                    "shape_2d must be non-empty, got ({}, {})",
                    nx, ny
                )));
            }
        }
        if self.fit.algorithm == Algorithm::Nmf && self.solver.laplacian_active() {
            return Err(NmfError::InvalidProblemType(
                "NMF does not support Laplacian smoothing, use SmoothNMF".to_string(),
            ));
        }
        Ok(())
    }

    /// Pretty JSON record of the settings, e.g. to store next to the results of a run.
    pub fn to_json(&self) -> eyre::Result<String> {
        serde_json::to_string_pretty(self).wrap_err("Could not serialize the settings")
    }

    /// Write [Settings::to_json] to `path`.
    pub fn write(&self, path: &str) -> eyre::Result<()> {
        let serialized = self.to_json()?;
        std::fs::write(path, serialized)
            .wrap_err_with(|| format!("Could not write settings to {}", path))
    }
}

/// Read settings from a TOML file, layered with `SNMF_` environment variables.
pub fn read_settings(path: &str) -> eyre::Result<Settings> {
    let parsed = eConfig::builder()
        .add_source(config::File::with_name(path).format(config::FileFormat::Toml))
        .add_source(environment())
        .build()
        .wrap_err_with(|| format!("Could not read settings from {}", path))?;
    finish(parsed)
}

/// Parse settings from a TOML string, layered with `SNMF_` environment variables.
pub fn parse_settings(toml: &str) -> eyre::Result<Settings> {
    let parsed = eConfig::builder()
        .add_source(config::File::from_str(toml, config::FileFormat::Toml))
        .add_source(environment())
        .build()
        .wrap_err("Could not parse settings")?;
    finish(parsed)
}

fn environment() -> config::Environment {
    config::Environment::with_prefix("SNMF")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

fn finish(parsed: eConfig) -> eyre::Result<Settings> {
    let settings: Settings = parsed
        .try_deserialize()
        .wrap_err("Invalid settings")?;
    settings.validate()?;
    Ok(settings)
}

// *********************************
// Default values for deserializing
// *********************************
fn default_max_iter() -> usize {
    10_000
}

fn default_tol() -> f64 {
    1e-6
}

fn default_seed() -> u64 {
    42
}

fn default_log_level() -> String {
    "info".to_string()
}

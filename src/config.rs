//! Integration parameter groups and their validation.
//!
//! Field names match the sections of the configuration document, so a whole
//! section deserializes directly into each group.

use serde::Deserialize;
use thiserror::Error;

/// Time-stepping parameters for one integration run.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct TimeParams {
    /// Start of the integration interval.
    pub tstart: f64,
    /// End of the integration interval.
    pub tend: f64,
    /// Initial step size for the adaptive driver; the fixed step size for
    /// the fixed driver.
    pub dt: f64,
}

impl TimeParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.tstart.is_finite() || !self.tend.is_finite() {
            return Err(ConfigError::NonFiniteTime {
                tstart: self.tstart,
                tend: self.tend,
            });
        }
        if self.tend <= self.tstart {
            return Err(ConfigError::EmptyInterval {
                tstart: self.tstart,
                tend: self.tend,
            });
        }
        if !self.dt.is_finite() || self.dt <= 0. {
            return Err(ConfigError::NonPositiveDt(self.dt));
        }
        Ok(())
    }
}

/// Step-size control parameters for the adaptive driver.
///
/// The `dtfail*` factors bound how much a rejected step may shrink; both are
/// below 1 so a rejection always shrinks. The `dtpass*` factors bound the
/// growth after an accepted step, with `dtpassmin` doubling as a deadband:
/// suggested changes within `dtpassmin` of 1 leave the step size untouched.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct AdaptParams {
    pub dtpassmin: f64,
    pub dtpassmax: f64,
    pub dtfailmin: f64,
    pub dtfailmax: f64,
    /// Safety factor applied to the raw error-based step suggestion.
    #[serde(rename = "s")]
    pub safety: f64,
    /// Relative tolerance.
    pub rtol: f64,
    /// Absolute tolerance.
    pub atol: f64,
    /// Cap on total trial steps, accepted and rejected, in one run.
    pub maxsteps: usize,
    /// Cap on consecutive rejections within one macro-step.
    pub maxfail: usize,
}

impl AdaptParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.dtfailmin > 0. && self.dtfailmin <= self.dtfailmax && self.dtfailmax < 1.) {
            return Err(ConfigError::BadFailFactors {
                dtfailmin: self.dtfailmin,
                dtfailmax: self.dtfailmax,
            });
        }
        if !(self.dtpassmin > 0. && self.dtpassmin <= self.dtpassmax && self.dtpassmax >= 1.) {
            return Err(ConfigError::BadPassFactors {
                dtpassmin: self.dtpassmin,
                dtpassmax: self.dtpassmax,
            });
        }
        if !(self.safety > 0. && self.safety < 1.) {
            return Err(ConfigError::BadSafetyFactor(self.safety));
        }
        if !self.rtol.is_finite() || self.rtol < 100. * f64::EPSILON {
            return Err(ConfigError::TooSmallRelTol(self.rtol));
        }
        if !self.atol.is_finite() || self.atol <= 0. {
            return Err(ConfigError::NonPositiveAtol(self.atol));
        }
        if self.maxsteps == 0 {
            return Err(ConfigError::ZeroMaxSteps);
        }
        if self.maxfail == 0 {
            return Err(ConfigError::ZeroMaxFail);
        }
        Ok(())
    }
}

/// A malformed or incomplete parameter set, reported before any stepping.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse configuration document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("tstart and tend must be finite, got tstart = {tstart}, tend = {tend}")]
    NonFiniteTime { tstart: f64, tend: f64 },
    #[error("integration interval is empty: tstart = {tstart}, tend = {tend}")]
    EmptyInterval { tstart: f64, tend: f64 },
    #[error("step size must be finite and positive, got {0}")]
    NonPositiveDt(f64),
    #[error(
        "failure factors must satisfy 0 < dtfailmin <= dtfailmax < 1, \
         got dtfailmin = {dtfailmin}, dtfailmax = {dtfailmax}"
    )]
    BadFailFactors { dtfailmin: f64, dtfailmax: f64 },
    #[error(
        "pass factors must satisfy 0 < dtpassmin <= dtpassmax and dtpassmax >= 1, \
         got dtpassmin = {dtpassmin}, dtpassmax = {dtpassmax}"
    )]
    BadPassFactors { dtpassmin: f64, dtpassmax: f64 },
    #[error("safety factor must lie strictly between 0 and 1, got {0}")]
    BadSafetyFactor(f64),
    /// The relative tolerance was too small.
    ///
    /// It must be at least `100. * f64::EPSILON`.
    #[error("rtol = {0} is too small")]
    TooSmallRelTol(f64),
    #[error("atol must be finite and positive, got {0}")]
    NonPositiveAtol(f64),
    #[error("maxsteps must be at least 1")]
    ZeroMaxSteps,
    #[error("maxfail must be at least 1")]
    ZeroMaxFail,
    #[error("initial state must contain at least one component")]
    EmptyState,
    #[error("initial state is already set; call reset_initial_state to overwrite it")]
    InitialStateSet,
}

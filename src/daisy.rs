//! The daisy world model: two daisy species whose coverage feeds back on
//! planetary temperature.
//!
//! This is the system the integrator was built to drive; the core treats it
//! as an opaque derivative function. State is `[white fraction, black
//! fraction]` of surface coverage, bare ground being whatever neither
//! species covers.

use ndarray::array;
use ndarray::prelude::*;
use serde::Deserialize;

use crate::config::{AdaptParams, ConfigError, TimeParams};
use crate::rk::Integrator;

/// Stefan–Boltzmann constant, W m⁻² K⁻⁴.
const SIGMA: f64 = 5.67e-8;
/// Habitable window: daisies only grow at local temperatures within these
/// bounds, in K.
const GROWTH_TEMP_MIN: f64 = 277.5;
const GROWTH_TEMP_MAX: f64 = 312.5;
/// Optimal growth temperature, K.
const GROWTH_TEMP_OPT: f64 = 295.0;
/// Curvature of the growth rate about the optimum.
const GROWTH_CURVATURE: f64 = 0.003265;

/// Physical parameters of the daisy world model (the `uservars` group of
/// the configuration document).
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct DaisyParams {
    pub albedo_white: f64,
    /// Death rate of both species.
    pub chi: f64,
    /// Solar constant, W m⁻².
    #[serde(rename = "S0")]
    pub s0: f64,
    /// Solar luminosity relative to present day.
    #[serde(rename = "L")]
    pub l: f64,
    pub albedo_black: f64,
    /// Conduction between a daisy patch and the planetary mean temperature.
    #[serde(rename = "R")]
    pub r: f64,
    pub albedo_ground: f64,
}

/// The two-species population model with temperature feedback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Daisyworld {
    params: DaisyParams,
}

impl Daisyworld {
    pub fn new(params: DaisyParams) -> Self {
        Daisyworld { params }
    }

    /// Growth rate at local temperature `temp`, zero outside the habitable
    /// window.
    fn growth_rate(temp: f64) -> f64 {
        if temp >= GROWTH_TEMP_MIN && temp <= GROWTH_TEMP_MAX {
            1. - GROWTH_CURVATURE * (GROWTH_TEMP_OPT - temp).powi(2)
        } else {
            0.
        }
    }

    /// Fills `dydt` with the coverage derivatives at `y`.
    ///
    /// The model is autonomous; time only enters through the integrator.
    /// Planetary albedo is the area-weighted blend of the surface albedos,
    /// the emission temperature follows from radiative balance, and each
    /// species sees a local temperature offset from it by how much darker
    /// or lighter its patches are than the planet as a whole.
    pub fn derivs(&self, _t: f64, y: ArrayView1<f64>, mut dydt: ArrayViewMut1<f64>) {
        let u = &self.params;
        let bare = 1. - y[0] - y[1];
        let albedo_p = bare * u.albedo_ground + y[0] * u.albedo_white + y[1] * u.albedo_black;
        let te_4 = u.s0 / 4. * u.l * (1. - albedo_p) / SIGMA;
        let eta = u.r * u.s0 / (4. * SIGMA);
        let temp_w = (eta * (albedo_p - u.albedo_white) + te_4).powf(0.25);
        let temp_b = (eta * (albedo_p - u.albedo_black) + te_4).powf(0.25);

        dydt[0] = y[0] * (Self::growth_rate(temp_w) * bare - u.chi);
        dydt[1] = y[1] * (Self::growth_rate(temp_b) * bare - u.chi);
    }

    /// Adapts the model to the integrator's derivative interface.
    pub fn rhs(self) -> impl FnMut(f64, ArrayView1<f64>, ArrayViewMut1<f64>) {
        move |t, y, dydt| self.derivs(t, y, dydt)
    }
}

/// Initial coverage fractions (the `initvars` group).
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct DaisyInit {
    pub whiteconc: f64,
    pub blackconc: f64,
}

/// The four-group configuration document for a daisy world run.
///
/// Model parameters and initial concentrations stay on this side of the
/// boundary; only `timevars` and `adaptvars` cross into the integrator.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct DaisyConfig {
    pub uservars: DaisyParams,
    pub timevars: TimeParams,
    pub adaptvars: AdaptParams,
    pub initvars: DaisyInit,
}

impl DaisyConfig {
    /// Parses a configuration document and validates the stepping groups.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: DaisyConfig = serde_json::from_str(text)?;
        config.timevars.validate()?;
        config.adaptvars.validate()?;
        Ok(config)
    }

    /// Initial state vector in integrator order.
    pub fn initial_state(&self) -> Array1<f64> {
        array![self.initvars.whiteconc, self.initvars.blackconc]
    }

    /// Builds a ready-to-run integrator for this document.
    pub fn integrator(
        &self,
    ) -> Result<Integrator<impl FnMut(f64, ArrayView1<f64>, ArrayViewMut1<f64>)>, ConfigError>
    {
        let mut solver = Integrator::new(
            Daisyworld::new(self.uservars).rhs(),
            self.timevars,
            self.adaptvars,
        )?;
        solver.set_initial_state(self.initial_state())?;
        Ok(solver)
    }
}

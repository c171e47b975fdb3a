//! Cash–Karp stepping and the adaptive and fixed-step drivers.

use ndarray::prelude::*;
use ndarray::{s, FoldWhile, Zip};
use std::marker::PhantomData;
use thiserror::Error;

use crate::config::{AdaptParams, ConfigError, TimeParams};
use crate::tableau::{CashKarp, RKMethod};

/// Computes the RMS norm of the error, scaled per component by the
/// tolerance at the advanced state.
fn error_norm(error: ArrayView1<f64>, y_new: ArrayView1<f64>, rtol: f64, atol: f64) -> f64 {
    debug_assert_eq!(error.len(), y_new.len());
    (Zip::from(error)
        .and(y_new)
        .fold_while(0., |acc, &err, &y| {
            let scaled = err / (atol + rtol * y.abs());
            FoldWhile::Continue(acc + scaled * scaled)
        })
        .into_inner() / error.len() as f64)
        .sqrt()
}

struct StepOutput {
    /// Solution at `t + h` computed with the 5th order formula.
    y_new: Array1<f64>,
    /// Estimated error, the difference between the 5th and 4th order
    /// solutions built from the same stages.
    error: Array1<f64>,
}

/// Performs a single Runge–Kutta step of size `h` from `(t, y)`.
///
/// Evaluates the derivative exactly `M::NUM_STAGES` times, never retries,
/// and carries no state between calls beyond the tableau. The caller's `y`
/// is not modified. Notation for the Butcher tableau is as in (ref 1).
///
/// # References
///
/// 1. E. Hairer, S. P. Norsett G. Wanner, "Solving Ordinary Differential
///    Equations I: Nonstiff Problems", Sec. II.4.
fn rk_step<F, M>(fun: &mut F, t: f64, y: &Array1<f64>, h: f64) -> StepOutput
where
    F: FnMut(f64, ArrayView1<f64>, ArrayViewMut1<f64>),
    M: RKMethod,
{
    let mut k = Array2::zeros((M::NUM_STAGES, y.len()));
    fun(t, y.view(), k.slice_mut(s![0, ..]));
    for (s, (a, c)) in M::a().iter().zip(M::c()).enumerate() {
        let dy = k.slice(s![..s + 1, ..]).t().dot(a) * h;
        fun(t + c * h, (dy + y).view(), k.slice_mut(s![s + 1, ..]));
    }

    let y_new = h * k.t().dot(&M::b()) + y;
    let error = k.t().dot(&M::e()) * h;

    StepOutput { y_new, error }
}

/// One record of a trajectory.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// Time of the record.
    pub time: f64,
    /// State vector at `time`.
    pub state: Array1<f64>,
    /// Local truncation error estimated for the step that produced `state`;
    /// zero for the initial record.
    pub error: Array1<f64>,
}

/// The time-ordered output of one integration run: the initial condition
/// plus one record per accepted step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trajectory {
    steps: Vec<Step>,
}

impl Trajectory {
    fn push(&mut self, time: f64, state: Array1<f64>, error: Array1<f64>) {
        self.steps.push(Step { time, state, error });
    }

    /// Number of records, including the initial condition.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn first(&self) -> Option<&Step> {
        self.steps.first()
    }

    pub fn last(&self) -> Option<&Step> {
        self.steps.last()
    }

    /// Times of all records.
    pub fn times(&self) -> Array1<f64> {
        self.steps.iter().map(|step| step.time).collect()
    }

    /// States as a matrix with one row per record.
    pub fn states(&self) -> Array2<f64> {
        let mut out = Array2::zeros(self.dim());
        for (mut row, step) in out.outer_iter_mut().zip(&self.steps) {
            row.assign(&step.state);
        }
        out
    }

    /// Error estimates as a matrix with one row per record.
    pub fn errors(&self) -> Array2<f64> {
        let mut out = Array2::zeros(self.dim());
        for (mut row, step) in out.outer_iter_mut().zip(&self.steps) {
            row.assign(&step.error);
        }
        out
    }

    fn dim(&self) -> (usize, usize) {
        let ncols = self.steps.first().map_or(0, |step| step.state.len());
        (self.steps.len(), ncols)
    }
}

/// A fatal condition that aborted an integration run.
///
/// Fatal variants report the last good time, the last good state, and the
/// step size in effect when the run died. Nothing beyond the last accepted
/// step is recoverable.
#[derive(Debug, Error)]
pub enum IntegrationError {
    #[error("no initial state has been set")]
    MissingInitialState,
    #[error(
        "step size {dt:e} makes no progress at t = {time}; \
         the tolerance is unreachable here"
    )]
    StepUnderflow {
        time: f64,
        dt: f64,
        state: Array1<f64>,
    },
    #[error("{failures} consecutive rejections at t = {time} with step size {dt:e}")]
    TooManyFailures {
        time: f64,
        dt: f64,
        failures: usize,
        state: Array1<f64>,
    },
    #[error("exceeded {maxsteps} trial steps at t = {time} before reaching tend = {tend}")]
    MaxStepsExceeded {
        time: f64,
        tend: f64,
        maxsteps: usize,
        state: Array1<f64>,
    },
}

/// Embedded Runge–Kutta integrator for a first-order ODE system.
///
/// Holds the derivative function, the parameter groups (immutable once
/// validated by [`new`](Integrator::new)), and the initial state. Every run
/// starts over from the stored initial state, so repeated runs of one
/// integrator produce identical trajectories.
pub struct Integrator<F, M = CashKarp>
where
    F: FnMut(f64, ArrayView1<f64>, ArrayViewMut1<f64>),
    M: RKMethod,
{
    fun: F,
    method: PhantomData<M>,
    timevars: TimeParams,
    adaptvars: AdaptParams,
    yinit: Option<Array1<f64>>,
}

impl<F, M> Integrator<F, M>
where
    F: FnMut(f64, ArrayView1<f64>, ArrayViewMut1<f64>),
    M: RKMethod,
{
    /// Creates an integrator from validated parameter groups.
    ///
    /// # Parameters
    ///
    /// * `fun`: Right-hand side of the system, where calling `fun(t, y,
    ///   dydt)` should fill in `dydt` with the derivative of `y` at time
    ///   `t`. The driver treats it as deterministic and side-effect-free;
    ///   the `FnMut` bound only lets callers keep counters or scratch
    ///   space. `dydt` always has the dimensionality of the initial state,
    ///   so state, derivative, and error vectors cannot disagree in length.
    ///
    /// * `timevars`, `adaptvars`: The time-stepping and step-control
    ///   parameter groups. Both are checked here, before any stepping.
    pub fn new(fun: F, timevars: TimeParams, adaptvars: AdaptParams) -> Result<Self, ConfigError> {
        timevars.validate()?;
        adaptvars.validate()?;
        Ok(Integrator {
            fun,
            method: PhantomData,
            timevars,
            adaptvars,
            yinit: None,
        })
    }

    /// Sets the initial state.
    ///
    /// Fails with [`ConfigError::InitialStateSet`] if a state is already
    /// present; overwriting must go through
    /// [`reset_initial_state`](Integrator::reset_initial_state).
    pub fn set_initial_state(&mut self, yinit: Array1<f64>) -> Result<(), ConfigError> {
        if self.yinit.is_some() {
            return Err(ConfigError::InitialStateSet);
        }
        self.reset_initial_state(yinit)
    }

    /// Replaces the initial state, the explicit path for reusing an
    /// integrator on a new run.
    pub fn reset_initial_state(&mut self, yinit: Array1<f64>) -> Result<(), ConfigError> {
        if yinit.is_empty() {
            return Err(ConfigError::EmptyState);
        }
        self.yinit = Some(yinit);
        Ok(())
    }

    /// Currently configured initial state.
    pub fn initial_state(&self) -> Option<ArrayView1<'_, f64>> {
        self.yinit.as_ref().map(|y| y.view())
    }

    pub fn timevars(&self) -> &TimeParams {
        &self.timevars
    }

    pub fn adaptvars(&self) -> &AdaptParams {
        &self.adaptvars
    }

    fn start_state(&self) -> Result<Array1<f64>, IntegrationError> {
        self.yinit
            .clone()
            .ok_or(IntegrationError::MissingInitialState)
    }

    /// Integrates from `tstart` to `tend` with adaptive step-size control.
    ///
    /// Each macro-step tries the current step size, accepts when the scaled
    /// RMS error norm is at most 1, and otherwise shrinks the step and
    /// retries from the unchanged state. The returned trajectory holds the
    /// initial condition and one record per accepted step; rejected trials
    /// leave no trace beyond the failure counter. The final record's time
    /// is exactly `tend`.
    pub fn run_adaptive(&mut self) -> Result<Trajectory, IntegrationError> {
        let TimeParams { tstart, tend, dt } = self.timevars;
        let AdaptParams {
            dtpassmin,
            dtpassmax,
            dtfailmin,
            dtfailmax,
            safety,
            rtol,
            atol,
            maxsteps,
            maxfail,
        } = self.adaptvars;

        let mut y = self.start_state()?;
        let mut t = tstart;
        let mut dt = dt;
        let mut trials = 0;

        let mut trajectory = Trajectory::default();
        trajectory.push(t, y.clone(), Array1::zeros(y.len()));

        while t < tend {
            let mut failures = 0;
            // Retry with ever smaller steps until the error norm allows
            // acceptance.
            let (t_new, y_new, error, dt_change) = loop {
                trials += 1;
                if trials > maxsteps {
                    return Err(IntegrationError::MaxStepsExceeded {
                        time: t,
                        tend,
                        maxsteps,
                        state: y,
                    });
                }

                // Step onto `tend` exactly when the current step reaches it.
                let t_new = if dt >= tend - t { tend } else { t + dt };
                if t_new == t {
                    return Err(IntegrationError::StepUnderflow { time: t, dt, state: y });
                }
                let h = t_new - t;
                let StepOutput { y_new, error } = rk_step::<_, M>(&mut self.fun, t, &y, h);

                let rms = error_norm(error.view(), y_new.view(), rtol, atol);
                let dt_change = safety * rms.powf(-0.2);
                if rms <= 1. {
                    break (t_new, y_new, error, dt_change);
                }

                // Rejected: shrink the just-tried step within the failure
                // bounds, which both lie below 1, and retry. A step too
                // small to advance the clock means the tolerance cannot be
                // met at this point.
                dt = h * dt_change.clamp(dtfailmin, dtfailmax);
                if t + dt == t {
                    return Err(IntegrationError::StepUnderflow { time: t, dt, state: y });
                }
                failures += 1;
                if failures > maxfail {
                    return Err(IntegrationError::TooManyFailures {
                        time: t,
                        dt,
                        failures,
                        state: y,
                    });
                }
            };

            let h_used = t_new - t;
            t = t_new;
            y = y_new;
            trajectory.push(t, y.clone(), error);

            // Grow or shrink the just-used step for the next macro-step;
            // suggestions within `dtpassmin` of no change are not worth
            // applying.
            dt = if (1. - dt_change).abs() > dtpassmin {
                h_used * dt_change.clamp(dtpassmin, dtpassmax)
            } else {
                h_used
            };

            // Stretch the next step onto `tend`, or split the remainder in
            // half when one step would leave a sliver behind it.
            if t + dt > tend {
                dt = tend - t;
            } else if t + 2. * dt > tend {
                dt = (tend - t) / 2.;
            }
        }

        Ok(trajectory)
    }

    /// Integrates on the fixed grid `tstart + i * dt`.
    ///
    /// Takes one unconditional step per whole partition of `[tstart, tend)`
    /// and records every error estimate without acting on it. When `dt`
    /// divides the interval evenly the final record's time is `tend`;
    /// otherwise the run ends on the last grid point before `tend`.
    pub fn run_fixed_step(&mut self) -> Result<Trajectory, IntegrationError> {
        let TimeParams { tstart, tend, dt } = self.timevars;

        let mut y = self.start_state()?;
        if tstart + dt == tstart {
            return Err(IntegrationError::StepUnderflow {
                time: tstart,
                dt,
                state: y,
            });
        }

        let mut trajectory = Trajectory::default();
        trajectory.push(tstart, y.clone(), Array1::zeros(y.len()));

        for i in 0..partition_count(tstart, tend, dt) {
            let t = tstart + i as f64 * dt;
            let StepOutput { y_new, error } = rk_step::<_, M>(&mut self.fun, t, &y, dt);
            y = y_new;
            trajectory.push(tstart + (i + 1) as f64 * dt, y.clone(), error);
        }

        Ok(trajectory)
    }
}

/// Number of whole `dt` partitions in `[tstart, tend)`.
///
/// Rounds when `dt` divides the span to within relative 1e-9, so the last
/// grid point lands on `tend` despite floating-point residue in the
/// quotient.
fn partition_count(tstart: f64, tend: f64, dt: f64) -> usize {
    let raw = (tend - tstart) / dt;
    let rounded = raw.round();
    if (raw - rounded).abs() <= raw * 1e-9 {
        rounded as usize
    } else {
        raw.floor() as usize
    }
}

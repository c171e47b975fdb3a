//! Adaptive ODE integration with the Cash–Karp 5(4) embedded pair.
//!
//! The integrator advances a first-order system `dy/dt = f(t, y)` with a
//! 6-stage embedded Runge–Kutta step whose two formulas share the same
//! stage evaluations, yielding a local error estimate for free. The
//! adaptive driver accepts or rejects each trial step against a scaled RMS
//! error norm and resizes the step within configured bounds; a fixed-step
//! driver takes the same steps on a uniform grid, recording the error
//! estimates without acting on them.
//!
//! ```
//! use ndarray::array;
//! use ndarray_rkck::{AdaptParams, CashKarp, Integrator, TimeParams};
//!
//! let timevars = TimeParams { tstart: 0., tend: 1., dt: 0.1 };
//! let adaptvars = AdaptParams {
//!     dtpassmin: 0.1, dtpassmax: 5.,
//!     dtfailmin: 0.1, dtfailmax: 0.5,
//!     safety: 0.9, rtol: 1e-8, atol: 1e-10,
//!     maxsteps: 10_000, maxfail: 60,
//! };
//! let mut solver = Integrator::<_, CashKarp>::new(
//!     |_t, y, mut dydt| dydt.assign(&y.mapv(|v| -v)),
//!     timevars,
//!     adaptvars,
//! )
//! .unwrap();
//! solver.set_initial_state(array![1.]).unwrap();
//!
//! let trajectory = solver.run_adaptive().unwrap();
//! let last = trajectory.last().unwrap();
//! assert_eq!(last.time, 1.);
//! assert!((last.state[0] - (-1.0f64).exp()).abs() < 1e-6);
//! ```

pub mod config;
pub mod daisy;
pub mod rk;
pub mod tableau;

pub use crate::config::{AdaptParams, ConfigError, TimeParams};
pub use crate::rk::{IntegrationError, Integrator, Step, Trajectory};
pub use crate::tableau::{CashKarp, RKMethod};

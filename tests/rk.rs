use std::cell::Cell;

use approx::assert_abs_diff_eq;
use ndarray::array;
use ndarray::prelude::*;

use ndarray_rkck::{
    AdaptParams, CashKarp, ConfigError, IntegrationError, Integrator, Step, TimeParams,
    Trajectory,
};

fn decay(_t: f64, y: ArrayView1<f64>, mut dydt: ArrayViewMut1<f64>) {
    dydt.assign(&y.mapv(|v| -v));
}

fn timevars(tstart: f64, tend: f64, dt: f64) -> TimeParams {
    TimeParams { tstart, tend, dt }
}

fn adaptvars(rtol: f64, atol: f64) -> AdaptParams {
    AdaptParams {
        dtpassmin: 0.1,
        dtpassmax: 5.,
        dtfailmin: 0.1,
        dtfailmax: 0.5,
        safety: 0.9,
        rtol,
        atol,
        maxsteps: 100_000,
        maxfail: 60,
    }
}

/// Recomputes the acceptance norm of a recorded step.
fn rms_norm(step: &Step, rtol: f64, atol: f64) -> f64 {
    let sum: f64 = step
        .error
        .iter()
        .zip(&step.state)
        .map(|(&e, &y)| {
            let scaled = e / (atol + rtol * y.abs());
            scaled * scaled
        })
        .sum();
    (sum / step.state.len() as f64).sqrt()
}

fn assert_strictly_increasing(trajectory: &Trajectory) {
    let times = trajectory.times();
    for w in times.as_slice().unwrap().windows(2) {
        assert!(w[1] > w[0], "times not strictly increasing: {:?}", w);
    }
}

#[test]
fn linear_decay_reaches_exp_minus_one() {
    let mut solver =
        Integrator::<_, CashKarp>::new(decay, timevars(0., 1., 0.1), adaptvars(1e-8, 1e-10)).unwrap();
    solver.set_initial_state(array![1.]).unwrap();
    let trajectory = solver.run_adaptive().unwrap();

    let last = trajectory.last().unwrap();
    assert_eq!(last.time, 1.);
    assert_abs_diff_eq!(last.state[0], (-1.0f64).exp(), epsilon = 1e-6);
    assert_strictly_increasing(&trajectory);
}

fn fixed_final_error(dt: f64) -> f64 {
    let mut solver = Integrator::<_, CashKarp>::new(decay, timevars(0., 1., dt), adaptvars(1e-6, 1e-9)).unwrap();
    solver.set_initial_state(array![1.]).unwrap();
    let trajectory = solver.run_fixed_step().unwrap();
    let last = trajectory.last().unwrap();
    assert_eq!(last.time, 1.);
    (last.state[0] - (-1.0f64).exp()).abs()
}

#[test]
fn order_five_convergence_under_step_halving() {
    // The 5th order solution's global error scales as dt^5, so halving the
    // step should shrink it by roughly 32.
    let ratio = fixed_final_error(0.2) / fixed_final_error(0.1);
    assert!(
        ratio > 25. && ratio < 40.,
        "convergence ratio {} outside the dt^5 window",
        ratio
    );
}

#[test]
fn accepted_steps_satisfy_the_tolerance() {
    let (rtol, atol) = (1e-6, 1e-9);
    let mut solver = Integrator::<_, CashKarp>::new(decay, timevars(0., 4., 0.1), adaptvars(rtol, atol)).unwrap();
    solver.set_initial_state(array![1., 2.]).unwrap();
    let trajectory = solver.run_adaptive().unwrap();

    for step in &trajectory.steps()[1..] {
        assert!(
            rms_norm(step, rtol, atol) <= 1. + 1e-12,
            "accepted step at t = {} violates the tolerance",
            step.time
        );
    }
}

#[test]
fn smooth_problem_never_rejects_and_growth_stays_bounded() {
    let evals = Cell::new(0usize);
    let fun = |t: f64, y: ArrayView1<f64>, dydt: ArrayViewMut1<f64>| {
        evals.set(evals.get() + 1);
        decay(t, y, dydt);
    };
    let adapt = adaptvars(1e-4, 1e-9);
    let mut solver = Integrator::<_, CashKarp>::new(fun, timevars(0., 1., 0.1), adapt).unwrap();
    solver.set_initial_state(array![1.]).unwrap();
    let trajectory = solver.run_adaptive().unwrap();

    // Exactly six evaluations per accepted macro-step means no trial was
    // ever rejected on this smooth system at this loose tolerance.
    assert_eq!(evals.get(), 6 * (trajectory.len() - 1));

    // Accepted step sizes never grow by more than dtpassmax per step.
    let times = trajectory.times();
    let times = times.as_slice().unwrap();
    for w in times.windows(3) {
        let (prev, next) = (w[1] - w[0], w[2] - w[1]);
        assert!(
            next <= adapt.dtpassmax * prev * (1. + 1e-9),
            "step grew from {} to {}",
            prev,
            next
        );
    }
}

#[test]
fn sharp_peak_forces_rejections_but_terminates() {
    // The integrand has a narrow spike at t = 0.5; any step spanning it
    // from the flanks is rejected until the driver shrinks onto it.
    let evals = Cell::new(0usize);
    let fun = |t: f64, _y: ArrayView1<f64>, mut dydt: ArrayViewMut1<f64>| {
        evals.set(evals.get() + 1);
        dydt[0] = 1. / (1e-3 + (t - 0.5).powi(2));
    };
    let (rtol, atol) = (1e-6, 1e-9);
    let mut solver = Integrator::<_, CashKarp>::new(fun, timevars(0., 1., 0.2), adaptvars(rtol, atol)).unwrap();
    solver.set_initial_state(array![0.]).unwrap();
    let trajectory = solver.run_adaptive().unwrap();

    assert!(
        evals.get() > 6 * (trajectory.len() - 1),
        "expected at least one rejected trial"
    );
    assert_eq!(trajectory.last().unwrap().time, 1.);
    assert_strictly_increasing(&trajectory);
    for step in &trajectory.steps()[1..] {
        assert!(rms_norm(step, rtol, atol) <= 1. + 1e-12);
    }
}

#[test]
fn exhausting_the_step_budget_is_fatal() {
    let adapt = AdaptParams {
        maxsteps: 1,
        ..adaptvars(1e-8, 1e-10)
    };
    let mut solver = Integrator::<_, CashKarp>::new(decay, timevars(0., 1., 0.1), adapt).unwrap();
    solver.set_initial_state(array![1.]).unwrap();

    match solver.run_adaptive() {
        Err(IntegrationError::MaxStepsExceeded {
            time,
            tend,
            maxsteps,
            state,
        }) => {
            assert!(time > 0., "last good time should reflect the accepted step");
            assert_eq!(tend, 1.);
            assert_eq!(maxsteps, 1);
            assert_eq!(state.len(), 1);
        }
        other => panic!("expected budget exhaustion, got {:?}", other),
    }
}

#[test]
fn step_underflow_is_fatal() {
    // At t = 1e16 the floating-point resolution is 2, so a unit step
    // cannot advance the clock.
    let mut solver =
        Integrator::<_, CashKarp>::new(decay, timevars(1e16, 1e16 + 64., 1.), adaptvars(1e-8, 1e-10)).unwrap();
    solver.set_initial_state(array![1.]).unwrap();
    match solver.run_adaptive() {
        Err(IntegrationError::StepUnderflow { time, dt, .. }) => {
            assert_eq!(time, 1e16);
            assert_eq!(dt, 1.);
        }
        other => panic!("expected step underflow, got {:?}", other),
    }

    let mut solver =
        Integrator::<_, CashKarp>::new(decay, timevars(1e16, 1e16 + 64., 1.), adaptvars(1e-8, 1e-10)).unwrap();
    solver.set_initial_state(array![1.]).unwrap();
    assert!(matches!(
        solver.run_fixed_step(),
        Err(IntegrationError::StepUnderflow { .. })
    ));
}

#[test]
fn non_finite_derivative_exhausts_the_failure_budget() {
    let fun = |t: f64, y: ArrayView1<f64>, mut dydt: ArrayViewMut1<f64>| {
        dydt[0] = if t > 0.5 { f64::NAN } else { -y[0] };
    };
    let adapt = AdaptParams {
        maxfail: 10,
        ..adaptvars(1e-6, 1e-9)
    };
    let mut solver = Integrator::<_, CashKarp>::new(fun, timevars(0., 1., 0.2), adapt).unwrap();
    solver.set_initial_state(array![1.]).unwrap();

    match solver.run_adaptive() {
        Err(IntegrationError::TooManyFailures {
            time,
            failures,
            state,
            ..
        }) => {
            assert_eq!(failures, 11);
            assert!(time <= 0.5);
            assert!(state[0].is_finite(), "last good state must be intact");
        }
        other => panic!("expected failure-budget exhaustion, got {:?}", other),
    }
}

#[test]
fn fixed_driver_records_the_grid_and_its_error_estimates() {
    let mut solver = Integrator::<_, CashKarp>::new(decay, timevars(0., 1., 0.1), adaptvars(1e-6, 1e-9)).unwrap();
    solver.set_initial_state(array![1.]).unwrap();
    let trajectory = solver.run_fixed_step().unwrap();

    assert_eq!(trajectory.len(), 11);
    let expected: Array1<f64> = (0..11).map(|i| i as f64 * 0.1).collect();
    assert_eq!(trajectory.times(), expected);
    assert_strictly_increasing(&trajectory);

    // The initial record carries a zero estimate; every stepped record
    // carries the reported (but never acted upon) local error.
    assert!(trajectory.first().unwrap().error.iter().all(|&e| e == 0.));
    for step in &trajectory.steps()[1..] {
        assert!(step.error.iter().all(|&e| e != 0.));
    }
}

#[test]
fn fixed_and_adaptive_agree_on_a_smooth_problem() {
    let mut fixed =
        Integrator::<_, CashKarp>::new(decay, timevars(0., 1., 0.01), adaptvars(1e-6, 1e-9)).unwrap();
    fixed.set_initial_state(array![1.]).unwrap();
    let fixed = fixed.run_fixed_step().unwrap();

    let mut adaptive =
        Integrator::<_, CashKarp>::new(decay, timevars(0., 1., 0.01), adaptvars(1e-8, 1e-10)).unwrap();
    adaptive.set_initial_state(array![1.]).unwrap();
    let adaptive = adaptive.run_adaptive().unwrap();

    let (f, a) = (fixed.last().unwrap(), adaptive.last().unwrap());
    assert_eq!(f.time, a.time);
    assert_abs_diff_eq!(f.state[0], a.state[0], epsilon = 1e-6);
}

#[test]
fn repeated_runs_are_bit_identical() {
    let run = || {
        let mut solver =
            Integrator::<_, CashKarp>::new(decay, timevars(0., 2., 0.1), adaptvars(1e-7, 1e-9)).unwrap();
        solver.set_initial_state(array![1., 0.5]).unwrap();
        solver.run_adaptive().unwrap()
    };
    assert_eq!(run(), run());
}

#[test]
fn initial_state_is_set_exactly_once() {
    let mut solver = Integrator::<_, CashKarp>::new(decay, timevars(0., 1., 0.1), adaptvars(1e-6, 1e-9)).unwrap();
    assert_eq!(solver.timevars().tend, 1.);
    assert_eq!(solver.adaptvars().maxfail, 60);
    assert!(matches!(
        solver.run_adaptive(),
        Err(IntegrationError::MissingInitialState)
    ));

    solver.set_initial_state(array![1.]).unwrap();
    assert!(matches!(
        solver.set_initial_state(array![2.]),
        Err(ConfigError::InitialStateSet)
    ));

    // Overwriting is legal only through the explicit reset.
    solver.reset_initial_state(array![2.]).unwrap();
    assert_eq!(solver.initial_state().unwrap()[0], 2.);

    assert!(matches!(
        solver.reset_initial_state(Array1::zeros(0)),
        Err(ConfigError::EmptyState)
    ));
}

#[test]
fn trajectory_accessors_expose_parallel_arrays() {
    let mut solver = Integrator::<_, CashKarp>::new(decay, timevars(0., 1., 0.25), adaptvars(1e-6, 1e-9)).unwrap();
    solver.set_initial_state(array![1., -1.]).unwrap();
    let trajectory = solver.run_fixed_step().unwrap();

    let n = trajectory.len();
    assert!(!trajectory.is_empty());
    assert_eq!(trajectory.times().len(), n);
    assert_eq!(trajectory.states().dim(), (n, 2));
    assert_eq!(trajectory.errors().dim(), (n, 2));
    assert_eq!(trajectory.states().row(0), array![1., -1.]);
}

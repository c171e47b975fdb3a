//! Coefficients of the Cash–Karp embedded pair.

use lazy_static::lazy_static;
use ndarray::prelude::*;

/// Butcher tableau of an explicit embedded Runge–Kutta pair.
///
/// Notation is as in (ref 1). All coefficient views are backed by static
/// data and never change after initialization.
///
/// # References
///
/// 1. E. Hairer, S. P. Norsett G. Wanner, "Solving Ordinary Differential
///    Equations I: Nonstiff Problems", Sec. II.4.
pub trait RKMethod {
    /// Order of the embedded (lower-order) formula.
    ///
    /// Step-size control scales suggestions by the error norm raised to
    /// `-1 / (ORDER + 1)`.
    const ORDER: usize;

    /// Number of stages in the method.
    const NUM_STAGES: usize;

    /// Coefficients for incrementing time for consecutive RK stages, length
    /// `NUM_STAGES - 1`.
    ///
    /// The value for the first stage is always zero, so it is not included.
    fn c() -> ArrayView1<'static, f64>;

    /// Coefficients for combining previous RK stages to compute the next
    /// stage, length `NUM_STAGES - 1`.
    ///
    /// For explicit methods the coefficients above the main diagonal are
    /// zeros, so `a` is stored as a list of arrays of increasing lengths. The
    /// first stage is always just `f`, thus no coefficients for it are
    /// required.
    fn a() -> &'static [ArrayView1<'static, f64>];

    /// Coefficients for combining RK stages for computing the final
    /// prediction, length `NUM_STAGES`.
    fn b() -> ArrayView1<'static, f64>;

    /// Coefficients for estimating the error of the less accurate method,
    /// length `NUM_STAGES`.
    ///
    /// They are the difference between the higher- and lower-order `b`
    /// rows of the tableau, so the error estimate is a single dot product
    /// with the stages.
    fn e() -> ArrayView1<'static, f64>;
}

/// Explicit Runge–Kutta method of order 5(4).
///
/// The Cash–Karp pair of formulas is used (ref 1). Steps are taken with the
/// 5th order accurate formula, and the error is estimated from the embedded
/// 4th order formula sharing the same six stage evaluations.
///
/// Zero entries in `b` and `e` are genuine tableau values, not omissions:
/// stages 2 and 5 carry no weight in the 5th order solution by construction.
///
/// # References
///
/// 1. J. R. Cash, A. H. Karp, "A Variable Order Runge-Kutta Method for
///    Initial Value Problems with Rapidly Varying Right-Hand Sides", ACM
///    Transactions on Mathematical Software, Vol. 16, No. 3, pp. 201-222,
///    1990.
pub struct CashKarp;

impl RKMethod for CashKarp {
    const ORDER: usize = 4;

    const NUM_STAGES: usize = 6;

    fn c() -> ArrayView1<'static, f64> {
        aview1(&[1./5., 3./10., 3./5., 1., 7./8.])
    }

    fn a() -> &'static [ArrayView1<'static, f64>] {
        lazy_static! {
            static ref A: [ArrayView1<'static, f64>; 6 - 1] = [
                aview1(&[1./5.]),
                aview1(&[3./40., 9./40.]),
                aview1(&[3./10., -9./10., 6./5.]),
                aview1(&[-11./54., 5./2., -70./27., 35./27.]),
                aview1(&[1631./55296., 175./512., 575./13824., 44275./110592., 253./4096.]),
            ];
        }
        &*A
    }

    fn b() -> ArrayView1<'static, f64> {
        aview1(&[37./378., 0., 250./621., 125./594., 0., 512./1771.])
    }

    fn e() -> ArrayView1<'static, f64> {
        aview1(&[
            37./378. - 2825./27648.,
            0.,
            250./621. - 18575./48384.,
            125./594. - 13525./55296.,
            -277./14336.,
            512./1771. - 1./4.,
        ])
    }
}

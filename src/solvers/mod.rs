//! High-level solvers and the call contract they share.
//!
//! Every solver follows the same engine: a basis-generation process from
//! [`crate::algorithms`] produces recurrence coefficients, a running factorization
//! of the projected matrix is extended by one row or column with Givens
//! reflections, the solution is updated through a short window of direction
//! vectors, and the residual norm is estimated from the factorization scalars
//! alone. The explicit residual `b - Ax` is never formed inside the loop.
//!
//! A call either is rejected up front with a [`KrylovError`] (shapes, invalid
//! parameters) or returns a solution together with [`KrylovStats`] describing how
//! the iteration ended.

pub mod bilq;
pub mod lsqr;
pub mod minres_qlp;
pub mod tricg;

pub use bilq::{bilq, bilq_scratch};
pub use lsqr::{lsqr, lsqr_scratch};
pub use minres_qlp::{minres_qlp, minres_qlp_scratch};
pub use tricg::{tricg, tricg_scratch};

use crate::{
    algorithms::{Factorization, Process},
    error::{KrylovError, KrylovErrorKind},
    matrix::{axpby, copy},
};
use faer::{
    Mat, MatRef, Par,
    dyn_stack::{MemStack, StackReq},
    matrix_free::{BiLinOp, LinOp},
};
use std::fmt;

/// The closed set of solvers provided by this crate.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    MinresQlp,
    Bilq,
    Lsqr,
    Tricg,
}

impl Method {
    pub const ALL: [Method; 4] = [Method::MinresQlp, Method::Bilq, Method::Lsqr, Method::Tricg];

    /// The basis-generation process the method is built on.
    pub fn process(self) -> Process {
        match self {
            Method::MinresQlp => Process::Symmetric,
            Method::Bilq => Process::Biorthogonal,
            Method::Lsqr => Process::Bidiagonal,
            Method::Tricg => Process::Block,
        }
    }

    /// The factorization of the projected matrix paired with [`Method::process`].
    pub fn factorization(self) -> Factorization {
        match self {
            Method::MinresQlp => Factorization::Qlp,
            Method::Bilq => Factorization::Lq,
            Method::Lsqr => Factorization::Qr,
            Method::Tricg => Factorization::Ldl,
        }
    }

    /// Iteration budget used when [`KrylovParams::itmax`] is zero.
    pub fn default_itmax(self, nrows: usize, ncols: usize) -> usize {
        match self {
            Method::MinresQlp | Method::Bilq => 2 * ncols,
            Method::Lsqr | Method::Tricg => nrows + ncols,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Method::MinresQlp => "MINRES-QLP",
            Method::Bilq => "BiLQ",
            Method::Lsqr => "LSQR",
            Method::Tricg => "TriCG",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a started iteration ended. Exactly one applies to each call.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// The residual estimate met the tolerances (includes the zero-residual start).
    Solved,
    /// The alternate point (BiCG point of BiLQ) met the tolerances and was returned.
    SolvedAlternate,
    /// No exact solution exists; a least-squares or least-norm point was returned.
    Inconsistent,
    IllConditioned,
    /// A normalizing quantity vanished before convergence.
    Breakdown,
    /// The iteration budget ran out.
    Exhausted,
}

impl Outcome {
    /// Default human-readable status for the outcome.
    pub fn default_status(self) -> &'static str {
        match self {
            Outcome::Solved => "solution good enough given atol and rtol",
            Outcome::SolvedAlternate => "solution xᶜ good enough given atol and rtol",
            Outcome::Inconsistent => "found approximate minimum least-squares solution",
            Outcome::IllConditioned => "condition number seems too large for this machine",
            Outcome::Breakdown => "breakdown of the Krylov process",
            Outcome::Exhausted => "maximum number of iterations exceeded",
        }
    }
}

/// Options recognized by every solver.
///
/// Tolerances default to values derived from `f64::EPSILON`. A field a method has
/// no use for (for example `radius` outside LSQR) is ignored.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct KrylovParams {
    /// Absolute tolerance on the residual estimate.
    pub atol: f64,
    /// Relative tolerance, scaled by the initial residual norm.
    pub rtol: f64,
    /// Iteration budget; `0` selects [`Method::default_itmax`].
    pub itmax: usize,
    /// Upper limit on the condition-number estimate.
    pub conlim: f64,
    /// Shift (MINRES-QLP) or Tikhonov regularization (LSQR), `λ ≥ 0`.
    pub lambda: f64,
    /// Trust-region radius for LSQR, `0` means unconstrained.
    pub radius: f64,
    /// Allow BiLQ to return its BiCG point when that one has converged.
    pub transfer_to_alternate: bool,
    /// Record the residual estimate of every iteration in [`KrylovStats::residuals`].
    pub history: bool,
}

impl Default for KrylovParams {
    fn default() -> Self {
        let sqrt_eps = f64::EPSILON.sqrt();
        Self {
            atol: sqrt_eps,
            rtol: sqrt_eps,
            itmax: 0,
            conlim: 1.0 / sqrt_eps,
            lambda: 0.0,
            radius: 0.0,
            transfer_to_alternate: false,
            history: false,
        }
    }
}

impl KrylovParams {
    /// Rejects negative or non-finite tolerances, shifts and radii.
    pub fn validate(&self) -> Result<(), KrylovError> {
        let nonnegative = [
            ("atol", self.atol),
            ("rtol", self.rtol),
            ("lambda", self.lambda),
            ("radius", self.radius),
        ];
        for (name, value) in nonnegative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(KrylovErrorKind::InputError(format!(
                    "`{name}` must be finite and non-negative, found {value}."
                ))
                .into());
            }
        }
        if self.conlim.is_nan() || self.conlim <= 0.0 {
            return Err(KrylovErrorKind::InputError(format!(
                "`conlim` must be positive, found {}.",
                self.conlim
            ))
            .into());
        }
        Ok(())
    }

    pub(crate) fn resolve_itmax(&self, method: Method, nrows: usize, ncols: usize) -> usize {
        if self.itmax == 0 {
            method.default_itmax(nrows, ncols)
        } else {
            self.itmax
        }
    }
}

/// Shifts `τ` and `ν` of the coupled system `[τE A; Aᵀ νF]` solved by TriCG.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SqdShifts {
    pub tau: f64,
    pub nu: f64,
}

impl Default for SqdShifts {
    /// `τ = 1, ν = -1`, the symmetric quasi-definite case.
    fn default() -> Self {
        Self { tau: 1.0, nu: -1.0 }
    }
}

/// Statistics describing how a solve ended.
#[derive(Clone, Debug, PartialEq)]
pub struct KrylovStats {
    pub method: Method,
    pub niter: usize,
    /// `true` for [`Outcome::Solved`], [`Outcome::SolvedAlternate`] and
    /// [`Outcome::Inconsistent`].
    pub solved: bool,
    /// `true` when the returned point is a least-squares rather than an exact solution.
    pub inconsistent: bool,
    pub outcome: Outcome,
    pub status: String,
    /// Residual estimates, starting with the initial residual. Empty unless requested.
    pub residuals: Vec<f64>,
    /// Estimates of `‖Aᵀr‖` (or `‖Ar‖` for symmetric methods) where the method defines them.
    pub a_residuals: Vec<f64>,
    /// Estimate of `‖A‖` (Frobenius norm of the projected matrix), `0` if not tracked.
    pub anorm: f64,
    /// Condition-number estimate, `0` if not tracked.
    pub acond: f64,
    record: bool,
}

impl KrylovStats {
    pub(crate) fn new(method: Method, params: &KrylovParams) -> Self {
        Self {
            method,
            niter: 0,
            solved: false,
            inconsistent: false,
            outcome: Outcome::Exhausted,
            status: String::from("unknown"),
            residuals: Vec::new(),
            a_residuals: Vec::new(),
            anorm: 0.0,
            acond: 0.0,
            record: params.history,
        }
    }

    #[inline]
    pub(crate) fn record_residual(&mut self, residual: f64) {
        if self.record {
            self.residuals.push(residual);
        }
    }

    #[inline]
    pub(crate) fn record_a_residual(&mut self, residual: f64) {
        if self.record {
            self.a_residuals.push(residual);
        }
    }

    /// Sets the terminal fields. `inconsistent` is taken from the outcome.
    pub(crate) fn finish(&mut self, niter: usize, outcome: Outcome, status: impl Into<String>) {
        self.niter = niter;
        self.outcome = outcome;
        self.solved = matches!(
            outcome,
            Outcome::Solved | Outcome::SolvedAlternate | Outcome::Inconsistent
        );
        self.inconsistent = outcome == Outcome::Inconsistent;
        self.status = status.into();
        log::debug!(
            "{}: stopped after {} iterations ({:?}): {}",
            self.method,
            niter,
            outcome,
            self.status
        );
    }
}

/// Solution of a single-vector solve.
#[derive(Clone, Debug)]
pub struct KrylovSolution {
    pub x: Mat<f64>,
    pub stats: KrylovStats,
}

/// Solution `(x, y)` of a coupled block solve.
#[derive(Clone, Debug)]
pub struct BlockSolution {
    pub x: Mat<f64>,
    pub y: Mat<f64>,
    pub stats: KrylovStats,
}

/// Per-iteration terminal conditions of a running solve.
///
/// [`Termination::outcome`] resolves the flags in priority order: breakdown,
/// ill-conditioning, convergence (alternate point first, then exact, then
/// least-squares), iteration budget.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct Termination {
    pub breakdown: bool,
    pub ill_conditioned: bool,
    pub solved_alternate: bool,
    pub solved: bool,
    pub inconsistent: bool,
    pub tired: bool,
}

impl Termination {
    pub fn outcome(&self) -> Option<Outcome> {
        if self.breakdown {
            Some(Outcome::Breakdown)
        } else if self.ill_conditioned {
            Some(Outcome::IllConditioned)
        } else if self.solved_alternate {
            Some(Outcome::SolvedAlternate)
        } else if self.solved {
            Some(Outcome::Solved)
        } else if self.inconsistent {
            Some(Outcome::Inconsistent)
        } else if self.tired {
            Some(Outcome::Exhausted)
        } else {
            None
        }
    }
}

/// Returns `b - A x₀`, or a copy of `b` without a warm start.
pub(crate) fn initial_residual(
    operator: &dyn LinOp<f64>,
    b: MatRef<'_, f64>,
    x0: Option<MatRef<'_, f64>>,
    par: Par,
    stack: &mut MemStack,
) -> Mat<f64> {
    let mut r = Mat::zeros(b.nrows(), 1);
    match x0 {
        Some(x0) => {
            operator.apply(r.as_mut(), x0, par, stack);
            axpby(1.0, b, -1.0, r.as_mut());
        }
        None => copy(b, r.as_mut()),
    }
    r
}

/// Workspace for methods applying `A`, `Aᵀ` and up to two preconditioners.
pub(crate) fn two_sided_scratch(
    operator: &dyn BiLinOp<f64>,
    range_precond: Option<&dyn LinOp<f64>>,
    domain_precond: Option<&dyn LinOp<f64>>,
    par: Par,
) -> StackReq {
    let mut reqs = vec![
        operator.apply_scratch(1, par),
        operator.transpose_apply_scratch(1, par),
    ];
    reqs.extend(
        [range_precond, domain_precond]
            .into_iter()
            .flatten()
            .map(|p| p.apply_scratch(1, par)),
    );
    StackReq::any_of(&reqs)
}

/// Status for a call that stops before the first iteration because `r₀ = 0`.
pub(crate) fn zero_residual_status(warm: bool) -> &'static str {
    if warm {
        "x₀ is a zero-residual solution"
    } else {
        "x = 0 is a zero-residual solution"
    }
}

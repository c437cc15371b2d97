//! Preconditioned symmetric Lanczos process with a diagonal shift.
//!
//! Generates the tridiagonal projection of `A + λI` onto the Krylov subspace
//! `𝒦ₖ(M(A + λI), Mb)`. With a preconditioner `M` (applied as a multiplication,
//! `M ≈ (A + λI)⁻¹`), the raw vectors are orthonormal in the `M` inner product
//! and the preconditioned twins `vₖ = M wₖ` are what the operator is applied to:
//!
//! ```text
//! βₖ₊₁ wₖ₊₁ = (A + λI) vₖ - αₖ wₖ - βₖ wₖ₋₁,   αₖ = ⟨vₖ, (A + λI) vₖ⟩
//! ```
//!
//! Only three raw vectors and two twins are alive at any time. Without a
//! preconditioner the twins are never allocated.

use super::breakdown_tolerance;
use crate::{
    error::KrylovError,
    matrix::{BasisSequence, axpy, dot},
};
use faer::{MatRef, Par, dyn_stack::MemStack, matrix_free::LinOp, prelude::*};

/// Coefficients produced by one Lanczos step.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct LanczosStep {
    /// Diagonal entry `αₖ`.
    pub alpha: f64,
    /// Off-diagonal entry `βₖ` above `αₖ` (the normalization of `vₖ`).
    pub beta: f64,
    /// Off-diagonal entry `βₖ₊₁` below `αₖ`.
    pub beta_next: f64,
}

/// Stateful symmetric Lanczos iteration.
///
/// Call [`SymmetricLanczos::start`] once, then alternate [`SymmetricLanczos::step`]
/// and [`SymmetricLanczos::advance`]. Between the two, [`SymmetricLanczos::current`]
/// still returns `vₖ`, which the solver needs to update its directions.
#[derive(Debug)]
pub struct SymmetricLanczos<'a, A: ?Sized> {
    operator: &'a A,
    precond: Option<&'a dyn LinOp<f64>>,
    shift: f64,
    basis: BasisSequence,
    beta: f64,
    beta_next: f64,
    steps: usize,
}

impl<'a, A: ?Sized + LinOp<f64>> SymmetricLanczos<'a, A> {
    pub fn new(operator: &'a A, precond: Option<&'a dyn LinOp<f64>>, shift: f64) -> Self {
        Self {
            operator,
            precond,
            shift,
            basis: BasisSequence::new(operator.nrows(), precond.is_some()),
            beta: 0.0,
            beta_next: 0.0,
            steps: 0,
        }
    }

    /// Normalizes the starting vector and returns `β₁ = √⟨M r₀, r₀⟩`.
    ///
    /// A zero `β₁` leaves the sequence unnormalized; the caller must not step.
    pub fn start(
        &mut self,
        r0: MatRef<'_, f64>,
        par: Par,
        stack: &mut MemStack,
    ) -> Result<f64, KrylovError> {
        self.basis.seed(r0);
        self.basis.precondition_next(self.precond, par, stack);
        let beta = self.basis.next_norm("M", 0)?;
        if beta > 0.0 {
            self.basis.normalize_next(beta);
        }
        self.basis.advance();
        self.beta = beta;
        self.steps = 0;
        Ok(beta)
    }

    /// Performs one operator application and forms `wₖ₊₁`.
    ///
    /// The new vector is normalized only when `βₖ₊₁` exceeds the breakdown
    /// tolerance; otherwise the Krylov subspace is invariant and it must not be used.
    pub fn step(&mut self, par: Par, stack: &mut MemStack) -> Result<LanczosStep, KrylovError> {
        let k = self.steps + 1;
        let beta = self.beta;

        let alpha = {
            let mut views = self.basis.views_mut();
            self.operator
                .apply(views.next_raw.rb_mut(), views.curr, par, stack);
            axpy(self.shift, views.curr, views.next_raw.rb_mut());
            if k >= 2 {
                axpy(-beta, views.prev_raw, views.next_raw.rb_mut());
            }
            let alpha = dot(views.curr, views.next_raw.rb());
            axpy(-alpha, views.curr_raw, views.next_raw.rb_mut());
            alpha
        };

        self.basis.precondition_next(self.precond, par, stack);
        let beta_next = self.basis.next_norm("M", k)?;
        if beta_next > breakdown_tolerance() {
            self.basis.normalize_next(beta_next);
        }

        self.beta_next = beta_next;
        self.steps = k;
        Ok(LanczosStep {
            alpha,
            beta,
            beta_next,
        })
    }

    /// The operator-side vector `vₖ` of the step just performed.
    #[inline]
    pub fn current(&self) -> MatRef<'_, f64> {
        self.basis.curr()
    }

    /// Makes `vₖ₊₁` current.
    pub fn advance(&mut self) {
        self.basis.advance();
        self.beta = self.beta_next;
    }

    #[inline]
    pub fn steps(&self) -> usize {
        self.steps
    }
}
